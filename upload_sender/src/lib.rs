//! Client uploading images to the predict server.
pub mod upload;

pub use common::Error;
