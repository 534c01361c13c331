//! HTTP service running object detection on uploaded images.
pub mod endpoints;
pub mod error;
pub mod meter;
pub mod nn;
