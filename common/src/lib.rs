//! Common code shared between `predict_server` and `upload_sender`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
