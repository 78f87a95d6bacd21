//! Error types

use thiserror::Error;

/// Engine errors. Channel failures (mail, webhooks) are reported per
/// channel in `SendResult` rather than raised here; unbound pages surface
/// as `FlowOutcome::NotBound`.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Form not found: {0}")]
    FormNotFound(String),
}

/// Engine result alias
pub type Result<T> = std::result::Result<T, FlowError>;
