//! API request/response envelopes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flat key-value payload plus the identity of the page it was posted from
#[derive(Debug, Deserialize)]
pub struct FormPayload {
    /// Bound page the client considers itself on
    #[serde(default)]
    pub page_id: String,
    /// Submitted fields, including the engine's hidden control fields
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

/// Response of `POST /forms/:slug/validate`
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, Vec<String>>>,
    pub data: HashMap<String, String>,
}

/// Response of `POST /forms/:slug/send`
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub is_sent: bool,
    pub data: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Response of `POST /session`
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInit {
    pub session_id: String,
    pub csrf_token: String,
}

/// Error envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}
