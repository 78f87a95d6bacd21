//! Engine configuration

use serde::{Deserialize, Serialize};

/// Site identity exposed to templates as default tags
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SiteInfo {
    /// Display name, substituted for `{site_name}`
    pub name: String,
    /// Base URL, substituted for `{site_url}`
    pub url: String,
}

impl SiteInfo {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

/// Top-level engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Prefix namespacing every session key this engine owns
    pub session_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_prefix: "formflow_".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_prefix(mut self, prefix: &str) -> Self {
        self.session_prefix = prefix.to_string();
        self
    }
}
