//! API server configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Static bearer token required on mutating routes; `None` disables the
    /// check (e.g. behind a trusted reverse proxy).
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth_token: None,
        }
    }
}

impl ApiConfig {
    pub fn auth_enabled(&self) -> bool {
        self.auth_token.is_some()
    }
}
