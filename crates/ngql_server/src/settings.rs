//! Server settings.

use crate::error::ServerResult;
use ngql_runtime::{RequestQuota, ServerOptions};
use serde::{Deserialize, Serialize};

/// Options and the default quota applied to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub options: ServerOptions,
    pub quota: RequestQuota,
}

impl ServerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict settings: every input and output fault is reported.
    pub fn dev() -> Self {
        Self::new().options(ServerOptions::DEFAULT_DEV)
    }

    /// Lenient settings for production traffic.
    pub fn prod() -> Self {
        Self::new().options(ServerOptions::DEFAULT_PROD)
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn quota(mut self, quota: RequestQuota) -> Self {
        self.quota = quota;
        self
    }

    /// Parses settings from JSON; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> ServerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
