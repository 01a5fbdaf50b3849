//! Client configuration.

use std::time::Duration;

use crate::error::Result;
use crate::secrets::ServiceSecrets;

pub const DEFAULT_API_SERVER: &str = "api.empiredata.co";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options for constructing an `EmpireClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host (and optional port) of the API server.
    pub api_server: String,
    /// End-user identifier. Required for materialized views.
    pub enduser: Option<String>,
    /// Secrets used by `connect` when no explicit secrets are passed.
    pub secrets: Option<ServiceSecrets>,
    /// Interval between view status polls.
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_server: DEFAULT_API_SERVER.to_string(),
            enduser: None,
            secrets: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Build a config from `EMPIRE_API_SERVER`, `EMPIRE_ENDUSER` and
    /// `EMPIRE_SECRETS_FILE`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(server) = std::env::var("EMPIRE_API_SERVER") {
            config.api_server = server;
        }
        config.enduser = std::env::var("EMPIRE_ENDUSER").ok().filter(|s| !s.is_empty());
        if let Ok(path) = std::env::var("EMPIRE_SECRETS_FILE") {
            config.secrets = Some(ServiceSecrets::load(path)?);
        }
        Ok(config)
    }

    pub fn api_server(mut self, server: impl Into<String>) -> Self {
        self.api_server = server.into();
        self
    }

    pub fn enduser(mut self, enduser: impl Into<String>) -> Self {
        self.enduser = Some(enduser.into());
        self
    }

    pub fn secrets(mut self, secrets: ServiceSecrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `{protocol}://{api_server}/empire/`, using plain HTTP for local servers.
    pub fn base_url(&self) -> String {
        let server = self.api_server.trim_end_matches('/');
        let local = server.contains("localhost") || server.contains("127.0.0.1");
        let protocol = if local { "http" } else { "https" };
        format!("{protocol}://{server}/empire/")
    }
}
