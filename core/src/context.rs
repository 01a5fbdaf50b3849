//! Per-client state shared by every request the client creates.
//!
//! # Design
//! The session credential is an explicitly owned field of the context rather
//! than process-wide state. All requests built from one client hold the same
//! `Arc<ClientContext>`, so a credential obtained by any of them is reused by
//! the rest. The credential is only cleared by an explicit `reset_session`.

use parking_lot::RwLock;

use crate::config::ClientConfig;
use crate::secrets::ServiceSecrets;

#[derive(Debug)]
pub struct ClientContext {
    app_key: String,
    enduser: Option<String>,
    base_url: String,
    session_key: RwLock<String>,
    secrets: RwLock<Option<ServiceSecrets>>,
}

impl ClientContext {
    pub fn new(app_key: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            app_key: app_key.into(),
            enduser: config.enduser.clone(),
            base_url: config.base_url(),
            session_key: RwLock::new(String::new()),
            secrets: RwLock::new(config.secrets.clone()),
        }
    }

    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    pub fn enduser(&self) -> Option<&str> {
        self.enduser.as_deref()
    }

    /// Base URL with a trailing slash; request paths are appended to it.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session_key(&self) -> String {
        self.session_key.read().clone()
    }

    pub fn has_session(&self) -> bool {
        !self.session_key.read().is_empty()
    }

    pub(crate) fn set_session_key(&self, key: &str) {
        *self.session_key.write() = key.to_string();
    }

    /// Forget the current session credential; the next request bootstraps a
    /// new one.
    pub fn reset_session(&self) {
        self.session_key.write().clear();
    }

    pub fn secrets(&self) -> Option<ServiceSecrets> {
        self.secrets.read().clone()
    }

    pub(crate) fn set_secrets(&self, secrets: ServiceSecrets) {
        *self.secrets.write() = Some(secrets);
    }
}
