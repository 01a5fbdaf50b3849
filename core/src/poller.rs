//! Materialized view readiness polling.
//!
//! # Design
//! A view is created asynchronously on the server; its `view/{name}/status`
//! endpoint reports `pending` until the view is materialized and `ready`
//! afterwards. The poller asks at a constant interval until it sees `ready`,
//! then calls the completion callback exactly once.
//!
//! By default polling is unbounded. `PollOptions` adds an optional attempt
//! limit and a cancellation token. A failed status call or an unrecognized
//! status ends the loop without calling the callback; the outcome is logged
//! and returned to whoever awaits the poll.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::DEFAULT_POLL_INTERVAL;
use crate::context::ClientContext;
use crate::error::RequestError;
use crate::request::{Request, RequestOptions};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    /// Give up after this many status calls. `None` polls until ready.
    pub max_attempts: Option<u32>,
    pub cancel: CancellationToken,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The view is ready; carries the final status body.
    Ready(Value),
    /// The status call failed.
    Failed(RequestError),
    /// The status body reported neither `pending` nor `ready`.
    UnexpectedStatus(Value),
    Cancelled,
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

pub fn status_path(view: &str) -> String {
    format!("view/{view}/status")
}

pub struct ViewPoller {
    context: Arc<ClientContext>,
    transport: Arc<dyn Transport>,
    options: PollOptions,
}

impl ViewPoller {
    pub fn new(
        context: Arc<ClientContext>,
        transport: Arc<dyn Transport>,
        options: PollOptions,
    ) -> Self {
        Self {
            context,
            transport,
            options,
        }
    }

    /// Poll `view` until it is ready, then call `on_ready` with its status.
    pub async fn wait_until_ready(&self, view: &str, on_ready: impl FnOnce(Value)) -> PollOutcome {
        let mut attempts = 0u32;
        loop {
            if self.options.cancel.is_cancelled() {
                return PollOutcome::Cancelled;
            }
            attempts += 1;

            let request = Request::new(
                self.context.clone(),
                self.transport.clone(),
                status_path(view),
                RequestOptions::default(),
            );
            let status = match request.fetch().await {
                Ok(payload) => payload.into_json(),
                Err(error) => {
                    warn!(view, attempts, error = %error, "view status call failed; polling stopped");
                    return PollOutcome::Failed(error);
                }
            };

            match status.get("viewStatus").and_then(Value::as_str) {
                Some("ready") => {
                    debug!(view, attempts, "view ready");
                    on_ready(status.clone());
                    return PollOutcome::Ready(status);
                }
                Some("pending") => {}
                other => {
                    warn!(view, status = ?other, "unexpected view status; polling stopped");
                    return PollOutcome::UnexpectedStatus(status);
                }
            }

            if self.options.max_attempts.is_some_and(|max| attempts >= max) {
                warn!(view, attempts, "view still pending; giving up");
                return PollOutcome::Exhausted { attempts };
            }

            tokio::select! {
                _ = self.options.cancel.cancelled() => {
                    debug!(view, "view polling cancelled");
                    return PollOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.options.interval) => {}
            }
        }
    }

    /// Run `wait_until_ready` as a background task.
    pub fn spawn(
        self,
        view: String,
        on_ready: impl FnOnce(Value) + Send + 'static,
    ) -> JoinHandle<PollOutcome> {
        tokio::spawn(async move { self.wait_until_ready(&view, on_ready).await })
    }
}
