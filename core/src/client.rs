//! The Empire client: named API operations mapped onto requests.
//!
//! # Design
//! `EmpireClient` is cheap to clone; clones share one `ClientContext` (and so
//! one session credential) and one transport. Every operation returns a
//! `Request` ready for handler registration. Argument problems that can be
//! detected without the network are returned as `Err` straight away and never
//! reach the transport.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::ClientConfig;
use crate::context::ClientContext;
use crate::error::{EmpireError, Result};
use crate::http::HttpMethod;
use crate::poller::{self, PollOptions, ViewPoller};
use crate::request::{CustomEvent, Payload, Request, RequestOptions, FOR_EACH, READY};
use crate::secrets::ServiceSecrets;
use crate::transport::{Transport, UreqTransport};

#[derive(Debug, Clone)]
pub struct EmpireClient {
    context: Arc<ClientContext>,
    transport: Arc<dyn Transport>,
    poll: PollOptions,
}

impl EmpireClient {
    /// Client talking HTTP through `ureq`.
    pub fn new(app_key: &str, config: ClientConfig) -> Self {
        Self::with_transport(app_key, config, Arc::new(UreqTransport::new()))
    }

    pub fn with_transport(
        app_key: &str,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            context: Arc::new(ClientContext::new(app_key, &config)),
            transport,
            poll: PollOptions::new(config.poll_interval),
        }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// Forget the session credential; the next call creates a new session.
    pub fn reset_session(&self) {
        self.context.reset_session();
    }

    /// A request against `path` (relative to the base URL) with arbitrary
    /// options. The named operations below are all built on this.
    pub fn request(&self, path: impl Into<String>, options: RequestOptions) -> Request {
        Request::new(self.context.clone(), self.transport.clone(), path, options)
    }

    /// Replace the client's service secrets with the contents of a JSON file.
    pub fn load_secrets(&self, path: impl AsRef<Path>) -> Result<()> {
        let secrets = ServiceSecrets::load(path)?;
        self.context.set_secrets(secrets);
        Ok(())
    }

    /// Connect to `service`. Without explicit `secrets` the connect body is
    /// taken from the loaded service secrets.
    pub fn connect(&self, service: &str, secrets: Option<Map<String, Value>>) -> Result<Request> {
        let body = match secrets {
            Some(secrets) => secrets,
            None => self
                .context
                .secrets()
                .and_then(|s| s.connect_body(service))
                .ok_or_else(|| EmpireError::MissingSecrets(service.to_string()))?,
        };
        let options = RequestOptions::default()
            .method(HttpMethod::Post)
            .body(Value::Object(body));
        Ok(self.request(format!("services/{service}/connect"), options))
    }

    /// Describe all services, one service, or one table of a service.
    pub fn describe(&self, service: Option<&str>, table: Option<&str>) -> Result<Request> {
        let path = match (service, table) {
            (None, Some(_)) => return Err(EmpireError::TableWithoutService),
            (None, None) => "services".to_string(),
            (Some(service), None) => format!("services/{service}"),
            (Some(service), Some(table)) => format!("services/{service}/{table}"),
        };
        Ok(self.request(path, RequestOptions::default()))
    }

    /// Run a SQL query. Register `for_each` to receive the result rows.
    pub fn query(&self, sql: &str) -> Request {
        let options = RequestOptions::default()
            .method(HttpMethod::Post)
            .body(json!({ "query": sql }))
            .raw()
            .event(FOR_EACH, CustomEvent::ForEachRow);
        self.request("query", options)
    }

    /// Insert a row (`{column: value}`) into a service table.
    pub fn insert(&self, service: &str, table: &str, row: &impl Serialize) -> Result<Request> {
        let options = RequestOptions::default()
            .method(HttpMethod::Post)
            .body(serde_json::to_value(row)?);
        Ok(self.request(format!("services/{service}/{table}"), options))
    }

    /// Create or update a materialized view. Register `ready` to be told when
    /// the view has been materialized.
    pub fn materialize_view(&self, name: &str, sql: &str) -> Result<Request> {
        self.materialize_view_with(name, sql, self.poll.clone())
    }

    /// `materialize_view` with explicit polling options for the `ready` event.
    pub fn materialize_view_with(&self, name: &str, sql: &str, poll: PollOptions) -> Result<Request> {
        self.require_enduser()?;
        let options = RequestOptions::default()
            .method(HttpMethod::Put)
            .body(json!({ "query": sql }))
            .event(
                READY,
                CustomEvent::ViewReady {
                    view: name.to_string(),
                    poll,
                },
            );
        Ok(self.request(format!("view/{name}"), options))
    }

    pub fn drop_view(&self, name: &str) -> Result<Request> {
        self.require_enduser()?;
        let options = RequestOptions::default().method(HttpMethod::Delete);
        Ok(self.request(format!("view/{name}"), options))
    }

    /// When the view was materialized. The success payload is an RFC 3339
    /// string, or `null` while the view is pending.
    pub fn view_materialized_at(&self, name: &str) -> Result<Request> {
        self.require_enduser()?;
        let options = RequestOptions::default().filter(|payload| {
            let at = payload
                .as_json()
                .and_then(|status| status.get("materializedAt"))
                .and_then(parse_timestamp);
            Payload::Json(at.map_or(Value::Null, |t| Value::String(t.to_rfc3339())))
        });
        Ok(self.request(poller::status_path(name), options))
    }

    /// Poll a view until it is ready, using the client's poll interval.
    pub fn view_poller(&self) -> ViewPoller {
        ViewPoller::new(self.context.clone(), self.transport.clone(), self.poll.clone())
    }

    fn require_enduser(&self) -> Result<()> {
        match self.context.enduser() {
            Some(_) => Ok(()),
            None => Err(EmpireError::MissingEnduser),
        }
    }
}

/// Accepts RFC 3339 strings and epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
