//! The request engine.
//!
//! # Design
//! A `Request` is a pending call: a target path, call options, and a set of
//! handler slots (`success`, `error`, and one slot per custom event the call
//! was configured with). Registration methods take and return the request by
//! value, so handlers are chained onto it right after construction.
//!
//! Nothing is sent until the request is dispatched, either by `.await`ing it
//! or by `spawn()`ing it onto the runtime. Both consume the request, which
//! gives two guarantees: every handler is registered before the call can
//! settle, and a request is dispatched at most once.
//!
//! Dispatch runs a fixed pipeline:
//! 1. ensure a session credential (see `session`); a bootstrap failure goes
//!    straight to the error path,
//! 2. send the call with the session `Authorization` header,
//! 3. a non-2xx status goes to the error path,
//! 4. decode the body as a JSON envelope unless the call is raw,
//! 5. an envelope with `status: "error"` goes to the error path,
//! 6. apply the response filter,
//! 7. run each configured custom event that has a registered handler,
//! 8. call the success handler once.
//!
//! The error path calls the registered error handler. Without one, dispatch
//! returns the error, so unhandled failures are never silently dropped.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ClientContext;
use crate::error::{EmpireError, ErrorKind, RequestError};
use crate::http::{merge_headers, HttpMethod, HttpRequest, HttpResponse};
use crate::poller::{PollOptions, ViewPoller};
use crate::rows;
use crate::session;
use crate::transport::Transport;

/// Event name for per-row iteration over query results.
pub const FOR_EACH: &str = "forEach";
/// Event name for materialized view readiness.
pub const READY: &str = "ready";

/// A decoded response as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// Body text of a raw call, passed through verbatim.
    Raw(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Raw(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    /// Convert to a JSON value; raw text becomes a JSON string.
    pub fn into_json(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::Raw(text) => Value::String(text),
        }
    }
}

pub type SuccessHandler = Box<dyn FnOnce(Payload) + Send>;
pub type ErrorHandler = Box<dyn FnOnce(RequestError) + Send>;
pub type EventHandler = Box<dyn FnMut(Value) + Send>;
pub type Filter = Box<dyn FnOnce(Payload) -> Payload + Send>;
pub type EventDispatcher = Arc<dyn Fn(&mut EventHandler, &Payload) + Send + Sync>;

/// How a custom event delivers the response to its registered handler.
#[derive(Clone)]
pub enum CustomEvent {
    /// Call the handler once per result row, in order.
    ForEachRow,
    /// Poll the view's status and call the handler with the final status once
    /// the view is ready. Polling runs in the background; the success handler
    /// does not wait for it.
    ViewReady { view: String, poll: PollOptions },
    /// Caller-supplied dispatch.
    Custom(EventDispatcher),
}

impl fmt::Debug for CustomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomEvent::ForEachRow => f.write_str("ForEachRow"),
            CustomEvent::ViewReady { view, poll } => f
                .debug_struct("ViewReady")
                .field("view", view)
                .field("poll", poll)
                .finish(),
            CustomEvent::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Options for a single call.
#[derive(Default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    /// JSON body; `{}` is sent when absent.
    pub body: Option<Value>,
    /// Extra headers. These override the defaults of the same name.
    pub headers: Vec<(String, String)>,
    /// Pass the body through as text instead of decoding a JSON envelope.
    pub raw: bool,
    /// Use the path as a full URL instead of resolving it against the base URL.
    pub local: bool,
    pub filter: Option<Filter>,
    /// Custom events, dispatched in the order they were added.
    pub events: Vec<(String, CustomEvent)>,
}

impl RequestOptions {
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn filter(mut self, filter: impl FnOnce(Payload) -> Payload + Send + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn event(mut self, name: impl Into<String>, event: CustomEvent) -> Self {
        self.events.push((name.into(), event));
        self
    }
}

/// Where and how to send the call; the parts of `RequestOptions` that are
/// not handlers.
#[derive(Debug, Clone)]
struct Target {
    path: String,
    method: HttpMethod,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    raw: bool,
    local: bool,
}

/// A pending call with its handler slots.
pub struct Request {
    context: Arc<ClientContext>,
    transport: Arc<dyn Transport>,
    target: Target,
    filter: Option<Filter>,
    events: Vec<(String, CustomEvent)>,
    on_success: Option<SuccessHandler>,
    on_error: Option<ErrorHandler>,
    handlers: HashMap<String, EventHandler>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("target", &self.target)
            .field("events", &self.events)
            .field("registered", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn new(
        context: Arc<ClientContext>,
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        options: RequestOptions,
    ) -> Self {
        let RequestOptions {
            method,
            body,
            headers,
            raw,
            local,
            filter,
            events,
        } = options;
        Self {
            context,
            transport,
            target: Target {
                path: path.into(),
                method,
                body,
                headers,
                raw,
                local,
            },
            filter,
            events,
            on_success: None,
            on_error: None,
            handlers: HashMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.target.path
    }

    pub fn method(&self) -> HttpMethod {
        self.target.method
    }

    /// Names of the custom events this request accepts handlers for.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(name, _)| name.as_str())
    }

    /// Handler for the (filtered) response. Replaces any earlier one.
    pub fn success(mut self, handler: impl FnOnce(Payload) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(handler));
        self
    }

    /// Handler for the normalized error. Replaces any earlier one.
    pub fn error(mut self, handler: impl FnOnce(RequestError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Register a handler for a custom event. Replaces any earlier one for the
    /// same event. Names the request was not configured with are ignored.
    pub fn on(mut self, event: &str, handler: impl FnMut(Value) + Send + 'static) -> Self {
        if self.events.iter().any(|(name, _)| name == event) {
            self.handlers.insert(event.to_string(), Box::new(handler));
        } else {
            warn!(event, path = %self.target.path, "ignoring handler for unknown event");
        }
        self
    }

    /// Per-row handler for query results.
    ///
    /// Only requests built by `EmpireClient::query` (or configured with
    /// `CustomEvent::ForEachRow`) emit rows; on any other request the handler
    /// is dropped with a warning and never called.
    pub fn for_each(self, handler: impl FnMut(Value) + Send + 'static) -> Self {
        self.on(FOR_EACH, handler)
    }

    /// Handler called with the view status once a materialized view is ready.
    ///
    /// Only requests built by `EmpireClient::materialize_view` emit `ready`.
    /// On any other request the handler is dropped with a warning and never
    /// called, so do not wait on it there.
    pub fn ready(self, handler: impl FnOnce(Value) + Send + 'static) -> Self {
        let mut handler = Some(handler);
        self.on(READY, move |status| {
            if let Some(handler) = handler.take() {
                handler(status);
            }
        })
    }

    /// Dispatch on the runtime without waiting for the outcome.
    pub fn spawn(self) -> JoinHandle<Result<(), EmpireError>> {
        tokio::spawn(self.dispatch())
    }

    /// Send the call and return the filtered response, bypassing all handlers.
    pub async fn fetch(self) -> Result<Payload, RequestError> {
        let payload = execute(&self.context, self.transport.as_ref(), &self.target).await?;
        Ok(match self.filter {
            Some(filter) => filter(payload),
            None => payload,
        })
    }

    /// Send the call and run the registered handlers.
    ///
    /// Returns `Ok(())` once the success or error handler has run. Returns the
    /// error itself when the call failed and no error handler was registered.
    pub async fn dispatch(self) -> Result<(), EmpireError> {
        let Request {
            context,
            transport,
            target,
            filter,
            events,
            on_success,
            on_error,
            mut handlers,
        } = self;

        let payload = match execute(&context, transport.as_ref(), &target).await {
            Ok(payload) => payload,
            Err(error) => return fail(&target, on_error, error),
        };
        let payload = match filter {
            Some(filter) => filter(payload),
            None => payload,
        };

        for (name, event) in events {
            let Some(mut handler) = handlers.remove(&name) else {
                continue;
            };
            debug!(event = %name, path = %target.path, "dispatching event");
            match event {
                CustomEvent::ForEachRow => {
                    if let Err(error) = rows::for_each_row(&payload, &mut handler) {
                        return fail(&target, on_error, error);
                    }
                }
                CustomEvent::ViewReady { view, poll } => {
                    // Detached: the poller reports only through the handler.
                    let _poll = ViewPoller::new(context.clone(), transport.clone(), poll)
                        .spawn(view, move |status| handler(status));
                }
                CustomEvent::Custom(dispatcher) => dispatcher(&mut handler, &payload),
            }
        }

        if let Some(handler) = on_success {
            handler(payload);
        }
        Ok(())
    }
}

impl IntoFuture for Request {
    type Output = Result<(), EmpireError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.dispatch())
    }
}

fn fail(
    target: &Target,
    on_error: Option<ErrorHandler>,
    error: RequestError,
) -> Result<(), EmpireError> {
    debug!(
        path = %target.path,
        kind = %error.kind,
        status = ?error.status_code,
        "request failed"
    );
    match on_error {
        Some(handler) => {
            handler(error);
            Ok(())
        }
        None => Err(error.into()),
    }
}

/// Steps 1 through 5 of the dispatch pipeline.
async fn execute(
    context: &ClientContext,
    transport: &dyn Transport,
    target: &Target,
) -> Result<Payload, RequestError> {
    session::ensure_session(context, transport).await?;

    let url = if target.local {
        target.path.clone()
    } else {
        format!("{}{}", context.base_url(), target.path)
    };
    let defaults = vec![
        (
            "Authorization".to_string(),
            format!("Empire sessionkey=\"{}\"", context.session_key()),
        ),
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Accept".to_string(), "*/*".to_string()),
    ];
    let request = HttpRequest {
        method: target.method,
        url,
        headers: merge_headers(defaults, &target.headers),
        body: target
            .body
            .as_ref()
            .map_or_else(|| "{}".to_string(), Value::to_string),
    };

    debug!(method = %request.method, url = %request.url, "issuing request");
    let response = transport.send(request).await?;
    interpret(response, target.raw)
}

/// Turn a transport response into a payload or a normalized error.
fn interpret(response: HttpResponse, raw: bool) -> Result<Payload, RequestError> {
    let status = Some(response.status);
    if !response.is_success() {
        return Err(RequestError::from_response(ErrorKind::Request, status, &response.body));
    }
    if raw {
        return Ok(Payload::Raw(response.body));
    }

    let envelope: Value = serde_json::from_str(&response.body).map_err(|e| {
        RequestError::with_detail(ErrorKind::Json, status, &response.body, e.to_string())
    })?;
    if envelope.get("status").and_then(Value::as_str) == Some("error") {
        return Err(RequestError::from_response(ErrorKind::Request, status, &response.body));
    }
    Ok(Payload::Json(envelope))
}
