//! The transport boundary: one HTTP call in, one response out.
//!
//! # Design
//! The engine depends only on `Transport::send`. A transport reports any HTTP
//! status as data (`HttpResponse`) and reserves `Err` for calls that produced
//! no response at all, or whose body is not UTF-8 text (kind `Json`, with the
//! received status). It never retries and has no timeout policy of its own.

use async_trait::async_trait;

use crate::error::{ErrorKind, RequestError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Performs a single HTTP call.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError>;
}

/// `Transport` backed by a blocking `ureq` agent.
///
/// Status codes are never turned into errors by the agent; the engine does
/// its own status interpretation. Each call runs on tokio's blocking pool so
/// the runtime threads are never parked on socket I/O.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for UreqTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || send_blocking(&agent, request))
            .await
            .map_err(|e| RequestError::transport(format!("transport task failed: {e}")))?
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send_blocking(agent: &ureq::Agent, request: HttpRequest) -> Result<HttpResponse, RequestError> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
    } = request;

    // Every method carries the JSON body, GET and DELETE included.
    let sent = match method {
        HttpMethod::Get => with_headers(agent.get(&url), &headers)
            .force_send_body()
            .send(body.as_bytes()),
        HttpMethod::Delete => with_headers(agent.delete(&url), &headers)
            .force_send_body()
            .send(body.as_bytes()),
        HttpMethod::Post => with_headers(agent.post(&url), &headers).send(body.as_bytes()),
        HttpMethod::Put => with_headers(agent.put(&url), &headers).send(body.as_bytes()),
    };
    let mut response = sent.map_err(|e| RequestError::transport(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    // Query results are unbounded; only the server decides where they end.
    let bytes = response
        .body_mut()
        .with_config()
        .limit(u64::MAX)
        .read_to_vec()
        .map_err(|e| RequestError::transport(e.to_string()))?;
    let body = match String::from_utf8(bytes) {
        Ok(text) => text,
        // A failed status is reported as such whatever its body looks like.
        Err(e) if !(200..300).contains(&status) => {
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
        Err(e) => {
            let text = String::from_utf8_lossy(e.as_bytes()).into_owned();
            return Err(RequestError::with_detail(
                ErrorKind::Json,
                Some(status),
                &text,
                e.utf8_error().to_string(),
            ));
        }
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

/// In-memory transport for unit tests: answers from a queue of canned
/// responses and records every request it was asked to send.
#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::Transport;
    use crate::error::RequestError;
    use crate::http::{HttpRequest, HttpResponse};

    type Route = (String, VecDeque<Result<HttpResponse, RequestError>>);

    #[derive(Debug, Default, Clone)]
    pub(crate) struct ScriptedTransport {
        routes: Arc<Mutex<Vec<Route>>>,
        sent: Arc<Mutex<Vec<HttpRequest>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Queue a response for the first request whose URL ends with `suffix`.
        /// The last queued response for a route is repeated once the queue
        /// would otherwise run dry.
        pub(crate) fn respond(&self, suffix: &str, status: u16, body: &str) -> &Self {
            self.push(suffix, Ok(HttpResponse::new(status, body)))
        }

        pub(crate) fn fail(&self, suffix: &str, detail: &str) -> &Self {
            self.push(suffix, Err(RequestError::transport(detail)))
        }

        fn push(&self, suffix: &str, reply: Result<HttpResponse, RequestError>) -> &Self {
            let mut routes = self.routes.lock();
            match routes.iter_mut().find(|(s, _)| s == suffix) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((suffix.to_string(), VecDeque::from([reply]))),
            }
            self
        }

        pub(crate) fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().clone()
        }

        pub(crate) fn count(&self, suffix: &str) -> usize {
            self.sent
                .lock()
                .iter()
                .filter(|r| strip_query(&r.url).ends_with(suffix))
                .count()
        }
    }

    fn strip_query(url: &str) -> &str {
        url.split('?').next().unwrap_or(url)
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
            let path = strip_query(&request.url).to_string();
            self.sent.lock().push(request);
            let mut routes = self.routes.lock();
            let (_, queue) = routes
                .iter_mut()
                .find(|(suffix, _)| path.ends_with(suffix.as_str()))
                .unwrap_or_else(|| panic!("no scripted response for {path}"));
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        }
    }
}
