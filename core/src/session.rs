//! Lazy session bootstrap.
//!
//! A session credential is requested from `session/create` the first time a
//! request needs one and then reused. Bootstraps are not de-duplicated: two
//! requests racing on a client without a session each issue their own
//! `session/create`, and the last credential written wins. The server treats
//! session creation as idempotent, so both credentials are valid.

use serde_json::Value;
use tracing::debug;

use crate::context::ClientContext;
use crate::error::{ErrorKind, RequestError};
use crate::http::{HttpMethod, HttpRequest};
use crate::transport::Transport;

/// Make sure `context` holds a session credential, creating one if needed.
///
/// Returns immediately without touching the transport when a credential is
/// already present.
pub async fn ensure_session(
    context: &ClientContext,
    transport: &dyn Transport,
) -> Result<(), RequestError> {
    if context.has_session() {
        return Ok(());
    }

    let request = bootstrap_request(context);
    debug!(url = %request.url, "creating session");
    let response = transport.send(request).await?;

    if !response.is_success() {
        return Err(RequestError::from_response(
            ErrorKind::Request,
            Some(response.status),
            &response.body,
        ));
    }

    let envelope: Value = serde_json::from_str(&response.body).map_err(|e| {
        RequestError::with_detail(ErrorKind::Json, Some(response.status), &response.body, e.to_string())
    })?;

    match envelope.get("sessionkey").and_then(Value::as_str) {
        Some(key) if !key.is_empty() => {
            context.set_session_key(key);
            debug!("session established");
            Ok(())
        }
        // Either an explicit `status: "error"` envelope or a body without a
        // credential; both leave the client unauthenticated.
        _ => Err(RequestError::from_response(
            ErrorKind::Request,
            Some(response.status),
            &response.body,
        )),
    }
}

fn bootstrap_request(context: &ClientContext) -> HttpRequest {
    let mut url = format!("{}session/create", context.base_url());
    if let Some(enduser) = context.enduser() {
        url.push_str("?enduser=");
        url.push_str(&urlencoding::encode(enduser));
    }
    HttpRequest {
        method: HttpMethod::Post,
        url,
        headers: vec![
            (
                "Authorization".to_string(),
                format!("Empire appkey=\"{}\"", context.app_key()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body: "{}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::scripted::ScriptedTransport;

    fn context(enduser: Option<&str>) -> ClientContext {
        let mut config = ClientConfig::default().api_server("localhost:3000");
        config.enduser = enduser.map(str::to_string);
        ClientContext::new("APPKEY", &config)
    }

    #[tokio::test]
    async fn existing_session_skips_network() {
        let ctx = context(None);
        ctx.set_session_key("EXISTING");
        let transport = ScriptedTransport::new();

        ensure_session(&ctx, &transport).await.unwrap();

        assert!(transport.sent().is_empty());
        assert_eq!(ctx.session_key(), "EXISTING");
    }

    #[tokio::test]
    async fn bootstrap_stores_session_key() {
        let ctx = context(Some("end user"));
        let transport = ScriptedTransport::new();
        transport.respond("session/create", 200, r#"{"status":"OK","sessionkey":"S1"}"#);

        ensure_session(&ctx, &transport).await.unwrap();

        assert_eq!(ctx.session_key(), "S1");
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Post);
        assert_eq!(
            sent[0].url,
            "http://localhost:3000/empire/session/create?enduser=end%20user"
        );
        assert_eq!(sent[0].header("authorization"), Some("Empire appkey=\"APPKEY\""));
        assert_eq!(sent[0].body, "{}");

        ensure_session(&ctx, &transport).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn error_envelope_is_request_error_with_status_200() {
        let ctx = context(None);
        let transport = ScriptedTransport::new();
        transport.respond("session/create", 200, r#"{"status":"error","error":"bad app key"}"#);

        let err = ensure_session(&ctx, &transport).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Request);
        assert_eq!(err.status_code, Some(200));
        assert_eq!(err.body, "bad app key");
        assert!(!ctx.has_session());
    }

    #[tokio::test]
    async fn http_failure_carries_status_and_body() {
        let ctx = context(None);
        let transport = ScriptedTransport::new();
        transport.respond("session/create", 401, r#"{"error":"unauthorized"}"#);

        let err = ensure_session(&ctx, &transport).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Request);
        assert_eq!(err.status_code, Some(401));
        assert_eq!(err.body, "unauthorized");
        assert_eq!(err.response, r#"{"error":"unauthorized"}"#);
    }

    #[tokio::test]
    async fn reset_forces_new_bootstrap() {
        let ctx = context(None);
        let transport = ScriptedTransport::new();
        transport
            .respond("session/create", 200, r#"{"sessionkey":"S1"}"#)
            .respond("session/create", 200, r#"{"sessionkey":"S2"}"#);

        ensure_session(&ctx, &transport).await.unwrap();
        ctx.reset_session();
        ensure_session(&ctx, &transport).await.unwrap();

        assert_eq!(ctx.session_key(), "S2");
        assert_eq!(transport.count("session/create"), 2);
    }
}
