//! In-memory mock of the Empire API, served under `/empire`.
//!
//! Implements session creation, service description, connect, insert, NDJSON
//! queries and materialized views closely enough to exercise the client over
//! real HTTP. Views stay `pending` for a configurable number of status polls
//! before they report `ready`.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub app_key: String,
    /// Number of `pending` answers a new view gives before it is ready.
    pub pending_polls: u32,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            app_key: "MOCK_APP_KEY".to_string(),
            pending_polls: 2,
        }
    }
}

#[derive(Debug, Default)]
struct Service {
    connected: bool,
    tables: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug)]
struct View {
    rows: Vec<Value>,
    pending_polls: u32,
    materialized_at: Option<u128>,
}

#[derive(Debug, Default)]
struct Store {
    /// Session key to the end-user it was created for.
    sessions: HashMap<String, Option<String>>,
    services: BTreeMap<String, Service>,
    views: HashMap<String, View>,
}

#[derive(Debug, Clone)]
pub struct MockState {
    config: Arc<MockConfig>,
    store: Arc<RwLock<Store>>,
    session_creates: Arc<AtomicUsize>,
}

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(RwLock::new(seed())),
            session_creates: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// How many sessions have been created so far.
    pub fn session_creates(&self) -> usize {
        self.session_creates.load(Ordering::SeqCst)
    }

    pub async fn has_view(&self, name: &str) -> bool {
        self.store.read().await.views.contains_key(name)
    }

    pub async fn is_connected(&self, service: &str) -> bool {
        self.store
            .read()
            .await
            .services
            .get(service)
            .is_some_and(|s| s.connected)
    }
}

fn seed() -> Store {
    let mut store = Store::default();
    let salesforce = store.services.entry("salesforce".to_string()).or_default();
    salesforce.tables.insert(
        "account".to_string(),
        vec![
            json!({"id": "001", "name": "Acme"}),
            json!({"id": "002", "name": "Globex"}),
            json!({"id": "003", "name": "Initech"}),
        ],
    );
    salesforce
        .tables
        .insert("contact".to_string(), vec![json!({"id": "c1", "email": "ada@acme.test"})]);
    let mailchimp = store.services.entry("mailchimp".to_string()).or_default();
    mailchimp.tables.insert("list".to_string(), Vec::new());
    store
}

/// An error response in the API's envelope format.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// An application-level error reported under HTTP 200.
    fn envelope(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"status": "error", "error": self.message});
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn app(config: MockConfig) -> Router {
    app_with_state(MockState::new(config))
}

pub fn app_with_state(state: MockState) -> Router {
    let api = Router::new()
        .route("/session/create", post(create_session))
        .route("/services", get(list_services))
        .route("/services/{service}", get(describe_service))
        .route("/services/{service}/connect", post(connect_service))
        .route("/services/{service}/{table}", get(describe_table).post(insert_row))
        .route("/query", post(run_query))
        .route("/view/{name}", put(materialize_view).delete(drop_view))
        .route("/view/{name}/status", get(view_status));
    Router::new().nest("/empire", api).with_state(state)
}

pub async fn run(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    run_with_state(listener, MockState::new(config)).await
}

/// Like `run`, for callers that keep a handle on the state to inspect it.
pub async fn run_with_state(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

/// Value of `key="..."` in an `Authorization: Empire key="..."` header.
fn credential<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let rest = value.strip_prefix("Empire ")?;
    rest.strip_prefix(key)?
        .strip_prefix("=\"")?
        .strip_suffix('"')
}

/// Resolve the caller's session, returning its end-user.
async fn authorize(state: &MockState, headers: &HeaderMap) -> ApiResult<Option<String>> {
    let key = credential(headers, "sessionkey")
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing session key"))?;
    state
        .store
        .read()
        .await
        .sessions
        .get(key)
        .cloned()
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Invalid session key"))
}

async fn authorize_enduser(state: &MockState, headers: &HeaderMap) -> ApiResult<String> {
    authorize(state, headers)
        .await?
        .ok_or_else(|| ApiError::envelope("Materialized views require an enduser session"))
}

#[derive(Deserialize)]
struct SessionParams {
    enduser: Option<String>,
}

async fn create_session(
    State(state): State<MockState>,
    Query(params): Query<SessionParams>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if credential(&headers, "appkey") != Some(state.config.app_key.as_str()) {
        return Err(ApiError::envelope("Invalid application key"));
    }
    let key = Uuid::new_v4().to_string();
    state
        .store
        .write()
        .await
        .sessions
        .insert(key.clone(), params.enduser);
    state.session_creates.fetch_add(1, Ordering::SeqCst);
    debug!(session = %key, "session created");
    Ok(Json(json!({"status": "OK", "sessionkey": key})))
}

async fn list_services(State(state): State<MockState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    authorize(&state, &headers).await?;
    let store = state.store.read().await;
    let services: Vec<Value> = store
        .services
        .iter()
        .map(|(name, s)| json!({"service": name, "connected": s.connected}))
        .collect();
    Ok(Json(json!({"status": "OK", "services": services})))
}

async fn describe_service(
    State(state): State<MockState>,
    Path(service): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers).await?;
    let store = state.store.read().await;
    let entry = store
        .services
        .get(&service)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown service {service}")))?;
    let tables: Vec<Value> = entry.tables.keys().map(|t| json!({"table": t})).collect();
    Ok(Json(json!({
        "status": "OK",
        "service": {"name": service, "connected": entry.connected, "tables": tables}
    })))
}

async fn describe_table(
    State(state): State<MockState>,
    Path((service, table)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers).await?;
    let store = state.store.read().await;
    let rows = store
        .services
        .get(&service)
        .and_then(|s| s.tables.get(&table))
        .ok_or_else(|| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Unknown table {service}.{table}"))
        })?;
    Ok(Json(json!({
        "status": "OK",
        "table": {"name": table, "service": service, "rows": rows.len()}
    })))
}

async fn connect_service(
    State(state): State<MockState>,
    Path(service): Path<String>,
    headers: HeaderMap,
    Json(secrets): Json<Value>,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers).await?;
    if secrets.as_object().map_or(true, |o| o.is_empty()) {
        return Err(ApiError::envelope(format!("No credentials given for {service}")));
    }
    let mut store = state.store.write().await;
    let entry = store
        .services
        .get_mut(&service)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown service {service}")))?;
    entry.connected = true;
    Ok(Json(json!({"status": "OK"})))
}

async fn insert_row(
    State(state): State<MockState>,
    Path((service, table)): Path<(String, String)>,
    headers: HeaderMap,
    Json(row): Json<Value>,
) -> ApiResult<Json<Value>> {
    authorize(&state, &headers).await?;
    let mut store = state.store.write().await;
    let rows = store
        .services
        .get_mut(&service)
        .and_then(|s| s.tables.get_mut(&table))
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown table {service}.{table}")))?;
    rows.push(row);
    Ok(Json(json!({"status": "OK"})))
}

#[derive(Deserialize)]
struct QueryBody {
    query: String,
}

/// Source and row limit of a `SELECT ... FROM source [LIMIT n]` query.
fn parse_query(sql: &str) -> Option<(String, Option<usize>)> {
    let words: Vec<&str> = sql.split_whitespace().collect();
    let from = words.iter().position(|w| w.eq_ignore_ascii_case("from"))?;
    let source = words.get(from + 1)?.trim_end_matches(';').to_string();
    let limit = words
        .iter()
        .position(|w| w.eq_ignore_ascii_case("limit"))
        .and_then(|i| words.get(i + 1))
        .and_then(|n| n.trim_end_matches(';').parse().ok());
    Some((source, limit))
}

fn resolve_rows(store: &Store, sql: &str) -> ApiResult<Vec<Value>> {
    let (source, limit) = parse_query(sql)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("Cannot parse query: {sql}")))?;
    let rows = match source.split_once('.') {
        Some((service, table)) => store.services.get(service).and_then(|s| s.tables.get(table)),
        None => store.views.get(&source).map(|v| &v.rows),
    }
    .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, format!("Unknown table {source}")))?;
    Ok(rows.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect())
}

async fn run_query(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> ApiResult<Response> {
    authorize(&state, &headers).await?;
    let store = state.store.read().await;
    let rows = resolve_rows(&store, &body.query)?;
    let ndjson: String = rows.iter().map(|row| format!("{row}\n")).collect();
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], ndjson).into_response())
}

async fn materialize_view(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<QueryBody>,
) -> ApiResult<Json<Value>> {
    authorize_enduser(&state, &headers).await?;
    let mut store = state.store.write().await;
    let rows = resolve_rows(&store, &body.query)?;
    let view = View {
        rows,
        pending_polls: state.config.pending_polls,
        materialized_at: None,
    };
    store.views.insert(name, view);
    Ok(Json(json!({"status": "OK"})))
}

async fn view_status(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize_enduser(&state, &headers).await?;
    let mut store = state.store.write().await;
    let view = store
        .views
        .get_mut(&name)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown view {name}")))?;
    if view.pending_polls > 0 {
        view.pending_polls -= 1;
        return Ok(Json(json!({"status": "OK", "viewStatus": "pending"})));
    }
    let at = *view.materialized_at.get_or_insert_with(now_millis);
    Ok(Json(json!({"status": "OK", "viewStatus": "ready", "materializedAt": at as u64})))
}

async fn drop_view(
    State(state): State<MockState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    authorize_enduser(&state, &headers).await?;
    state
        .store
        .write()
        .await
        .views
        .remove(&name)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Unknown view {name}")))?;
    Ok(Json(json!({"status": "OK"})))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
