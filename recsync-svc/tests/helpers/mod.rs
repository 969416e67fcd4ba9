//! Shared fixtures for recsync-svc integration tests
//!
//! - throwaway SQLite stores
//! - in-memory sources and persisters
//! - a local PostgREST stand-in for the Supabase persister

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use recsync_common::{CallerRequest, CanonicalRecord, RawResult};
use recsync_svc::persist::{PersistError, PersistedRow, Persister};
use recsync_svc::source::{SourceError, SourceReader};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const SAUNA_DDL: &str =
    "CREATE TABLE results (temp REAL, humidity REAL, duration INTEGER)";

pub const SCORING_DDL: &str = "CREATE TABLE results (
    user_id TEXT,
    steps INTEGER,
    heart_rate REAL,
    score REAL,
    recommendation TEXT
)";

/// Create `latest.db` in `dir` with one table and the given rows
pub async fn create_store(dir: &TempDir, ddl: &str, inserts: &[&str]) -> PathBuf {
    let path = dir.path().join("latest.db");
    let url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = sqlx::SqlitePool::connect(&url)
        .await
        .expect("Should create test store");
    sqlx::query(ddl).execute(&pool).await.expect("Should create table");
    for insert in inserts {
        sqlx::query(insert).execute(&pool).await.expect("Should insert row");
    }
    pool.close().await;
    path
}

pub fn caller(user_id: &str) -> CallerRequest {
    CallerRequest::for_user(user_id).expect("Valid caller")
}

// =============================================================================
// Sources
// =============================================================================

/// Returns a fixed outcome and counts calls
pub struct StaticSource {
    outcome: Result<RawResult, SourceError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn ok(raw: impl Into<RawResult>) -> Self {
        Self {
            outcome: Ok(raw.into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: SourceError) -> Self {
        Self {
            outcome: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for StaticSource {
    fn mode(&self) -> &'static str {
        "static"
    }

    async fn read_latest(&self, _request: &CallerRequest) -> Result<RawResult, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone()
    }
}

// =============================================================================
// Persisters
// =============================================================================

/// Appends records to memory, optionally after a delay
#[derive(Default)]
pub struct MemoryPersister {
    rows: Mutex<Vec<Value>>,
    delay: Duration,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn rows(&self) -> Vec<Value> {
        self.rows.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn persist(&self, record: &CanonicalRecord) -> Result<PersistedRow, PersistError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let row = record.to_json();
        self.rows.lock().unwrap().push(row.clone());
        Ok(PersistedRow {
            table: "memory".to_string(),
            row,
        })
    }
}

/// Always rejects the write
pub struct FailingPersister {
    error: PersistError,
    attempts: AtomicUsize,
}

impl FailingPersister {
    pub fn new(error: PersistError) -> Self {
        Self {
            error,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persister for FailingPersister {
    fn backend(&self) -> &'static str {
        "failing"
    }

    async fn persist(&self, _record: &CanonicalRecord) -> Result<PersistedRow, PersistError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

// =============================================================================
// PostgREST stand-in
// =============================================================================

/// One insert as seen by the mock server
#[derive(Debug, Clone)]
pub struct RecordedInsert {
    /// Primary key the server assigned and echoed back
    pub id: usize,
    pub table: String,
    pub query: Option<String>,
    pub apikey: Option<String>,
    pub authorization: Option<String>,
    pub prefer: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    inserts: Arc<Mutex<Vec<RecordedInsert>>>,
    failure: Arc<Mutex<Option<(u16, String)>>>,
}

/// Local HTTP server answering `POST /rest/v1/{table}` like PostgREST
pub struct MockPostgrest {
    pub base_url: String,
    state: MockState,
    task: JoinHandle<()>,
}

impl MockPostgrest {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/rest/v1/:table", post(insert_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Should bind mock server");
        let addr = listener.local_addr().expect("Should have local addr");
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Mock server failed");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            task,
        }
    }

    /// Answer every following insert with this status and body
    pub fn fail_with(&self, status: u16, body: &str) {
        *self.state.failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn inserts(&self) -> Vec<RecordedInsert> {
        self.state.inserts.lock().unwrap().clone()
    }
}

impl Drop for MockPostgrest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server that answers every request with `status` and a body cut short of
/// its declared length
pub async fn start_truncating_server(status: u16) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should bind truncating server");
    let addr = listener.local_addr().expect("Should have local addr");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            // Consume the request so the client is not cut off mid-send
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 {} Error\r\nContent-Type: application/json\r\nContent-Length: 200\r\nConnection: close\r\n\r\n{{\"code\":\"PGRST",
                status
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

fn request_complete(request: &[u8]) -> bool {
    let text = String::from_utf8_lossy(request);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..header_end]
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    request.len() >= header_end + 4 + content_length
}

async fn insert_handler(
    State(state): State<MockState>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let failure = state.failure.lock().unwrap().clone();
    if let Some((status, reply)) = failure {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, [(header::CONTENT_TYPE, "application/json")], reply);
    }

    let id = {
        let mut inserts = state.inserts.lock().unwrap();
        let id = inserts.len() + 1;
        inserts.push(RecordedInsert {
            id,
            table,
            query,
            apikey: header_value("apikey"),
            authorization: header_value("authorization"),
            prefer: header_value("prefer"),
            body: body.clone(),
        });
        id
    };

    let mut echoed = body;
    if let Value::Object(map) = &mut echoed {
        map.insert("id".to_string(), Value::from(id));
    }

    (
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, "application/json")],
        Value::Array(vec![echoed]).to_string(),
    )
}
