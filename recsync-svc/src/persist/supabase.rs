//! Supabase (PostgREST) persister
//!
//! Inserts one row with `POST {url}/rest/v1/{table}`. The HTTP client is
//! built once and shared; each insert is an independent request.

use async_trait::async_trait;
use recsync_common::config::is_valid_identifier;
use recsync_common::{CanonicalRecord, Error};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PersistError, PersistMode, PersistedRow, Persister};

const USER_AGENT: &str = concat!("recsync/", env!("CARGO_PKG_VERSION"));

/// PostgREST / Postgres error codes meaning "the table does not fit the record"
///
/// - PGRST204: column not found in schema cache
/// - PGRST205: table not found in schema cache
/// - 42703: undefined column
/// - 42P01: undefined table
/// - 22P02: invalid text representation
/// - 42804: datatype mismatch
/// - 23502: not-null violation
const SCHEMA_ERROR_CODES: &[&str] = &["PGRST204", "PGRST205", "42703", "42P01", "22P02", "42804", "23502"];

/// Supabase REST client for one table
pub struct SupabasePersister {
    http_client: reqwest::Client,
    endpoint: String,
    service_key: String,
    table: String,
    mode: PersistMode,
}

impl SupabasePersister {
    pub fn new(
        base_url: &str,
        service_key: impl Into<String>,
        table: &str,
        mode: PersistMode,
        timeout: Duration,
    ) -> recsync_common::Result<Self> {
        if !is_valid_identifier(table) {
            return Err(Error::Config(format!("Invalid remote table name: {}", table)));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/rest/v1/{}", base_url.trim_end_matches('/'), table),
            service_key: service_key.into(),
            table: table.to_string(),
            mode,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn prefer_header(&self) -> &'static str {
        match self.mode {
            PersistMode::Append => "return=representation",
            PersistMode::UpsertByUser => "return=representation,resolution=merge-duplicates",
        }
    }
}

#[async_trait]
impl Persister for SupabasePersister {
    fn backend(&self) -> &'static str {
        "supabase"
    }

    async fn persist(&self, record: &CanonicalRecord) -> Result<PersistedRow, PersistError> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", self.prefer_header())
            .json(record);

        if self.mode == PersistMode::UpsertByUser {
            request = request.query(&[("on_conflict", "user_id")]);
        }

        debug!(endpoint = %self.endpoint, mode = ?self.mode, "Inserting record");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PersistError::WriteFailed(format!("Request timed out: {}", e))
            } else {
                PersistError::WriteFailed(format!("Network error: {}", e))
            }
        })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if !status.is_success() => {
                return Err(PersistError::WriteFailed(format!(
                    "HTTP {}: failed to read error body: {}",
                    status.as_u16(),
                    e
                )));
            }
            Err(e) => {
                // The insert succeeded; only the echoed representation is lost
                warn!(table = %self.table, "Failed to read insert response: {}", e);
                String::new()
            }
        };

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }

        let row = echoed_row(&body).unwrap_or_else(|| record.to_json());

        info!(
            table = %self.table,
            user_id = %record.user_id().unwrap_or("<none>"),
            status = status.as_u16(),
            "Record persisted"
        );

        Ok(PersistedRow {
            table: self.table.clone(),
            row,
        })
    }
}

/// First row of a `return=representation` body
fn echoed_row(body: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Array(rows) => rows.into_iter().next(),
        obj @ Value::Object(_) => Some(obj),
        _ => None,
    }
}

/// Map a non-2xx response to a persist error
pub fn classify_failure(status: u16, body: &str) -> PersistError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str);
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_else(|| body.trim());

    match code {
        Some(code) if (400..500).contains(&status) && SCHEMA_ERROR_CODES.contains(&code) => {
            PersistError::SchemaMismatch(format!("HTTP {} ({}): {}", status, code, message))
        }
        Some(code) => PersistError::WriteFailed(format!("HTTP {} ({}): {}", status, code, message)),
        None => PersistError::WriteFailed(format!("HTTP {}: {}", status, message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let persister = SupabasePersister::new(
            "https://example.supabase.co/",
            "key",
            "recommendations",
            PersistMode::Append,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            persister.endpoint(),
            "https://example.supabase.co/rest/v1/recommendations"
        );
    }

    #[test]
    fn test_rejects_unsafe_table() {
        assert!(SupabasePersister::new(
            "https://example.supabase.co",
            "key",
            "recs?select=*",
            PersistMode::Append,
            Duration::from_secs(5),
        )
        .is_err());
    }

    #[test]
    fn test_schema_codes_are_schema_mismatch() {
        let body = r#"{"code":"PGRST204","message":"Could not find the 'temp' column"}"#;
        assert!(matches!(classify_failure(400, body), PersistError::SchemaMismatch(_)));

        let body = r#"{"code":"22P02","message":"invalid input syntax for type integer"}"#;
        assert!(matches!(classify_failure(400, body), PersistError::SchemaMismatch(_)));
    }

    #[test]
    fn test_auth_and_server_errors_are_write_failed() {
        let body = r#"{"code":"42501","message":"permission denied"}"#;
        assert!(matches!(classify_failure(401, body), PersistError::WriteFailed(_)));
        assert!(matches!(classify_failure(503, "upstream down"), PersistError::WriteFailed(_)));
        // Schema code on a 5xx is a remote-side failure, not a shape problem
        let body = r#"{"code":"42703","message":"column missing"}"#;
        assert!(matches!(classify_failure(500, body), PersistError::WriteFailed(_)));
    }

    #[test]
    fn test_failure_message_carries_status() {
        match classify_failure(503, "upstream down") {
            PersistError::WriteFailed(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("upstream down"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_echoed_row() {
        assert_eq!(
            echoed_row(r#"[{"id":1,"user_id":"a"}]"#),
            Some(serde_json::json!({"id": 1, "user_id": "a"}))
        );
        assert_eq!(echoed_row(""), None);
        assert_eq!(echoed_row("[]"), None);
    }
}
