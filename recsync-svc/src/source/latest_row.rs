//! Latest-row reader over a local SQLite store
//!
//! The store is append-only from the producer side and read-only from here.
//! Each read opens a fresh read-only connection and closes it before
//! returning, so a store file replaced between requests is always picked up.

use async_trait::async_trait;
use recsync_common::config::is_valid_identifier;
use recsync_common::record::{FieldKind, SchemaVersion};
use recsync_common::{CallerRequest, Error, RawResult};
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{ConnectOptions, Connection, Row, TypeInfo, ValueRef};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{SourceError, SourceReader};

// SQLite primary result codes (extended code & 0xff)
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

/// Reads the newest row of `table`, ordered by `order_column`
#[derive(Debug, Clone)]
pub struct LatestRowSource {
    path: PathBuf,
    table: String,
    query: String,
    columns: Vec<(&'static str, FieldKind)>,
}

impl LatestRowSource {
    /// Build a reader for the local columns of `schema`
    ///
    /// Table and column names are interpolated into SQL, so both must be
    /// plain identifiers.
    pub fn new(
        path: impl Into<PathBuf>,
        table: &str,
        order_column: &str,
        schema: SchemaVersion,
    ) -> recsync_common::Result<Self> {
        if !is_valid_identifier(table) {
            return Err(Error::Config(format!("Invalid table name: {}", table)));
        }
        if !is_valid_identifier(order_column) {
            return Err(Error::Config(format!("Invalid order column: {}", order_column)));
        }

        let columns: Vec<_> = schema.local_fields().map(|f| (f.name, f.kind)).collect();
        let column_list = columns
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {} FROM {} ORDER BY {} DESC LIMIT 1",
            column_list, table, order_column
        );

        Ok(Self {
            path: path.into(),
            table: table.to_string(),
            query,
            columns,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The single-row query this reader runs
    pub fn query(&self) -> &str {
        &self.query
    }

    fn classify(&self, err: sqlx::Error) -> SourceError {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                let primary = db
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| c & 0xff);

                if message.contains("no such table") {
                    SourceError::Empty(format!("Table '{}' does not exist", self.table))
                } else if message.contains("no such column") {
                    SourceError::Corrupt(message)
                } else {
                    match primary {
                        Some(SQLITE_CORRUPT) | Some(SQLITE_NOTADB) => SourceError::Corrupt(message),
                        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) | Some(SQLITE_CANTOPEN) => {
                            SourceError::Unavailable(message)
                        }
                        _ if message.contains("not a database") || message.contains("malformed") => {
                            SourceError::Corrupt(message)
                        }
                        _ => SourceError::Unavailable(message),
                    }
                }
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. } => SourceError::Corrupt(err.to_string()),
            _ => SourceError::Unavailable(err.to_string()),
        }
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<RawResult, SourceError> {
        let mut map = Map::with_capacity(self.columns.len());
        for (idx, (name, kind)) in self.columns.iter().enumerate() {
            let value = decode_cell(row, idx, name, *kind)?;
            map.insert((*name).to_string(), value);
        }
        Ok(RawResult::Mapping(map))
    }
}

#[async_trait]
impl SourceReader for LatestRowSource {
    fn mode(&self) -> &'static str {
        "latest_row"
    }

    async fn read_latest(&self, _request: &CallerRequest) -> Result<RawResult, SourceError> {
        if !self.path.exists() {
            return Err(SourceError::Unavailable(format!(
                "Database not found: {}",
                self.path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(true)
            .disable_statement_logging();

        let mut conn = options.connect().await.map_err(|e| self.classify(e))?;

        let fetched = sqlx::query(&self.query).fetch_optional(&mut conn).await;

        if let Err(e) = conn.close().await {
            warn!(path = %self.path.display(), "Failed to close local store connection: {}", e);
        }

        let row = fetched.map_err(|e| self.classify(e))?.ok_or_else(|| {
            SourceError::Empty(format!("No rows in table '{}'", self.table))
        })?;

        let raw = self.decode_row(&row)?;
        debug!(path = %self.path.display(), table = %self.table, "Read latest row");
        Ok(raw)
    }
}

/// SQLite storage class of a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageClass {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

fn storage_class(type_name: &str) -> Option<StorageClass> {
    match type_name.to_ascii_uppercase().as_str() {
        "NULL" => Some(StorageClass::Null),
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "BOOLEAN" => Some(StorageClass::Integer),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Some(StorageClass::Real),
        "TEXT" | "DATETIME" | "DATE" | "TIME" => Some(StorageClass::Text),
        "BLOB" => Some(StorageClass::Blob),
        _ => None,
    }
}

/// Decode one cell by the storage class of its value (not the declared type)
fn decode_cell(row: &SqliteRow, idx: usize, name: &str, kind: FieldKind) -> Result<Value, SourceError> {
    let class = {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| SourceError::Corrupt(format!("Column '{}': {}", name, e)))?;
        if raw.is_null() {
            StorageClass::Null
        } else {
            let type_info = raw.type_info();
            storage_class(type_info.name()).ok_or_else(|| {
                SourceError::Corrupt(format!(
                    "Column '{}' has unsupported type {}",
                    name,
                    type_info.name()
                ))
            })?
        }
    };

    let corrupt = |e: sqlx::Error| SourceError::Corrupt(format!("Column '{}': {}", name, e));

    match class {
        StorageClass::Null => Ok(Value::Null),
        StorageClass::Integer => {
            let v: i64 = row.try_get_unchecked(idx).map_err(corrupt)?;
            Ok(Value::from(v))
        }
        StorageClass::Real => {
            let v: f64 = row.try_get_unchecked(idx).map_err(corrupt)?;
            Number::from_f64(v)
                .map(Value::Number)
                .ok_or_else(|| SourceError::Corrupt(format!("Column '{}' is not finite", name)))
        }
        StorageClass::Text => {
            let text: String = row.try_get_unchecked(idx).map_err(corrupt)?;
            if kind == FieldKind::Json {
                serde_json::from_str(&text).map_err(|e| {
                    SourceError::Corrupt(format!("Column '{}' is not valid JSON: {}", name, e))
                })
            } else {
                Ok(Value::String(text))
            }
        }
        StorageClass::Blob => Err(SourceError::Corrupt(format!(
            "Column '{}' holds a BLOB",
            name
        ))),
    }
}
