//! Raw result normalization
//!
//! Turns whatever the producer emitted into a [`CanonicalRecord`] for the
//! deployment's [`SchemaVersion`]. Normalization is total: it never fails and
//! never panics.
//!
//! Per field, precedence is raw value → caller value → null. A raw value that
//! cannot be coerced into the field's kind counts as absent. Keys outside the
//! registry are ignored and never reach the record.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use recsync_common::record::{Fallback, FieldKind, FieldSpec, SchemaVersion};
use recsync_common::{CallerRequest, CanonicalRecord, RawResult};
use serde_json::{Number, Value};
use tracing::warn;

const SCALAR_TARGET: &str = "recommendation";

/// Largest magnitude below which every integral f64 is exact (2^53)
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// What normalization did besides building the record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    /// Raw keys not in the registry (sorted)
    pub ignored_keys: Vec<String>,
    /// Registry fields whose raw value had the wrong shape
    pub rejected_fields: Vec<&'static str>,
    /// A scalar result had no field to land in
    pub dropped_scalar: bool,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        self.ignored_keys.is_empty() && self.rejected_fields.is_empty() && !self.dropped_scalar
    }
}

/// Registry-driven normalizer
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    schema: SchemaVersion,
}

impl Normalizer {
    pub fn new(schema: SchemaVersion) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> SchemaVersion {
        self.schema
    }

    /// Normalize and log anything that was dropped
    pub fn normalize(&self, raw: RawResult, fallback: &CallerRequest) -> CanonicalRecord {
        let (record, report) = self.normalize_detailed(raw, fallback);
        if !report.ignored_keys.is_empty() {
            warn!(
                schema = %self.schema,
                keys = ?report.ignored_keys,
                "Ignoring producer keys outside the canonical schema"
            );
        }
        if !report.rejected_fields.is_empty() {
            warn!(
                schema = %self.schema,
                fields = ?report.rejected_fields,
                "Producer values had the wrong type; used caller value or null"
            );
        }
        if report.dropped_scalar {
            warn!(schema = %self.schema, "Scalar producer result dropped: schema has no recommendation field");
        }
        record
    }

    /// Normalize without logging, returning what was ignored or rejected
    pub fn normalize_detailed(
        &self,
        raw: RawResult,
        fallback: &CallerRequest,
    ) -> (CanonicalRecord, NormalizeReport) {
        let mut report = NormalizeReport::default();
        let mut record = CanonicalRecord::empty(self.schema);

        match raw {
            RawResult::Scalar(value) => {
                for spec in self.schema.fields() {
                    if let Some(v) = fallback.fallback_value(spec.fallback) {
                        record.set(spec.name, v);
                    }
                }
                match self.schema.field(SCALAR_TARGET) {
                    Some(_) => {
                        record.set(SCALAR_TARGET, scalar_string_form(value));
                    }
                    None => report.dropped_scalar = true,
                }
            }
            RawResult::Mapping(mut map) => {
                for spec in self.schema.fields() {
                    let from_raw = match map.remove(spec.name) {
                        None | Some(Value::Null) => None,
                        Some(value) => {
                            let coerced = coerce(spec, value);
                            if coerced.is_none() {
                                report.rejected_fields.push(spec.name);
                            }
                            coerced
                        }
                    };
                    let value = from_raw
                        .or_else(|| fallback.fallback_value(spec.fallback))
                        .unwrap_or(Value::Null);
                    record.set(spec.name, value);
                }
                let mut ignored: Vec<String> = map.into_iter().map(|(k, _)| k).collect();
                ignored.sort();
                report.ignored_keys = ignored;
            }
        }

        (record, report)
    }
}

/// String form of a non-mapping result
fn scalar_string_form(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s),
        Value::Bool(b) => Value::String(b.to_string()),
        Value::Number(n) => Value::String(n.to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Coerce a present, non-null raw value into the field's kind
fn coerce(spec: &FieldSpec, value: Value) -> Option<Value> {
    match spec.kind {
        FieldKind::Text => match value {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(Value::String(s)),
            Value::Number(n) => Some(Value::String(n.to_string())),
            // A bool is never an identity
            Value::Bool(_) if spec.fallback == Fallback::UserId => None,
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldKind::Integer => match value {
            Value::Number(n) => integer_from_number(&n).map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldKind::Real => match value {
            Value::Number(n) => Some(narrow_real(n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(narrow_real),
            _ => None,
        },
        FieldKind::Timestamp => match value {
            Value::String(s) => parse_timestamp(&s).map(Value::String),
            Value::Number(n) => n
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))),
            _ => None,
        },
        FieldKind::Json => Some(value),
    }
}

fn integer_from_number(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Integral floats become integers so `80.0` read from a REAL column is `80`
fn narrow_real(n: Number) -> Value {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
            Value::from(f as i64)
        }
        _ => Value::Number(n),
    }
}

/// RFC 3339, or SQLite `CURRENT_TIMESTAMP` text taken as UTC
fn parse_timestamp(s: &str) -> Option<String> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| {
            Utc.from_utc_datetime(&naive)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true)
        })
}
