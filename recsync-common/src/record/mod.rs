//! Recommendation record model
//!
//! - [`RawResult`]: producer output, shape not stable across versions
//! - [`CanonicalRecord`]: fixed-schema record that is persisted and returned
//! - [`CallerRequest`]: validated caller identity and optional sensor inputs

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub mod registry;
pub use registry::{Fallback, FieldKind, FieldSpec, SchemaVersion};

/// Longest accepted caller identifier
pub const MAX_USER_ID_LEN: usize = 256;

/// Unvalidated producer output
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// Keyed record (key set varies by producer version)
    Mapping(Map<String, Value>),
    /// Anything that is not a keyed record
    Scalar(Value),
}

impl From<Value> for RawResult {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawResult::Mapping(map),
            other => RawResult::Scalar(other),
        }
    }
}

/// Validated caller input, immutable for one pipeline run
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CallerRequest {
    user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heart_rate: Option<f64>,
}

impl CallerRequest {
    /// Validate caller fields
    ///
    /// Rejects a blank or oversized `user_id`, negative `steps`, and a
    /// `heart_rate` that is not a positive finite number.
    pub fn new(user_id: impl Into<String>, steps: Option<i64>, heart_rate: Option<f64>) -> Result<Self> {
        let user_id = user_id.into();
        if user_id.trim().is_empty() {
            return Err(Error::InvalidInput("user_id must not be empty".to_string()));
        }
        if user_id.chars().count() > MAX_USER_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "user_id exceeds {} characters",
                MAX_USER_ID_LEN
            )));
        }
        if let Some(steps) = steps {
            if steps < 0 {
                return Err(Error::InvalidInput(format!(
                    "steps must be non-negative, got {}",
                    steps
                )));
            }
        }
        if let Some(rate) = heart_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "heart_rate must be a positive number, got {}",
                    rate
                )));
            }
        }

        Ok(Self {
            user_id,
            steps,
            heart_rate,
        })
    }

    /// Identity-only request (later schema versions need nothing else)
    pub fn for_user(user_id: impl Into<String>) -> Result<Self> {
        Self::new(user_id, None, None)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn steps(&self) -> Option<i64> {
        self.steps
    }

    pub fn heart_rate(&self) -> Option<f64> {
        self.heart_rate
    }

    /// Caller value backing a field, or `None` if the caller has nothing for it
    pub fn fallback_value(&self, fallback: Fallback) -> Option<Value> {
        match fallback {
            Fallback::None => None,
            Fallback::UserId => Some(Value::String(self.user_id.clone())),
            Fallback::Steps => self.steps.map(Value::from),
            Fallback::HeartRate => self
                .heart_rate
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
        }
    }
}

/// Fully populated record in registry order
///
/// Every registry field has a slot; an absent value is `Value::Null`, so
/// serialization never drops a key.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    schema: SchemaVersion,
    values: Vec<Value>,
}

impl CanonicalRecord {
    /// All fields null
    pub fn empty(schema: SchemaVersion) -> Self {
        Self {
            schema,
            values: vec![Value::Null; schema.fields().len()],
        }
    }

    pub fn schema(&self) -> SchemaVersion {
        self.schema
    }

    /// Set a registry field; returns false for names outside the registry
    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|idx| &self.values[idx])
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get("user_id").and_then(Value::as_str)
    }

    /// (field, value) pairs in registry order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name)
            .zip(self.values.iter())
    }

    /// Flat JSON object (key order is not preserved by `serde_json::Map`)
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.values.len());
        for (name, value) in self.iter() {
            map.insert(name.to_string(), value.clone());
        }
        Value::Object(map)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.schema.fields().iter().position(|f| f.name == name)
    }
}

impl Serialize for CanonicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caller_request_validation() {
        assert!(CallerRequest::new("alice", Some(0), Some(61.5)).is_ok());
        assert!(CallerRequest::new("   ", None, None).is_err());
        assert!(CallerRequest::new("", None, None).is_err());
        assert!(CallerRequest::new("alice", Some(-1), None).is_err());
        assert!(CallerRequest::new("alice", None, Some(0.0)).is_err());
        assert!(CallerRequest::new("alice", None, Some(f64::NAN)).is_err());
        assert!(CallerRequest::new("x".repeat(MAX_USER_ID_LEN + 1), None, None).is_err());
    }

    #[test]
    fn test_fallback_values() {
        let req = CallerRequest::new("u1", Some(0), None).unwrap();
        assert_eq!(req.fallback_value(Fallback::UserId), Some(json!("u1")));
        assert_eq!(req.fallback_value(Fallback::Steps), Some(json!(0)));
        assert_eq!(req.fallback_value(Fallback::HeartRate), None);
        assert_eq!(req.fallback_value(Fallback::None), None);
    }

    #[test]
    fn test_empty_record_has_every_key() {
        let record = CanonicalRecord::empty(SchemaVersion::Scoring);
        let json = serde_json::to_value(&record).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        assert!(obj.values().all(Value::is_null));
    }

    #[test]
    fn test_set_rejects_unknown_field() {
        let mut record = CanonicalRecord::empty(SchemaVersion::Sauna);
        assert!(record.set("temp", json!(80)));
        assert!(!record.set("score", json!(1)));
        assert_eq!(record.get("temp"), Some(&json!(80)));
        assert_eq!(record.get("score"), None);
    }

    #[test]
    fn test_serialize_in_registry_order() {
        let mut record = CanonicalRecord::empty(SchemaVersion::Sauna);
        record.set("user_id", json!("alice"));
        record.set("duration", json!(20));
        let text = serde_json::to_string(&record).unwrap();
        assert_eq!(
            text,
            r#"{"user_id":"alice","temp":null,"humidity":null,"duration":20}"#
        );
    }

    #[test]
    fn test_raw_result_from_value() {
        assert!(matches!(RawResult::from(json!({"a": 1})), RawResult::Mapping(_)));
        assert!(matches!(RawResult::from(json!("text")), RawResult::Scalar(_)));
        assert!(matches!(RawResult::from(Value::Null), RawResult::Scalar(Value::Null)));
    }
}
