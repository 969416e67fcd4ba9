//! Canonical field registry
//!
//! Each deployment runs exactly one [`SchemaVersion`]. A version owns a fixed,
//! ordered field table; adding a field means adding a version (or editing a
//! table), never passing producer keys through.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Value shape a canonical field is coerced into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 string
    Text,
    /// Signed 64-bit integer
    Integer,
    /// JSON number (integers stay integers)
    Real,
    /// RFC 3339 UTC timestamp string
    Timestamp,
    /// Arbitrary JSON document
    Json,
}

/// Caller-supplied value a field may fall back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    None,
    UserId,
    Steps,
    HeartRate,
}

/// One registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical key (also the local column and remote column name)
    pub name: &'static str,
    pub kind: FieldKind,
    pub fallback: Fallback,
    /// Whether the local store table carries this column
    pub local: bool,
}

const fn field(name: &'static str, kind: FieldKind, fallback: Fallback) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        fallback,
        local: true,
    }
}

const SCORING_FIELDS: &[FieldSpec] = &[
    field("user_id", FieldKind::Text, Fallback::UserId),
    field("steps", FieldKind::Integer, Fallback::Steps),
    field("heart_rate", FieldKind::Real, Fallback::HeartRate),
    field("score", FieldKind::Real, Fallback::None),
    field("recommendation", FieldKind::Text, Fallback::None),
];

const EXTENDED_FIELDS: &[FieldSpec] = &[
    field("user_id", FieldKind::Text, Fallback::UserId),
    field("steps", FieldKind::Integer, Fallback::Steps),
    field("heart_rate", FieldKind::Real, Fallback::HeartRate),
    field("score", FieldKind::Real, Fallback::None),
    field("recommendation", FieldKind::Text, Fallback::None),
    field("generated_at", FieldKind::Timestamp, Fallback::None),
    field("temperature", FieldKind::Real, Fallback::None),
    field("suggested_duration", FieldKind::Integer, Fallback::None),
    field("intensity", FieldKind::Text, Fallback::None),
    field("notes", FieldKind::Text, Fallback::None),
    field("raw_health_data", FieldKind::Json, Fallback::None),
];

// The sauna producer does not know who asked; user_id always comes from the caller.
const SAUNA_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "user_id",
        kind: FieldKind::Text,
        fallback: Fallback::UserId,
        local: false,
    },
    field("temp", FieldKind::Real, Fallback::None),
    field("humidity", FieldKind::Real, Fallback::None),
    field("duration", FieldKind::Integer, Fallback::None),
];

/// Producer schema revision active for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVersion {
    /// `{user_id, steps, heart_rate, score, recommendation}`
    Scoring,
    /// Scoring plus generation metadata and raw health data
    #[serde(rename = "extended")]
    ScoringExtended,
    /// `{temp, humidity, duration}` sauna session
    #[default]
    Sauna,
}

impl SchemaVersion {
    /// Ordered canonical field table for this version
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            SchemaVersion::Scoring => SCORING_FIELDS,
            SchemaVersion::ScoringExtended => EXTENDED_FIELDS,
            SchemaVersion::Sauna => SAUNA_FIELDS,
        }
    }

    /// Look up a field by canonical name
    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Fields stored in the local table, in registry order
    pub fn local_fields(self) -> impl Iterator<Item = &'static FieldSpec> {
        self.fields().iter().filter(|f| f.local)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::Scoring => "scoring",
            SchemaVersion::ScoringExtended => "extended",
            SchemaVersion::Sauna => "sauna",
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scoring" => Ok(SchemaVersion::Scoring),
            "extended" | "scoring_extended" => Ok(SchemaVersion::ScoringExtended),
            "sauna" => Ok(SchemaVersion::Sauna),
            other => Err(Error::Config(format!(
                "Unknown schema version '{}' (expected scoring, extended or sauna)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_version_has_caller_backed_user_id() {
        for version in [
            SchemaVersion::Scoring,
            SchemaVersion::ScoringExtended,
            SchemaVersion::Sauna,
        ] {
            let user_id = version.field("user_id").expect("user_id in every schema");
            assert_eq!(user_id.fallback, Fallback::UserId, "{}", version);
            assert_eq!(user_id.kind, FieldKind::Text);
        }
    }

    #[test]
    fn test_field_names_unique_per_version() {
        for version in [
            SchemaVersion::Scoring,
            SchemaVersion::ScoringExtended,
            SchemaVersion::Sauna,
        ] {
            let names: HashSet<_> = version.fields().iter().map(|f| f.name).collect();
            assert_eq!(names.len(), version.fields().len(), "{}", version);
        }
    }

    #[test]
    fn test_extended_is_superset_of_scoring() {
        let extended = SchemaVersion::ScoringExtended.fields();
        for (i, spec) in SchemaVersion::Scoring.fields().iter().enumerate() {
            assert_eq!(&extended[i], spec);
        }
        assert_eq!(extended.len(), 11);
    }

    #[test]
    fn test_sauna_local_columns() {
        let local: Vec<_> = SchemaVersion::Sauna.local_fields().map(|f| f.name).collect();
        assert_eq!(local, vec!["temp", "humidity", "duration"]);
    }

    #[test]
    fn test_parse_schema_version() {
        assert_eq!("scoring".parse::<SchemaVersion>().unwrap(), SchemaVersion::Scoring);
        assert_eq!(" Extended ".parse::<SchemaVersion>().unwrap(), SchemaVersion::ScoringExtended);
        assert_eq!("sauna".parse::<SchemaVersion>().unwrap(), SchemaVersion::Sauna);
        assert!("v4".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn test_default_version_is_sauna() {
        assert_eq!(SchemaVersion::default(), SchemaVersion::Sauna);
        let parsed: SchemaVersion = serde_json::from_str("\"sauna\"").unwrap();
        assert_eq!(parsed, SchemaVersion::default());
    }
}
