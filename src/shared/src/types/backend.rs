//! Closed set of backend kinds under test

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CleanupError;

/// One of the four heterogeneous data engines a test suite runs against.
///
/// Every per-backend decision in the workspace matches on this enum, so adding a
/// kind is a compile error everywhere a backend is handled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[serde(alias = "postgres", alias = "postgresql", alias = "pg")]
    Relational,
    #[serde(alias = "mongodb", alias = "mongo")]
    Document,
    #[serde(alias = "redis", alias = "cache")]
    KeyValue,
    #[serde(alias = "qdrant", alias = "vector")]
    VectorIndex,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Relational,
        BackendKind::Document,
        BackendKind::KeyValue,
        BackendKind::VectorIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => "relational",
            BackendKind::Document => "document",
            BackendKind::KeyValue => "key_value",
            BackendKind::VectorIndex => "vector_index",
        }
    }

    /// Human readable name of the engine backing this kind
    pub fn engine_name(&self) -> &'static str {
        match self {
            BackendKind::Relational => "PostgreSQL",
            BackendKind::Document => "MongoDB",
            BackendKind::KeyValue => "Redis",
            BackendKind::VectorIndex => "Qdrant",
        }
    }

    /// Label for the locations a cleanup touches (tables, keys, collections)
    pub fn location_label(&self) -> &'static str {
        match self {
            BackendKind::Relational => "tables",
            BackendKind::Document | BackendKind::VectorIndex => "collections",
            BackendKind::KeyValue => "keys",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CleanupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" | "postgres" | "postgresql" | "pg" => Ok(BackendKind::Relational),
            "document" | "mongodb" | "mongo" => Ok(BackendKind::Document),
            "key_value" | "keyvalue" | "redis" | "cache" => Ok(BackendKind::KeyValue),
            "vector_index" | "vector" | "qdrant" => Ok(BackendKind::VectorIndex),
            other => Err(CleanupError::configuration(format!(
                "Unknown backend '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::Relational);
        assert_eq!("Mongo".parse::<BackendKind>().unwrap(), BackendKind::Document);
        assert_eq!(" redis ".parse::<BackendKind>().unwrap(), BackendKind::KeyValue);
        assert_eq!("qdrant".parse::<BackendKind>().unwrap(), BackendKind::VectorIndex);
        assert!("cassandra".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case_and_aliases() {
        let json = serde_json::to_string(&BackendKind::KeyValue).unwrap();
        assert_eq!(json, "\"key_value\"");

        let parsed: BackendKind = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(parsed, BackendKind::Relational);
    }
}
