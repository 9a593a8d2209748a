use serde::{Deserialize, Serialize};

/// Prefix/suffix rules that identify test-created objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConvention {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
}

impl NamingConvention {
    pub fn new<P, S>(prefixes: P, suffixes: S) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        }
    }

    /// `test_`, `temp_`, `tmp_` prefixes and `_test`, `_tmp` suffixes
    pub fn test_objects() -> Self {
        Self::new(["test_", "temp_", "tmp_"], ["_test", "_tmp"])
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.prefixes
            .iter()
            .any(|p| name.starts_with(&p.to_ascii_lowercase()))
            || self
                .suffixes
                .iter()
                .any(|s| name.ends_with(&s.to_ascii_lowercase()))
    }
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::test_objects()
    }
}
