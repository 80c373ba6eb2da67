//! Environment variable entries.

use serde::{Deserialize, Serialize};

/// A single `KEY=VALUE` environment entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse `KEY=VALUE`. The value may itself contain `=`.
    pub fn parse(entry: &str) -> Result<Self, String> {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("Invalid environment variable (expected KEY=VALUE): {entry}"))?;
        if key.is_empty() {
            return Err(format!("Invalid environment variable (empty key): {entry}"));
        }
        Ok(Self::new(key, value))
    }

    /// Parse a list, skipping entries without `=` as OCI image configs do.
    pub fn parse_lenient<'a>(entries: impl IntoIterator<Item = &'a String>) -> Vec<Self> {
        entries
            .into_iter()
            .filter_map(|e| Self::parse(e).ok())
            .collect()
    }
}

impl std::fmt::Display for EnvVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let var = EnvVar::parse("PATH=/usr/bin").unwrap();
        assert_eq!(var, EnvVar::new("PATH", "/usr/bin"));
    }

    #[test]
    fn test_parse_value_with_equals() {
        let var = EnvVar::parse("OPTS=a=b").unwrap();
        assert_eq!(var.value, "a=b");
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(EnvVar::parse("NOVALUE").is_err());
        assert!(EnvVar::parse("=x").is_err());
    }

    #[test]
    fn test_parse_lenient_skips_invalid() {
        let raw = vec!["A=1".to_string(), "broken".to_string(), "B=".to_string()];
        let vars = EnvVar::parse_lenient(&raw);
        assert_eq!(vars, vec![EnvVar::new("A", "1"), EnvVar::new("B", "")]);
    }

    #[test]
    fn test_display() {
        assert_eq!(EnvVar::new("A", "1").to_string(), "A=1");
    }
}
