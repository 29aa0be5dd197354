//! Key-pattern filters applied while aggregating

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Filter key for site names
pub const SITE: &str = "site";
/// Filter key for campaign names
pub const CAMPAIGN: &str = "campaign";

/// Filter patterns keyed by dimension (`site`, `campaign`).
///
/// Keys other than the recognised ones are carried but ignored by the
/// aggregation engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Filters(BTreeMap<String, String>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key=value` pairs separated by commas.
    ///
    /// Pieces that do not split into exactly one key and one value are dropped.
    pub fn parse(values: &str) -> Self {
        let mut filters = Self::new();
        for piece in values.split(',') {
            let pair: Vec<&str> = piece.split('=').collect();
            if pair.len() != 2 {
                continue;
            }
            filters.0.insert(pair[0].to_string(), pair[1].to_string());
        }
        filters
    }

    pub fn with(mut self, key: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.0.insert(key.into(), pattern.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compile the pattern for one dimension.
    pub fn matcher(&self, key: &str) -> KeyMatcher {
        let Some(pattern) = self.get(key) else {
            return KeyMatcher::All;
        };
        match Regex::new(pattern) {
            Ok(regex) => KeyMatcher::Pattern(regex),
            Err(e) => {
                // Fail open: a typo in a filter must not hide data.
                warn!(key = key, pattern = pattern, error = %e, "Invalid filter pattern, not filtering");
                KeyMatcher::All
            }
        }
    }
}

impl fmt::Display for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", pairs.join(","))
    }
}

/// Compiled filter for one dimension
#[derive(Debug, Clone)]
pub enum KeyMatcher {
    /// No pattern configured, or the pattern did not compile
    All,
    Pattern(Regex),
}

impl KeyMatcher {
    /// Whether an entry with this key survives the filter.
    pub fn keeps(&self, key: &str) -> bool {
        match self {
            KeyMatcher::All => true,
            KeyMatcher::Pattern(regex) => regex.is_match(key),
        }
    }
}
