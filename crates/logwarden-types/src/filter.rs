use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::LogLevel;

/// How the `text` field of a filter is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    #[default]
    Substring,
    Regex,
}

/// The neutral query object accepted by search, facets and export.
///
/// Semantics: OR within each set field, AND between fields; time bounds are
/// inclusive UTC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default)]
    pub text_match: TextMatch,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<LogLevel>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_from: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Opaque pagination cursor from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl FilterSpec {
    /// A filter matching everything, used by exports and tests.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>, matching: TextMatch) -> Self {
        self.text = Some(text.into());
        self.text_match = matching;
        self
    }

    pub fn with_levels(mut self, levels: &[LogLevel]) -> Self {
        self.levels = levels.to_vec();
        self
    }

    /// True when no constraint other than pagination is present.
    pub fn is_unconstrained(&self) -> bool {
        self.text.is_none()
            && self.levels.is_empty()
            && self.sources.is_empty()
            && self.categories.is_empty()
            && self.time_from.is_none()
            && self.time_to.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unconstrained() {
        assert!(FilterSpec::all().is_unconstrained());
    }

    #[test]
    fn builder_sets_constraints() {
        let f = FilterSpec::all()
            .with_text("disk", TextMatch::Substring)
            .with_levels(&[LogLevel::Error, LogLevel::Critical]);
        assert!(!f.is_unconstrained());
        assert_eq!(f.levels.len(), 2);
    }

    #[test]
    fn serde_defaults_for_missing_fields() {
        let f: FilterSpec = serde_json::from_str(r#"{"text":"x"}"#).unwrap();
        assert_eq!(f.text_match, TextMatch::Substring);
        assert!(!f.case_sensitive);
        assert!(f.levels.is_empty());
    }
}
