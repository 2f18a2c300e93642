use logwarden_types::{FilterSpec, LogEvent, TextMatch};
use regex::{Regex, RegexBuilder};

use crate::{Error, Result};

/// In-memory predicate compiled from a `FilterSpec`, applied to the live
/// event stream (no storage round-trip). Same semantics as search: OR
/// within a set, AND between sets, time bounds ignored (the stream is now).
pub struct EventMatcher {
    spec: FilterSpec,
    regex: Option<Regex>,
}

impl EventMatcher {
    pub fn compile(spec: FilterSpec) -> Result<Self> {
        let regex = match (&spec.text, spec.text_match) {
            (Some(text), TextMatch::Regex) => Some(
                RegexBuilder::new(text)
                    .case_insensitive(!spec.case_sensitive)
                    .size_limit(1 << 20)
                    .build()
                    .map_err(|e| Error::BadQuery(e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self { spec, regex })
    }

    pub fn from_json(query: &str) -> Result<Self> {
        let spec: FilterSpec =
            serde_json::from_str(query).map_err(|e| Error::BadQuery(e.to_string()))?;
        Self::compile(spec)
    }

    pub fn matches(&self, event: &LogEvent) -> bool {
        if !self.spec.levels.is_empty() && !self.spec.levels.contains(&event.level) {
            return false;
        }
        if !self.spec.sources.is_empty() && !self.spec.sources.iter().any(|s| s == &event.source) {
            return false;
        }
        if !self.spec.categories.is_empty()
            && !self.spec.categories.iter().any(|c| c == &event.category)
        {
            return false;
        }

        match (&self.spec.text, self.spec.text_match) {
            (None, _) => true,
            (Some(_), TextMatch::Regex) => self
                .regex
                .as_ref()
                .map(|re| re.is_match(&event.message))
                .unwrap_or(false),
            (Some(needle), TextMatch::Substring) => {
                if self.spec.case_sensitive {
                    event.message.contains(needle.as_str())
                } else {
                    event.message.to_lowercase().contains(&needle.to_lowercase())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logwarden_types::LogLevel;

    fn event(level: LogLevel, source: &str, message: &str) -> LogEvent {
        let now = Utc::now();
        LogEvent::new(now, now, level, source, "app", message)
    }

    #[test]
    fn level_and_source_sets() {
        let m = EventMatcher::from_json(r#"{"levels":["error"],"sources":["db","web"]}"#).unwrap();
        assert!(m.matches(&event(LogLevel::Error, "db", "x")));
        assert!(m.matches(&event(LogLevel::Error, "web", "x")));
        assert!(!m.matches(&event(LogLevel::Error, "cache", "x")));
        assert!(!m.matches(&event(LogLevel::Info, "db", "x")));
    }

    #[test]
    fn substring_text() {
        let m = EventMatcher::from_json(r#"{"text":"OOM"}"#).unwrap();
        assert!(m.matches(&event(LogLevel::Info, "s", "container oom killed")));
    }

    #[test]
    fn regex_text() {
        let m = EventMatcher::from_json(r#"{"text":"code [45]\\d\\d","text_match":"regex"}"#).unwrap();
        assert!(m.matches(&event(LogLevel::Info, "s", "code 503")));
        assert!(!m.matches(&event(LogLevel::Info, "s", "code 200")));
    }

    #[test]
    fn bad_query_reports() {
        assert!(EventMatcher::from_json("not json").is_err());
        assert!(EventMatcher::from_json(r#"{"text":"(","text_match":"regex"}"#).is_err());
    }
}
