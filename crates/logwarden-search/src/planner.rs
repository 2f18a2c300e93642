use logwarden_store::EventSelection;
use logwarden_types::{FilterSpec, TextMatch};
use regex::{Regex, RegexBuilder};

use crate::literals::obligatory_literals;
use crate::{Error, Result};

/// Row cap enforced when a regex gives the planner no literal anchors and a
/// scan over the time range is the only option.
pub const REGEX_SCAN_CAP: usize = 10_000;

/// In-process verification applied after the storage-level selection.
#[derive(Debug)]
pub enum TextVerifier {
    /// Exact substring check (FTS token matching is case-folded and
    /// token-aligned, so the original semantics are re-checked here)
    Substring { needle: String, case_sensitive: bool },
    Regex(Regex),
}

impl TextVerifier {
    pub fn matches(&self, message: &str) -> bool {
        match self {
            TextVerifier::Substring { needle, case_sensitive } => {
                if *case_sensitive {
                    message.contains(needle.as_str())
                } else {
                    message.to_lowercase().contains(&needle.to_lowercase())
                }
            }
            TextVerifier::Regex(re) => re.is_match(message),
        }
    }
}

/// A planned query: storage predicates plus optional in-process work.
#[derive(Debug)]
pub struct Plan {
    pub selection: EventSelection,
    pub verifier: Option<TextVerifier>,
    /// Maximum rows pulled from storage before giving up (regex-no-literal)
    pub scan_cap: Option<usize>,
    /// Human-readable note surfaced alongside results
    pub warning: Option<String>,
}

/// Planner rules:
/// 1. no text        → index scan on the structured predicates
/// 2. substring      → FTS token match ∩ time range, then verify in process
/// 3. regex          → FTS prefilter from obligatory literals, then regex
///                     verify; with no literals, a capped scan plus warning
pub fn plan(filter: &FilterSpec) -> Result<Plan> {
    let mut selection = EventSelection {
        time_from_ms: filter.time_from.map(|t| t.timestamp_millis()),
        time_to_ms: filter.time_to.map(|t| t.timestamp_millis()),
        levels: filter.levels.clone(),
        sources: filter.sources.clone(),
        categories: filter.categories.clone(),
        ..Default::default()
    };

    let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(Plan {
            selection,
            verifier: None,
            scan_cap: None,
            warning: None,
        });
    };

    match filter.text_match {
        TextMatch::Substring => {
            let tokens = fts_tokens(text);
            if tokens.is_empty() {
                // Pure punctuation: LIKE is the only storage-side narrowing
                selection.like_pattern = Some(format!("%{}%", escape_like(text)));
            } else {
                selection.fts_match = Some(fts_query(&tokens));
            }
            Ok(Plan {
                selection,
                verifier: Some(TextVerifier::Substring {
                    needle: text.to_string(),
                    case_sensitive: filter.case_sensitive,
                }),
                scan_cap: None,
                warning: None,
            })
        }
        TextMatch::Regex => {
            let re = RegexBuilder::new(text)
                .case_insensitive(!filter.case_sensitive)
                .size_limit(1 << 20)
                .build()
                .map_err(|e| Error::BadRegex(e.to_string()))?;

            let literals = obligatory_literals(text);
            let (scan_cap, warning) = if literals.is_empty() {
                (
                    Some(REGEX_SCAN_CAP),
                    Some(format!(
                        "regex has no literal anchors; scan capped at {} rows",
                        REGEX_SCAN_CAP
                    )),
                )
            } else {
                selection.fts_match = Some(fts_query(&literals));
                (None, None)
            };

            Ok(Plan {
                selection,
                verifier: Some(TextVerifier::Regex(re)),
                scan_cap,
                warning,
            })
        }
    }
}

/// Tokenize the way FTS5's unicode61 tokenizer does: alphanumeric runs.
fn fts_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// All tokens are obligatory: quoted phrases joined by AND.
fn fts_query(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_types::LogLevel;

    #[test]
    fn no_text_is_pure_index_scan() {
        let filter = FilterSpec::all().with_levels(&[LogLevel::Error]);
        let plan = plan(&filter).unwrap();
        assert!(plan.selection.fts_match.is_none());
        assert!(plan.verifier.is_none());
        assert!(plan.scan_cap.is_none());
    }

    #[test]
    fn substring_uses_fts_and_verifies() {
        let filter = FilterSpec::all().with_text("disk failure", TextMatch::Substring);
        let plan = plan(&filter).unwrap();
        assert_eq!(plan.selection.fts_match.as_deref(), Some("\"disk\" AND \"failure\""));
        assert!(matches!(plan.verifier, Some(TextVerifier::Substring { .. })));
    }

    #[test]
    fn punctuation_only_substring_falls_back_to_like() {
        let filter = FilterSpec::all().with_text("::", TextMatch::Substring);
        let plan = plan(&filter).unwrap();
        assert!(plan.selection.fts_match.is_none());
        assert_eq!(plan.selection.like_pattern.as_deref(), Some("%::%"));
    }

    #[test]
    fn regex_with_literals_prefilters() {
        let filter = FilterSpec::all().with_text("error.*timeout", TextMatch::Regex);
        let plan = plan(&filter).unwrap();
        assert_eq!(plan.selection.fts_match.as_deref(), Some("\"error\" AND \"timeout\""));
        assert!(plan.scan_cap.is_none());
        assert!(plan.warning.is_none());
    }

    #[test]
    fn anchorless_regex_gets_capped() {
        let filter = FilterSpec::all().with_text(r"\d{3}-\d{4}", TextMatch::Regex);
        let plan = plan(&filter).unwrap();
        assert_eq!(plan.scan_cap, Some(REGEX_SCAN_CAP));
        assert!(plan.warning.is_some());
    }

    #[test]
    fn bad_regex_is_reported() {
        let filter = FilterSpec::all().with_text("(unclosed", TextMatch::Regex);
        assert!(matches!(plan(&filter), Err(Error::BadRegex(_))));
    }

    #[test]
    fn substring_verifier_honors_case() {
        let sensitive = TextVerifier::Substring {
            needle: "Disk".to_string(),
            case_sensitive: true,
        };
        assert!(!sensitive.matches("disk full"));
        let insensitive = TextVerifier::Substring {
            needle: "Disk".to_string(),
            case_sensitive: false,
        };
        assert!(insensitive.matches("disk full"));
    }
}
