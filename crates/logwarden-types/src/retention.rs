use serde::{Deserialize, Serialize};

/// What a retention policy bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Parameter = max age in days
    ByAge,
    /// Parameter = max row count
    ByCount,
    /// Parameter = max store size in MiB
    BySize,
}

/// One retention rule; multiple policies may apply and eviction is the union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub kind: PolicyKind,
    pub parameter: u64,
    /// Glob over the event category; `*` matches everything.
    #[serde(default = "default_glob")]
    pub category_glob: String,
}

fn default_glob() -> String {
    "*".to_string()
}

impl RetentionPolicy {
    pub fn by_age_days(days: u64) -> Self {
        Self {
            kind: PolicyKind::ByAge,
            parameter: days,
            category_glob: default_glob(),
        }
    }

    pub fn matches_all_categories(&self) -> bool {
        self.category_glob == "*"
    }
}

/// Minimal glob: `*` wildcards, everything else literal.
pub fn glob_matches(glob: &str, value: &str) -> bool {
    fn inner(glob: &[u8], value: &[u8]) -> bool {
        match (glob.first(), value.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&glob[1..], value) || (!value.is_empty() && inner(glob, &value[1..]))
            }
            (Some(g), Some(v)) if g == v => inner(&glob[1..], &value[1..]),
            _ => false,
        }
    }
    inner(glob.as_bytes(), value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches_everything() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("*", ""));
    }

    #[test]
    fn glob_prefix_and_suffix() {
        assert!(glob_matches("sys*", "syslog"));
        assert!(glob_matches("*log", "syslog"));
        assert!(glob_matches("sys*g", "syslog"));
        assert!(!glob_matches("sys*", "auth"));
    }

    #[test]
    fn glob_literal() {
        assert!(glob_matches("auth", "auth"));
        assert!(!glob_matches("auth", "auth2"));
    }

    #[test]
    fn policy_serde_defaults_glob() {
        let p: RetentionPolicy =
            serde_json::from_str(r#"{"kind":"by_age","parameter":30}"#).unwrap();
        assert_eq!(p.category_glob, "*");
        assert_eq!(p.kind, PolicyKind::ByAge);
    }
}
