use logwarden_types::LogLevel;
use serde::{Deserialize, Serialize};

/// Outcome of a transactional batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    /// Rows discarded by the `(dedup_key, minute)` uniqueness constraint
    pub deduped: usize,
}

/// Structured row constraints shared by search, facets and retention.
///
/// This is the storage-level half of a query plan: everything here maps
/// directly onto indexed SQL predicates. Text verification beyond FTS
/// token matching happens in the search layer.
#[derive(Debug, Clone, Default)]
pub struct EventSelection {
    pub time_from_ms: Option<i64>,
    pub time_to_ms: Option<i64>,
    pub levels: Vec<LogLevel>,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    /// FTS5 MATCH expression over the message index
    pub fts_match: Option<String>,
    /// LIKE pattern over the message column (escaped by the caller)
    pub like_pattern: Option<String>,
    /// Exclusive upper bound from the previous page: rows strictly after
    /// `(ts_ms, id)` in `(ts DESC, id DESC)` order are skipped
    pub before: Option<(i64, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetBucket {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Visibility {
        match s {
            "public" => Visibility::Public,
            _ => Visibility::Private,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSearchRecord {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    /// Serialized `FilterSpec`
    pub filter_spec: String,
    pub visibility: Visibility,
    pub created_at_ms: i64,
    pub last_used_at_ms: Option<i64>,
    pub use_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRecord {
    pub id: i64,
    pub name: String,
    /// Serialized `FilterSpec` the rule counts matches of
    pub query: String,
    pub window_seconds: u32,
    pub threshold: u64,
    /// One of `>`, `>=`, `=`, `<=`, `<`
    pub comparator: String,
    pub severity: LogLevel,
    pub cooldown_seconds: u32,
    pub enabled: bool,
    pub last_fired_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryRecord {
    pub id: i64,
    pub rule_id: i64,
    pub fired_at_ms: i64,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub matched_count: i64,
    pub severity: LogLevel,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at_ms: i64,
    pub last_login_at_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AuthSessionRecord {
    pub token_hash: String,
    pub user_id: i64,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub last_seen_at_ms: i64,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub key_hash: String,
    pub name: String,
    pub user_id: i64,
    pub created_at_ms: i64,
    pub last_used_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub at_ms: i64,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FailedBatchRecord {
    pub id: i64,
    /// JSON array of the batch's events, exactly as they failed
    pub payload_blob: Vec<u8>,
    pub first_failed_at_ms: i64,
    pub last_attempt_at_ms: i64,
    pub attempt: u32,
    pub quarantined: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsEventRecord {
    pub id: i64,
    pub at_ms: i64,
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: String,
    /// Display type hint: `string`, `int`, `bool`, `json`
    pub value_type: String,
    pub updated_at_ms: i64,
    pub updated_by: String,
}
