mod db;
mod error;
mod migrations;
mod records;

pub mod queries;

pub use db::Database;
pub use error::{Error, Result};
pub use migrations::SCHEMA_VERSION;
pub use records::{
    AlertHistoryRecord, AlertRuleRecord, ApiKeyRecord, AuditRecord, AuthSessionRecord,
    EventSelection, FacetBucket, FailedBatchRecord, InsertOutcome, OpsEventRecord,
    SavedSearchRecord, SettingRecord, UserRecord, Visibility,
};
