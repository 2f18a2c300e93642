use logwarden_store::{Database, SavedSearchRecord, Visibility};
use logwarden_types::FilterSpec;

use crate::engine::{search, SearchPage};
use crate::{Error, Result};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SavedSearchInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub filter: FilterSpec,
    #[serde(default)]
    pub public: bool,
}

/// Persist a search under the owner's namespace. The filter is validated by
/// planning it once, so broken regexes are rejected at save time.
pub fn save_search(db: &mut Database, owner: &str, input: &SavedSearchInput) -> Result<i64> {
    if input.name.trim().is_empty() {
        return Err(Error::BadInput("saved search name must not be empty".to_string()));
    }
    crate::planner::plan(&input.filter)?;

    let filter_spec = serde_json::to_string(&input.filter)
        .map_err(|e| Error::Store(logwarden_store::Error::Json(e)))?;
    let visibility = if input.public {
        Visibility::Public
    } else {
        Visibility::Private
    };

    let id = db.create_saved_search(
        owner,
        input.name.trim(),
        input.description.as_deref(),
        &filter_spec,
        visibility,
    )?;
    db.record_audit(owner, "saved_search.create", &format!("saved_searches/{}", id), None)?;
    Ok(id)
}

pub fn list_saved(db: &Database, owner: &str) -> Result<Vec<SavedSearchRecord>> {
    Ok(db.list_saved_searches(owner)?)
}

/// Execute a saved search, stamping its usage. Private searches are only
/// runnable by their owner.
pub fn run_saved(db: &mut Database, id: i64, caller: &str) -> Result<SearchPage> {
    let record = db
        .get_saved_search(id)?
        .ok_or_else(|| Error::Store(logwarden_store::Error::NotFound(format!("saved search {}", id))))?;

    if record.visibility == Visibility::Private && record.owner != caller {
        return Err(Error::Store(logwarden_store::Error::NotFound(format!(
            "saved search {}",
            id
        ))));
    }

    let filter: FilterSpec = serde_json::from_str(&record.filter_spec)
        .map_err(|e| Error::Store(logwarden_store::Error::Json(e)))?;

    db.touch_saved_search(id)?;
    search(db, &filter)
}

pub fn delete_saved(db: &mut Database, id: i64, caller: &str, admin: bool) -> Result<()> {
    db.delete_saved_search(id, caller, admin)?;
    db.record_audit(caller, "saved_search.delete", &format!("saved_searches/{}", id), None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logwarden_types::{LogEvent, LogLevel, TextMatch};

    fn input(name: &str) -> SavedSearchInput {
        SavedSearchInput {
            name: name.to_string(),
            description: None,
            filter: FilterSpec::all().with_levels(&[LogLevel::Error]),
            public: false,
        }
    }

    #[test]
    fn save_validates_filter() {
        let mut db = Database::open_in_memory().unwrap();
        let mut bad = input("broken");
        bad.filter = FilterSpec::all().with_text("(", TextMatch::Regex);
        assert!(matches!(save_search(&mut db, "alice", &bad), Err(Error::BadRegex(_))));
    }

    #[test]
    fn run_saved_counts_usage_and_filters() {
        let mut db = Database::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let mut batch = vec![
            LogEvent::new(ts, ts, LogLevel::Error, "s", "app", "boom"),
            LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "fine"),
        ];
        db.insert_batch(&mut batch).unwrap();

        let id = save_search(&mut db, "alice", &input("errors")).unwrap();
        let page = run_saved(&mut db, id, "alice").unwrap();
        assert_eq!(page.rows.len(), 1);

        let record = db.get_saved_search(id).unwrap().unwrap();
        assert_eq!(record.use_count, 1);
    }

    #[test]
    fn private_search_hidden_from_others() {
        let mut db = Database::open_in_memory().unwrap();
        let id = save_search(&mut db, "alice", &input("mine")).unwrap();
        assert!(run_saved(&mut db, id, "bob").is_err());

        let mut shared = input("shared");
        shared.public = true;
        let id2 = save_search(&mut db, "alice", &shared).unwrap();
        assert!(run_saved(&mut db, id2, "bob").is_ok());
    }
}
