use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use logwarden_search::{export_csv, facets as run_facets, search as run_search, SavedSearchInput};
use logwarden_store::AlertRuleRecord;
use logwarden_types::{FilterSpec, LogLevel, Protocol, RawFrame, TextMatch};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;

/// Export hard deadline; past it the partial CSV is all the client gets.
const EXPORT_DEADLINE: Duration = Duration::from_secs(60);

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// `POST /log` — unauthenticated structured ingestion, rate limited.
pub async fn ingest_log(
    State(state): State<Arc<AppState>>,
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<std::net::SocketAddr>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty_body", "request body required"));
    }
    if !state.rate.lock().unwrap().try_take(1.0) {
        return Err(ApiError::too_many_requests("ingestion rate exceeded"));
    }

    // Reject undecodable bodies synchronously so the client learns about it
    serde_json::from_slice::<Value>(&body)
        .map_err(|e| ApiError::bad_request("bad_json", e.to_string()))?;

    let frame = RawFrame::new(Protocol::Http, body.to_vec(), Some(peer));
    if state.frames.try_send(frame).is_err() {
        state
            .metrics
            .protocol(Protocol::Http)
            .count_malformed("pipeline_full");
        return Err(ApiError::too_many_requests("ingestion pipeline saturated"));
    }

    Ok(Json(json!({ "success": true })))
}

/// FilterSpec from query-string parameters (the GET form of search).
fn filter_from_query(params: &HashMap<String, String>) -> Result<FilterSpec, ApiError> {
    let mut filter = FilterSpec::default();

    if let Some(text) = params.get("text").filter(|t| !t.is_empty()) {
        filter.text = Some(text.clone());
    }
    match params.get("text_match").map(String::as_str) {
        None | Some("substring") => {}
        Some("regex") => filter.text_match = TextMatch::Regex,
        Some(other) => {
            return Err(ApiError::bad_request(
                "bad_text_match",
                format!("unknown text_match '{}'", other),
            ))
        }
    }
    filter.case_sensitive = params
        .get("case_sensitive")
        .is_some_and(|v| v == "true" || v == "1");

    if let Some(levels) = params.get("levels") {
        for level in levels.split(',').filter(|l| !l.is_empty()) {
            let parsed = LogLevel::from_str(level)
                .map_err(|_| ApiError::bad_request("bad_level", format!("unknown level '{}'", level)))?;
            filter.levels.push(parsed);
        }
    }
    if let Some(sources) = params.get("sources") {
        filter.sources = sources.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect();
    }
    if let Some(categories) = params.get("categories") {
        filter.categories = categories.split(',').filter(|c| !c.is_empty()).map(str::to_string).collect();
    }

    for (key, slot) in [("from", &mut filter.time_from), ("to", &mut filter.time_to)] {
        if let Some(value) = params.get(key) {
            let parsed = chrono::DateTime::parse_from_rfc3339(value)
                .map_err(|_| ApiError::bad_request("bad_time", format!("bad {} bound", key)))?;
            *slot = Some(parsed.with_timezone(&chrono::Utc));
        }
    }

    if let Some(limit) = params.get("limit") {
        filter.limit = Some(
            limit
                .parse()
                .map_err(|_| ApiError::bad_request("bad_limit", "limit must be a number"))?,
        );
    }
    filter.cursor = params.get("cursor").cloned();

    Ok(filter)
}

fn search_response(page: logwarden_search::SearchPage) -> Json<Value> {
    Json(json!({
        "rows": page.rows,
        "cursor": page.cursor,
        "warning": page.warning,
    }))
}

pub async fn search_get(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let filter = filter_from_query(&params)?;
    let db = state.db.lock().unwrap();
    let page = run_search(&db, &filter)?;
    Ok(search_response(page))
}

/// The POST form carries the FilterSpec as JSON, for queries too long for a
/// query string.
pub async fn search_post(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(filter): Json<FilterSpec>,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.lock().unwrap();
    let page = run_search(&db, &filter)?;
    Ok(search_response(page))
}

pub async fn facets(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let filter = filter_from_query(&params)?;
    let fields: Vec<String> = params
        .get("fields")
        .map(|f| f.split(',').map(str::to_string).collect())
        .unwrap_or_else(|| vec!["level".to_string(), "source".to_string(), "category".to_string()]);

    let db = state.db.lock().unwrap();
    let results = run_facets(&db, &filter, &fields)?;

    let mut body = serde_json::Map::new();
    for result in results {
        body.insert(
            result.field,
            serde_json::to_value(result.buckets).unwrap_or(Value::Null),
        );
    }
    Ok(Json(Value::Object(body)))
}

/// `GET /api/logs/export` — streamed CSV, one storage pass, 60 s deadline
/// with whatever was flushed delivered on timeout.
pub async fn export(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let filter = filter_from_query(&params)?;
    // Planning errors surface before the stream starts
    logwarden_search::plan(&filter)?;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(64);
    let shared_db = state.db.clone();
    // A long export must not hold the writer's connection; WAL lets a
    // dedicated read connection stream without blocking ingestion
    let db_path = shared_db.lock().unwrap().path().map(|p| p.to_path_buf());

    tokio::task::spawn_blocking(move || {
        let deadline = Instant::now() + EXPORT_DEADLINE;
        let writer = ChannelWriter { tx: tx.clone() };
        let result = match db_path {
            Some(path) => match logwarden_store::Database::open(&path) {
                Ok(reader) => export_csv(&reader, &filter, writer, Some(deadline)),
                Err(err) => {
                    tracing::warn!(error = %err, "export reader open failed");
                    return;
                }
            },
            // In-memory store (tests): fall back to the shared handle
            None => {
                let db = shared_db.lock().unwrap();
                export_csv(&db, &filter, writer, Some(deadline))
            }
        };
        if let Err(err) = result {
            // Timeout mid-stream: the partial CSV already reached the client
            tracing::warn!(error = %err, "export ended early");
        }
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"logs.csv\"",
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(response)
}

/// Bridges the synchronous CSV writer onto the response stream.
struct ChannelWriter {
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub async fn saved_list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let db = state.db.lock().unwrap();
    let records = logwarden_search::list_saved(&db, &user.username)?;
    Ok(Json(json!({ "saved_searches": records })))
}

pub async fn saved_create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(input): Json<SavedSearchInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut db = state.db.lock().unwrap();
    let id = logwarden_search::save_search(&mut db, &user.username, &input)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn saved_update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<SavedSearchInput>,
) -> Result<Json<Value>, ApiError> {
    let filter_spec = serde_json::to_string(&input.filter)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let visibility = if input.public {
        logwarden_store::Visibility::Public
    } else {
        logwarden_store::Visibility::Private
    };
    let mut db = state.db.lock().unwrap();
    db.update_saved_search(
        id,
        &user.username,
        input.description.as_deref(),
        &filter_spec,
        visibility,
    )?;
    Ok(Json(json!({ "success": true })))
}

pub async fn saved_delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let mut db = state.db.lock().unwrap();
    logwarden_search::delete_saved(&mut db, id, &user.username, user.is_admin())?;
    Ok(Json(json!({ "success": true })))
}

pub async fn saved_run(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let mut db = state.db.lock().unwrap();
    let page = logwarden_search::run_saved(&mut db, id, &user.username)?;
    Ok(search_response(page))
}

#[derive(Debug, serde::Deserialize)]
pub struct AlertRuleInput {
    pub name: String,
    pub query: FilterSpec,
    pub window_seconds: u32,
    pub threshold: u64,
    #[serde(default = "default_comparator")]
    pub comparator: String,
    #[serde(default = "default_severity")]
    pub severity: LogLevel,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_comparator() -> String {
    ">=".to_string()
}
fn default_severity() -> LogLevel {
    LogLevel::Warn
}
fn default_cooldown() -> u32 {
    300
}
fn default_enabled() -> bool {
    true
}

impl AlertRuleInput {
    fn into_record(self, id: i64) -> Result<AlertRuleRecord, ApiError> {
        let query = serde_json::to_string(&self.query)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        // Validation through the rules layer catches bad comparators/queries
        let record = AlertRuleRecord {
            id,
            name: self.name,
            query,
            window_seconds: self.window_seconds,
            threshold: self.threshold,
            comparator: self.comparator,
            severity: self.severity,
            cooldown_seconds: self.cooldown_seconds,
            enabled: self.enabled,
            last_fired_at_ms: None,
        };
        logwarden_rules::AlertEvaluator::new(record.clone())?;
        Ok(record)
    }
}

pub async fn rules_list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    let db = state.db.lock().unwrap();
    Ok(Json(json!({ "rules": db.list_alert_rules()? })))
}

pub async fn rules_get(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    let db = state.db.lock().unwrap();
    let rule = db
        .get_alert_rule(id)?
        .ok_or_else(|| ApiError::not_found(format!("alert rule {}", id)))?;
    Ok(Json(serde_json::to_value(rule).unwrap_or(Value::Null)))
}

pub async fn rules_create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(input): Json<AlertRuleInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    user.require_admin()?;
    let record = input.into_record(0)?;
    let id = {
        let mut db = state.db.lock().unwrap();
        let id = db.create_alert_rule(&record)?;
        let _ = db.record_audit(&user.username, "alert_rule.create", &format!("alert_rules/{}", id), None);
        id
    };
    let _ = state.rules_reload.try_send(());
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

pub async fn rules_update(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<AlertRuleInput>,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    let record = input.into_record(id)?;
    {
        let mut db = state.db.lock().unwrap();
        db.update_alert_rule(&record)?;
        let _ = db.record_audit(&user.username, "alert_rule.update", &format!("alert_rules/{}", id), None);
    }
    // An edited rule re-arms with fresh counters in the engine
    let _ = state.rules_reload.try_send(());
    Ok(Json(json!({ "success": true })))
}

pub async fn rules_delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    {
        let mut db = state.db.lock().unwrap();
        db.delete_alert_rule(id)?;
        let _ = db.record_audit(&user.username, "alert_rule.delete", &format!("alert_rules/{}", id), None);
    }
    let _ = state.rules_reload.try_send(());
    Ok(Json(json!({ "success": true })))
}

pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let rule_id = params.get("rule_id").and_then(|v| v.parse().ok());
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100usize)
        .min(1000);
    let db = state.db.lock().unwrap();
    Ok(Json(json!({ "history": db.list_alert_history(rule_id, limit)? })))
}

pub async fn ingestion_status(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let mut snapshot = state.metrics.snapshot();
    let (pending, quarantined) = {
        let db = state.db.lock().unwrap();
        db.failed_batch_counts()?
    };
    snapshot["retry_queue"] = json!({ "pending": pending, "quarantined": quarantined });
    Ok(Json(snapshot))
}

pub async fn settings_list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    let db = state.db.lock().unwrap();
    Ok(Json(json!({ "settings": db.list_settings()? })))
}

#[derive(Debug, serde::Deserialize)]
pub struct SettingInput {
    pub value: String,
    #[serde(default = "default_setting_type")]
    pub value_type: String,
}

fn default_setting_type() -> String {
    "string".to_string()
}

pub async fn settings_put(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(key): Path<String>,
    Json(input): Json<SettingInput>,
) -> Result<Json<Value>, ApiError> {
    user.require_admin()?;
    {
        let mut db = state.db.lock().unwrap();
        db.put_setting(&key, &input.value, &input.value_type, &user.username, None)?;
    }
    // Subscribers refresh their cached view on this signal
    let _ = state.settings_changed.send(key.clone());
    state
        .hub
        .publish("metrics", "settings_changed", json!({ "key": key }));
    Ok(Json(json!({ "success": true })))
}
