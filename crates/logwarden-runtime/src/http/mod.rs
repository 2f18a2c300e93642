mod api;
mod auth;
mod error;
mod ws;

pub use auth::{random_token, AuthUser, JwtKeys};
pub use error::ApiError;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get, post, put};
use axum::Router;
use logwarden_store::Database;
use logwarden_types::RawFrame;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::hub::StreamHub;
use crate::metrics::IngestMetrics;

/// Request bodies above this are refused with 413.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Simple token bucket guarding `/log`.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    pub fn try_take(&mut self, n: f64) -> bool {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.last_refill = Instant::now();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub metrics: Arc<IngestMetrics>,
    pub hub: Arc<StreamHub>,
    pub frames: mpsc::Sender<RawFrame>,
    pub jwt: JwtKeys,
    pub config: Arc<Config>,
    pub started_at: Instant,
    pub rate: Mutex<TokenBucket>,
    /// Pokes the rule-engine task to reload after alert-rule CRUD
    pub rules_reload: mpsc::Sender<()>,
    /// Broadcasts changed setting keys to in-process subscribers
    pub settings_changed: broadcast::Sender<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/log", post(api::ingest_log))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/logs/search", get(api::search_get).post(api::search_post))
        .route("/api/logs/export", get(api::export))
        .route("/api/logs/facets", get(api::facets))
        .route(
            "/api/saved-searches",
            get(api::saved_list).post(api::saved_create),
        )
        .route(
            "/api/saved-searches/{id}",
            put(api::saved_update).delete(api::saved_delete),
        )
        .route("/api/saved-searches/{id}/run", post(api::saved_run))
        .route(
            "/api/alerts/rules",
            get(api::rules_list).post(api::rules_create),
        )
        .route(
            "/api/alerts/rules/{id}",
            get(api::rules_get).put(api::rules_update).delete(api::rules_delete),
        )
        .route("/api/alerts/history", get(api::alert_history))
        .route("/api/ingestion/status", get(api::ingestion_status))
        .route("/api/settings", get(api::settings_list))
        .route("/api/settings/{key}", put(api::settings_put))
        .route("/stream", any(ws::stream))
        .layer(axum::middleware::from_fn(error::stamp_error_path))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(2.0, 1000.0);
        assert!(bucket.try_take(1.0));
        assert!(bucket.try_take(1.0));
        assert!(!bucket.try_take(1.0));

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_take(1.0));
    }
}
