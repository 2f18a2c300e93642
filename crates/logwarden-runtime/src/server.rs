use logwarden_rules::CorrelationPattern;
use logwarden_store::Database;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::enricher::{Enricher, GeoTable};
use crate::http::{self, AppState, JwtKeys, TokenBucket};
use crate::hub::StreamHub;
use crate::listeners;
use crate::metrics::IngestMetrics;
use crate::pipeline::{run_normalizer, FRAME_CHANNEL_CAPACITY};
use crate::queue::{IngestQueue, QUEUE_CAPACITY};
use crate::retention::RetentionEngine;
use crate::retry::RetryWorker;
use crate::rules_task::run_rule_engine;
use crate::shutdown::Shutdown;
use crate::supervisor::spawn_supervised;
use crate::writer::BatchWriter;
use crate::{Error, Result};

/// Post-commit fan-out depth; slow subscribers observe lag, not loss of
/// durability.
const POST_COMMIT_CAPACITY: usize = 4096;

/// The assembled server: storage, pipeline, listeners, rule engine,
/// retention and the HTTP/WS surface, wired by explicit construction.
pub struct Server {
    config: Arc<Config>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config.clone();

        std::fs::create_dir_all(config.databases_dir())?;
        std::fs::create_dir_all(config.logs_dir())?;
        std::fs::create_dir_all(config.backups_dir())?;

        let db = Arc::new(Mutex::new(Database::open(
            &config.databases_dir().join("logwarden.db"),
        )?));
        bootstrap(&db, &config)?;

        let metrics = Arc::new(IngestMetrics::default());
        let hub = Arc::new(StreamHub::new(metrics.clone()));
        let queue = Arc::new(IngestQueue::new(QUEUE_CAPACITY, metrics.clone()));
        let (post_commit, _) = broadcast::channel(POST_COMMIT_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (rules_reload_tx, rules_reload_rx) = mpsc::channel(8);
        let (settings_changed, _) = broadcast::channel(64);

        // Shutdown domains: listeners stop accepting first, the core
        // pipeline drains second, the HTTP surface goes last
        let (listener_stop, listener_shutdown) = Shutdown::new();
        let (core_stop, core_shutdown) = Shutdown::new();
        let (http_stop, http_shutdown) = Shutdown::new();

        // Listeners
        let listener_tasks = listeners::spawn_all(
            &config,
            frame_tx.clone(),
            metrics.clone(),
            db.clone(),
            listener_shutdown.clone(),
        )
        .await?;

        // Normalizer + enricher worker
        let geo_path = config.data_dir.join("geo.csv");
        let geo = if geo_path.exists() {
            match GeoTable::load_csv(&geo_path) {
                Ok(table) => {
                    info!(ranges = table.len(), "geo table loaded");
                    table
                }
                Err(err) => {
                    warn!(error = %err, "geo table unreadable, geo enrichment off");
                    GeoTable::empty()
                }
            }
        } else {
            GeoTable::empty()
        };
        let enricher = Arc::new(Enricher::new(geo, config.rdns_enabled));
        let normalizer = tokio::spawn(run_normalizer(
            frame_rx,
            queue.clone(),
            enricher,
            metrics.clone(),
            core_shutdown.clone(),
        ));

        // Batch writer: the single consumer of the ingest queue, restarted
        // by the supervisor if it ever panics
        let writer_task = {
            let queue = queue.clone();
            let db_for_writer = db.clone();
            let post_commit_tx = post_commit.clone();
            let metrics = metrics.clone();
            let shutdown = core_shutdown.clone();
            spawn_supervised("batch-writer", db.clone(), core_shutdown.clone(), move || {
                let writer = BatchWriter::new(
                    queue.clone(),
                    db_for_writer.clone(),
                    post_commit_tx.clone(),
                    metrics.clone(),
                );
                let shutdown = shutdown.clone();
                async move { writer.run(shutdown).await }
            })
        };

        // Retry worker
        let retry = Arc::new(RetryWorker::new(
            db.clone(),
            post_commit.clone(),
            hub.clone(),
            metrics.clone(),
        ));
        let retry_task = {
            let retry = retry.clone();
            let shutdown = core_shutdown.clone();
            spawn_supervised("retry-worker", db.clone(), core_shutdown.clone(), move || {
                let retry = retry.clone();
                let shutdown = shutdown.clone();
                async move { retry.run(shutdown).await }
            })
        };

        // Rule engine on the post-commit stream
        let patterns = load_patterns(&config);
        let rules_task = tokio::spawn(run_rule_engine(
            db.clone(),
            post_commit.subscribe(),
            rules_reload_rx,
            hub.clone(),
            patterns,
            config.anomaly_k,
            core_shutdown.clone(),
        ));

        // Post-commit → `logs` channel forwarder
        let forwarder_task = {
            let hub = hub.clone();
            let mut rx = post_commit.subscribe();
            let mut shutdown = core_shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        received = rx.recv() => match received {
                            Ok(batch) => {
                                for event in batch.iter() {
                                    let data = serde_json::to_value(event)
                                        .unwrap_or(serde_json::Value::Null);
                                    hub.publish("logs", "logs", data);
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                        _ = shutdown.wait() => return,
                    }
                }
            })
        };

        // Retention engine
        let retention = Arc::new(RetentionEngine::new(db.clone(), config.clone(), hub.clone())?);
        let retention_task = {
            let retention = retention.clone();
            let shutdown = core_shutdown.clone();
            spawn_supervised("retention", db.clone(), core_shutdown.clone(), move || {
                let retention = retention.clone();
                let shutdown = shutdown.clone();
                async move { retention.run(shutdown).await }
            })
        };

        // HTTP surface
        let jwt_secret = config.effective_jwt_secret()?;
        let state = Arc::new(AppState {
            db: db.clone(),
            metrics: metrics.clone(),
            hub: hub.clone(),
            frames: frame_tx,
            jwt: JwtKeys::from_secret(&jwt_secret),
            config: config.clone(),
            started_at: Instant::now(),
            rate: Mutex::new(TokenBucket::new(2000.0, 1000.0)),
            rules_reload: rules_reload_tx,
            settings_changed,
        });
        let router = http::build_router(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let http_task = spawn_http(addr, router, &config, http_shutdown).await?;
        info!(port = config.port, https = config.use_https, "API listening");

        // Park until a termination signal
        wait_for_signal().await;
        info!("shutdown signal received");

        // 1. Listeners stop accepting
        listener_stop.trigger();
        for task in listener_tasks {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }

        // 2. Core drains: normalizer exits, writer drains the queue (≤10 s)
        //    and flushes, retry marks nothing new
        core_stop.trigger();
        queue.wake();
        let _ = tokio::time::timeout(Duration::from_secs(12), normalizer).await;
        let _ = tokio::time::timeout(Duration::from_secs(12), writer_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), retry_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), rules_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), forwarder_task).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), retention_task).await;

        // 3. Farewell to stream clients, then the HTTP surface goes down
        hub.broadcast_all(
            serde_json::json!({
                "event": "server_shutdown",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })
            .to_string(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        hub.kick_all();
        http_stop.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

        // 4. The store closes by being dropped last
        info!("shutdown complete");
        Ok(())
    }
}

fn load_patterns(config: &Config) -> Vec<CorrelationPattern> {
    config
        .correlation_patterns
        .iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                warn!(error = %err, "skipping invalid correlation pattern");
                None
            }
        })
        .collect()
}

/// First-run bootstrap: default admin account and baseline settings.
fn bootstrap(db: &Arc<Mutex<Database>>, config: &Config) -> Result<()> {
    let mut db = db.lock().unwrap();

    if db.user_count()? == 0 {
        let password = match &config.auth_password {
            Some(password) => password.clone(),
            None => {
                let generated = crate::http::random_token();
                warn!(password = %generated, "no AUTH_PASSWORD set; generated admin password");
                generated
            }
        };
        let salt = crate::http::random_token();
        db.create_user("admin", &password, &salt, "admin")?;
        info!("default admin account created");
    }

    if db.get_setting("timezone")?.is_none() {
        db.put_setting("timezone", &config.timezone, "string", "system", None)?;
    }
    if db.get_setting("theme")?.is_none() {
        db.put_setting("theme", "dark", "string", "system", None)?;
    }
    if db.get_setting("retention_days")?.is_none() {
        db.put_setting(
            "retention_days",
            &config.log_retention_days.to_string(),
            "int",
            "system",
            None,
        )?;
    }

    Ok(())
}

async fn spawn_http(
    addr: SocketAddr,
    router: axum::Router,
    config: &Config,
    mut shutdown: Shutdown,
) -> Result<tokio::task::JoinHandle<()>> {
    if config.use_https {
        let (cert, key) = match (&config.ssl_cert_path, &config.ssl_key_path) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => return Err(Error::Config("missing TLS material".to_string())),
        };
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .map_err(|e| Error::Config(format!("TLS setup failed: {}", e)))?;

        let handle = axum_server::Handle::new();
        let watcher = handle.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            watcher.graceful_shutdown(Some(Duration::from_secs(3)));
        });

        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        Ok(tokio::spawn(async move {
            if let Err(err) = axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(service)
                .await
            {
                error!(error = %err, "HTTPS server stopped");
            }
        }))
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| listeners::bind_error(e, addr.port()))?;
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    shutdown.wait().await;
                })
                .await;
            if let Err(err) = result {
                error!(error = %err, "HTTP server stopped");
            }
        }))
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
