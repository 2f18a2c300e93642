use chrono::Utc;
use logwarden_rules::{CorrelationPattern, RuleEngine, RuleOutput};
use logwarden_store::{AlertHistoryRecord, Database};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::hub::StreamHub;
use crate::shutdown::Shutdown;
use crate::writer::PostCommit;

/// Maintenance cadence: cooldown edges and correlation expiry.
const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Owns the rule engine and feeds it the post-commit stream.
///
/// Emitted records go three ways: the `alerts` stream channel, the
/// `ops_events` side table for the notification layer, and (for alerts)
/// the append-only firing history.
pub async fn run_rule_engine(
    db: Arc<Mutex<Database>>,
    mut events: broadcast::Receiver<PostCommit>,
    mut reload: mpsc::Receiver<()>,
    hub: Arc<StreamHub>,
    patterns: Vec<CorrelationPattern>,
    anomaly_k: f64,
    mut shutdown: Shutdown,
) {
    let rules = {
        let db = db.lock().unwrap();
        db.list_alert_rules().unwrap_or_default()
    };
    let mut engine = match RuleEngine::new(rules, patterns, anomaly_k) {
        Ok(engine) => engine,
        Err(err) => {
            warn!(error = %err, "rule engine failed to start; rules disabled");
            return;
        }
    };
    info!(alerts = engine.alert_count(), "rule engine running");

    let mut tick = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            received = events.recv() => {
                match received {
                    Ok(batch) => {
                        let now_ms = Utc::now().timestamp_millis();
                        for event in batch.iter() {
                            for output in engine.on_event(event, now_ms) {
                                emit(&db, &hub, output);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "rule engine lagged behind the commit stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = tick.tick() => {
                let now_ms = Utc::now().timestamp_millis();
                for output in engine.tick(now_ms) {
                    emit(&db, &hub, output);
                }
            }
            _ = reload.recv() => {
                let rules = {
                    let db = db.lock().unwrap();
                    db.list_alert_rules().unwrap_or_default()
                };
                info!(count = rules.len(), "reloading alert rules");
                engine.reload_rules(rules);
            }
            _ = shutdown.wait() => return,
        }
    }
}

fn emit(db: &Arc<Mutex<Database>>, hub: &Arc<StreamHub>, output: RuleOutput) {
    let payload = serde_json::to_value(&output).unwrap_or(serde_json::Value::Null);

    match &output {
        RuleOutput::AlertFired(fired) => {
            info!(rule = %fired.rule_name, count = fired.count, "alert fired");
            let mut db = db.lock().unwrap();
            let _ = db.record_alert_fired(&AlertHistoryRecord {
                id: 0,
                rule_id: fired.rule_id,
                fired_at_ms: Utc::now().timestamp_millis(),
                window_start_ms: fired.window_start_ms,
                window_end_ms: fired.window_end_ms,
                matched_count: fired.count as i64,
                severity: fired.severity,
            });
            let _ = db.record_ops_event("alert_fired", &payload);
            drop(db);
            hub.publish("alerts", "alert_fired", payload);
        }
        RuleOutput::CorrelationMatched(matched) => {
            info!(pattern = %matched.pattern_name, group = %matched.group_key, "correlation matched");
            let mut db = db.lock().unwrap();
            let _ = db.record_ops_event("correlation_matched", &payload);
            drop(db);
            hub.publish("alerts", "correlation_matched", payload);
        }
        RuleOutput::AnomalyFlagged(flagged) => {
            info!(source = %flagged.source, level = %flagged.level, z = flagged.z_score, "anomaly flagged");
            let mut db = db.lock().unwrap();
            let _ = db.record_ops_event("anomaly_flagged", &payload);
            drop(db);
            hub.publish("alerts", "anomaly_flagged", payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IngestMetrics;
    use chrono::Utc;
    use logwarden_store::AlertRuleRecord;
    use logwarden_types::{LogEvent, LogLevel};

    #[tokio::test]
    async fn fired_alert_lands_in_history_and_ops() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let rule_id = db
            .lock()
            .unwrap()
            .create_alert_rule(&AlertRuleRecord {
                id: 0,
                name: "burst".to_string(),
                query: r#"{"levels":["error"]}"#.to_string(),
                window_seconds: 60,
                threshold: 2,
                comparator: ">=".to_string(),
                severity: LogLevel::Error,
                cooldown_seconds: 300,
                enabled: true,
                last_fired_at_ms: None,
            })
            .unwrap();

        let hub = Arc::new(StreamHub::new(Arc::new(IngestMetrics::default())));
        let (event_tx, event_rx) = broadcast::channel(16);
        let (_reload_tx, reload_rx) = mpsc::channel(4);
        let (handle, shutdown) = Shutdown::new();

        let task = tokio::spawn(run_rule_engine(
            db.clone(),
            event_rx,
            reload_rx,
            hub,
            Vec::new(),
            3.0,
            shutdown,
        ));

        // Two error events cross the threshold
        let now = Utc::now();
        let mut events = Vec::new();
        for i in 0..2 {
            let mut e = LogEvent::new(now, now, LogLevel::Error, "db", "app", "boom");
            e.id = Some(i + 1);
            events.push(e);
        }
        event_tx.send(Arc::new(events)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.trigger();
        let _ = task.await;

        let history = db.lock().unwrap().list_alert_history(Some(rule_id), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].matched_count, 2);

        let ops = db.lock().unwrap().recent_ops_events(10).unwrap();
        assert!(ops.iter().any(|e| e.kind == "alert_fired"));
    }
}
