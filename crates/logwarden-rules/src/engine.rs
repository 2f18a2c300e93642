use logwarden_store::AlertRuleRecord;
use logwarden_types::LogEvent;
use tracing::warn;

use crate::alerting::{AlertEvaluator, AlertFired};
use crate::anomaly::{AnomalyDetector, AnomalyFlagged};
use crate::correlation::{CorrelationEngine, CorrelationMatched, CorrelationPattern};
use crate::Result;

/// Structured record emitted by any of the three sub-engines.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleOutput {
    AlertFired(AlertFired),
    CorrelationMatched(CorrelationMatched),
    AnomalyFlagged(AnomalyFlagged),
}

/// The combined rule engine: one owner task feeds it the post-commit event
/// stream; windowed state is private to that task.
pub struct RuleEngine {
    alerts: Vec<AlertEvaluator>,
    correlations: CorrelationEngine,
    anomalies: AnomalyDetector,
}

impl RuleEngine {
    pub fn new(
        rules: Vec<AlertRuleRecord>,
        patterns: Vec<CorrelationPattern>,
        anomaly_k: f64,
    ) -> Result<Self> {
        let mut alerts = Vec::with_capacity(rules.len());
        for rule in rules {
            match AlertEvaluator::new(rule) {
                Ok(eval) => alerts.push(eval),
                // One broken rule must not take down the engine
                Err(e) => warn!(error = %e, "skipping unloadable alert rule"),
            }
        }
        Ok(Self {
            alerts,
            correlations: CorrelationEngine::new(patterns)?,
            anomalies: AnomalyDetector::new(anomaly_k),
        })
    }

    pub fn on_event(&mut self, event: &LogEvent, now_ms: i64) -> Vec<RuleOutput> {
        let mut outputs = Vec::new();

        for eval in &mut self.alerts {
            if let Some(fired) = eval.on_event(event, now_ms) {
                outputs.push(RuleOutput::AlertFired(fired));
            }
        }
        for matched in self.correlations.on_event(event, now_ms) {
            outputs.push(RuleOutput::CorrelationMatched(matched));
        }
        if let Some(flagged) = self.anomalies.on_event(event) {
            outputs.push(RuleOutput::AnomalyFlagged(flagged));
        }

        outputs
    }

    /// Periodic maintenance: cooldown re-evaluation and sequence expiry.
    pub fn tick(&mut self, now_ms: i64) -> Vec<RuleOutput> {
        let mut outputs = Vec::new();
        for eval in &mut self.alerts {
            if let Some(fired) = eval.tick(now_ms) {
                outputs.push(RuleOutput::AlertFired(fired));
            }
        }
        self.correlations.sweep_expired(now_ms);
        outputs
    }

    /// Apply a rule set change: existing evaluators for changed rules are
    /// reset to Armed with their counters discarded; removed rules drop.
    pub fn reload_rules(&mut self, rules: Vec<AlertRuleRecord>) {
        let mut next = Vec::with_capacity(rules.len());
        for rule in rules {
            let existing = self.alerts.iter().position(|e| e.rule_id() == rule.id);
            match existing {
                Some(index) => {
                    let mut eval = self.alerts.swap_remove(index);
                    if let Err(e) = eval.replace_rule(rule) {
                        warn!(error = %e, "dropping alert rule on reload");
                        continue;
                    }
                    next.push(eval);
                }
                None => match AlertEvaluator::new(rule) {
                    Ok(eval) => next.push(eval),
                    Err(e) => warn!(error = %e, "skipping unloadable alert rule"),
                },
            }
        }
        self.alerts = next;
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.len()
    }

    pub fn open_sequences(&self) -> usize {
        self.correlations.open_count()
    }
}
