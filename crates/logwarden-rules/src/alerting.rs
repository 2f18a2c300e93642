use logwarden_store::AlertRuleRecord;
use logwarden_types::{LogEvent, LogLevel};

use crate::buckets::BucketWindow;
use crate::matcher::EventMatcher;
use crate::{Error, Result};

/// Ids remembered per window for the fired payload; the count is exact,
/// the id list is a sample.
const MATCHED_ID_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    Armed,
    /// Just emitted; drops into Cooldown on the next evaluation
    Firing(i64),
    /// Suppressed until the embedded instant
    Cooldown(i64),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertFired {
    pub rule_id: i64,
    pub rule_name: String,
    pub severity: LogLevel,
    pub count: u64,
    pub threshold: u64,
    pub matched_ids: Vec<i64>,
    pub window_start_ms: i64,
    pub window_end_ms: i64,
}

/// Per-rule state machine: `Armed → Firing → Cooldown → Armed`.
///
/// Firing is entered when the windowed count satisfies the comparator; the
/// machine drops into Cooldown immediately after emitting, and on cooldown
/// expiry re-evaluates: still over threshold fires again, otherwise re-arms.
pub struct AlertEvaluator {
    rule: AlertRuleRecord,
    matcher: EventMatcher,
    window: BucketWindow,
    state: RuleState,
    matched_ids: Vec<i64>,
}

impl AlertEvaluator {
    pub fn new(rule: AlertRuleRecord) -> Result<Self> {
        validate_comparator(&rule.comparator)?;
        let matcher = EventMatcher::from_json(&rule.query)?;
        Ok(Self {
            rule,
            matcher,
            window: BucketWindow::default(),
            state: RuleState::Armed,
            matched_ids: Vec::new(),
        })
    }

    pub fn rule_id(&self) -> i64 {
        self.rule.id
    }

    pub fn state(&self) -> RuleState {
        self.state
    }

    /// Rule edits discard window counters and re-arm.
    pub fn replace_rule(&mut self, rule: AlertRuleRecord) -> Result<()> {
        validate_comparator(&rule.comparator)?;
        self.matcher = EventMatcher::from_json(&rule.query)?;
        self.rule = rule;
        self.window.clear();
        self.matched_ids.clear();
        self.state = RuleState::Armed;
        Ok(())
    }

    pub fn on_event(&mut self, event: &LogEvent, now_ms: i64) -> Option<AlertFired> {
        if !self.rule.enabled {
            return None;
        }
        if self.matcher.matches(event) {
            self.window.record(event.timestamp.timestamp_millis());
            if let Some(id) = event.id {
                if self.matched_ids.len() < MATCHED_ID_CAP {
                    self.matched_ids.push(id);
                }
            }
        }
        self.evaluate(now_ms)
    }

    /// Periodic tick: drives the Cooldown → Armed/Firing edge even with no
    /// new matching events.
    pub fn tick(&mut self, now_ms: i64) -> Option<AlertFired> {
        if !self.rule.enabled {
            return None;
        }
        self.window.prune(now_ms, self.window_ms() * 2);
        self.evaluate(now_ms)
    }

    fn window_ms(&self) -> i64 {
        i64::from(self.rule.window_seconds) * 1000
    }

    fn evaluate(&mut self, now_ms: i64) -> Option<AlertFired> {
        match self.state {
            RuleState::Firing(until) => {
                // Firing → Cooldown immediately after the emission
                self.state = RuleState::Cooldown(until);
                return None;
            }
            RuleState::Cooldown(until) if now_ms < until => return None,
            RuleState::Cooldown(_) => {
                // Cooldown elapsed: fall through to a fresh evaluation
                self.state = RuleState::Armed;
            }
            RuleState::Armed => {}
        }

        let count = self.window.sum_window(now_ms, self.window_ms());
        if !compare(count, self.rule.comparator.as_str(), self.rule.threshold) {
            return None;
        }

        self.state = RuleState::Firing(now_ms + i64::from(self.rule.cooldown_seconds) * 1000);
        let fired = AlertFired {
            rule_id: self.rule.id,
            rule_name: self.rule.name.clone(),
            severity: self.rule.severity,
            count,
            threshold: self.rule.threshold,
            matched_ids: std::mem::take(&mut self.matched_ids),
            window_start_ms: now_ms - self.window_ms(),
            window_end_ms: now_ms,
        };
        self.window.clear();
        Some(fired)
    }
}

fn validate_comparator(cmp: &str) -> Result<()> {
    match cmp {
        ">" | ">=" | "=" | "<=" | "<" => Ok(()),
        other => Err(Error::BadComparator(other.to_string())),
    }
}

fn compare(count: u64, comparator: &str, threshold: u64) -> bool {
    match comparator {
        ">" => count > threshold,
        ">=" => count >= threshold,
        "=" => count == threshold,
        "<=" => count <= threshold,
        "<" => count < threshold,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rule() -> AlertRuleRecord {
        AlertRuleRecord {
            id: 1,
            name: "error burst".to_string(),
            query: r#"{"levels":["error"]}"#.to_string(),
            window_seconds: 60,
            threshold: 5,
            comparator: ">=".to_string(),
            severity: LogLevel::Error,
            cooldown_seconds: 300,
            enabled: true,
            last_fired_at_ms: None,
        }
    }

    fn error_event(ts_ms: i64, id: i64) -> LogEvent {
        let ts = Utc.timestamp_millis_opt(ts_ms).unwrap();
        let mut e = LogEvent::new(ts, ts, LogLevel::Error, "db", "app", "boom");
        e.id = Some(id);
        e
    }

    #[test]
    fn fires_once_then_cooldown_suppresses() {
        let mut eval = AlertEvaluator::new(rule()).unwrap();

        // 5 errors inside 30 seconds: fires exactly once
        let mut fired = Vec::new();
        for i in 0..5 {
            let now = 1_000_000 + i * 6_000;
            if let Some(f) = eval.on_event(&error_event(now, i), now) {
                fired.push(f);
            }
        }
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].count, 5);
        assert_eq!(fired[0].matched_ids.len(), 5);
        assert!(matches!(eval.state(), RuleState::Firing(_)));

        // 5 more inside the cooldown: no second fire
        for i in 5..10 {
            let now = 1_040_000 + i * 1_000;
            assert!(eval.on_event(&error_event(now, i), now).is_none());
        }
        assert!(matches!(eval.state(), RuleState::Cooldown(_)));
    }

    #[test]
    fn refires_after_cooldown_if_still_over() {
        let mut eval = AlertEvaluator::new(rule()).unwrap();
        for i in 0..5 {
            let now = 1_000_000 + i * 1_000;
            eval.on_event(&error_event(now, i), now);
        }
        assert!(matches!(eval.state(), RuleState::Firing(_)));

        // After cooldown, a fresh burst fires again
        let base = 1_000_000 + 301_000;
        let mut fired = Vec::new();
        for i in 0..5 {
            let now = base + i * 1_000;
            if let Some(f) = eval.on_event(&error_event(now, 100 + i), now) {
                fired.push(f);
            }
        }
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn cooldown_expiry_rearms_when_quiet() {
        let mut eval = AlertEvaluator::new(rule()).unwrap();
        for i in 0..5 {
            eval.on_event(&error_event(1_000_000 + i, i), 1_000_000 + i);
        }
        assert!(matches!(eval.state(), RuleState::Firing(_)));

        // First tick normalizes Firing into Cooldown; a later one, past the
        // cooldown with an empty window, re-arms
        assert!(eval.tick(1_000_000 + 1_000).is_none());
        assert!(matches!(eval.state(), RuleState::Cooldown(_)));
        assert!(eval.tick(1_000_000 + 400_000).is_none());
        assert_eq!(eval.state(), RuleState::Armed);
    }

    #[test]
    fn non_matching_events_do_not_count() {
        let mut eval = AlertEvaluator::new(rule()).unwrap();
        let ts = Utc.timestamp_millis_opt(1_000_000).unwrap();
        let info = LogEvent::new(ts, ts, LogLevel::Info, "db", "app", "fine");
        for _ in 0..10 {
            assert!(eval.on_event(&info, 1_000_000).is_none());
        }
        assert_eq!(eval.state(), RuleState::Armed);
    }

    #[test]
    fn edit_resets_to_armed_and_discards_counts() {
        let mut eval = AlertEvaluator::new(rule()).unwrap();
        for i in 0..4 {
            eval.on_event(&error_event(1_000_000 + i, i), 1_000_000 + i);
        }
        eval.replace_rule(rule()).unwrap();
        // One more event is not enough: the window restarted at zero
        assert!(eval.on_event(&error_event(1_000_010, 99), 1_000_010).is_none());
        assert_eq!(eval.state(), RuleState::Armed);
    }

    #[test]
    fn less_than_comparator() {
        let mut r = rule();
        r.comparator = "<".to_string();
        r.threshold = 3;
        let mut eval = AlertEvaluator::new(r).unwrap();
        // Zero matching events: 0 < 3 holds on first evaluation
        let fired = eval.tick(2_000_000);
        assert!(fired.is_some());
    }

    #[test]
    fn unknown_comparator_rejected() {
        let mut r = rule();
        r.comparator = "!=".to_string();
        assert!(matches!(AlertEvaluator::new(r), Err(Error::BadComparator(_))));
    }
}
