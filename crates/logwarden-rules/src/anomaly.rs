use logwarden_types::{LogEvent, LogLevel};
use std::collections::HashMap;

pub const EWMA_ALPHA: f64 = 0.1;
pub const DEFAULT_K: f64 = 3.0;
pub const ANOMALY_COOLDOWN_MINUTES: i64 = 10;

/// Consecutive over-threshold minutes required before flagging.
const CONSECUTIVE_REQUIRED: u32 = 2;

/// Minutes of history before a model is trusted to flag at all.
const WARMUP_BUCKETS: u64 = 5;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnomalyFlagged {
    pub source: String,
    pub level: LogLevel,
    pub minute: i64,
    pub observed: u64,
    pub mean: f64,
    pub z_score: f64,
}

/// Exponentially-weighted mean/variance of events-per-minute.
#[derive(Debug, Clone)]
struct Model {
    mean: f64,
    var: f64,
    count: u64,
    /// Minute bucket currently accumulating
    current_minute: i64,
    current_count: u64,
    consecutive: u32,
    cooldown_until_minute: i64,
}

impl Model {
    fn new(minute: i64) -> Self {
        Self {
            mean: 0.0,
            var: 0.0,
            count: 0,
            current_minute: minute,
            current_count: 0,
            consecutive: 0,
            cooldown_until_minute: 0,
        }
    }

    /// Close one completed minute: score it against the current model, then
    /// fold it in. Buckets scoring over `k` are excluded from the fold so a
    /// sustained incident does not teach the model that the spike is normal.
    fn finalize_bucket(&mut self, observed: u64, k: f64) -> f64 {
        let x = observed as f64;
        let z = if self.count < WARMUP_BUCKETS {
            0.0
        } else {
            let sd = self.var.sqrt().max(0.5);
            (x - self.mean) / sd
        };

        if z <= k {
            if self.count == 0 {
                self.mean = x;
                self.var = 0.0;
            } else {
                let delta = x - self.mean;
                self.mean += EWMA_ALPHA * delta;
                self.var = (1.0 - EWMA_ALPHA) * (self.var + EWMA_ALPHA * delta * delta);
            }
        }
        self.count += 1;
        z
    }
}

/// Per `(source, level)` rate-anomaly detection over one-minute buckets.
///
/// A pair is flagged when its bucket z-score exceeds `k` for two
/// consecutive minutes, with a ten-minute cooldown before the same pair may
/// flag again.
pub struct AnomalyDetector {
    k: f64,
    models: HashMap<(String, LogLevel), Model>,
}

impl AnomalyDetector {
    pub fn new(k: f64) -> Self {
        Self {
            k,
            models: HashMap::new(),
        }
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn on_event(&mut self, event: &LogEvent) -> Option<AnomalyFlagged> {
        let minute = event.timestamp.timestamp_millis().div_euclid(60_000);
        let key = (event.source.clone(), event.level);
        let model = self
            .models
            .entry(key.clone())
            .or_insert_with(|| Model::new(minute));

        let mut flagged = None;
        if minute > model.current_minute {
            flagged = Self::roll_forward(self.k, &key, model, minute);
        }

        if minute == model.current_minute {
            model.current_count += 1;
        }
        // Late events for an already-finalized minute are dropped from the
        // model; exactness matters less than monotone progress here

        flagged
    }

    /// Finalize every minute between the model's current bucket and `minute`,
    /// feeding zero-count buckets for silent gaps.
    fn roll_forward(
        k: f64,
        key: &(String, LogLevel),
        model: &mut Model,
        minute: i64,
    ) -> Option<AnomalyFlagged> {
        let mut flagged = None;

        while model.current_minute < minute {
            let observed = model.current_count;
            let closed_minute = model.current_minute;
            let z = model.finalize_bucket(observed, k);

            if z > k {
                model.consecutive += 1;
            } else {
                model.consecutive = 0;
            }

            if model.consecutive >= CONSECUTIVE_REQUIRED
                && closed_minute >= model.cooldown_until_minute
            {
                model.cooldown_until_minute = closed_minute + ANOMALY_COOLDOWN_MINUTES;
                model.consecutive = 0;
                flagged = Some(AnomalyFlagged {
                    source: key.0.clone(),
                    level: key.1,
                    minute: closed_minute,
                    observed,
                    mean: model.mean,
                    z_score: z,
                });
            }

            model.current_minute += 1;
            model.current_count = 0;
        }

        flagged
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn burst(detector: &mut AnomalyDetector, minute: i64, count: u64) -> Option<AnomalyFlagged> {
        let mut flagged = None;
        for i in 0..count {
            let ts = Utc.timestamp_millis_opt(minute * 60_000 + i as i64 * 10).unwrap();
            let e = LogEvent::new(ts, ts, LogLevel::Error, "db", "app", "x");
            if let Some(f) = detector.on_event(&e) {
                flagged = Some(f);
            }
        }
        flagged
    }

    #[test]
    fn steady_rate_never_flags() {
        let mut d = AnomalyDetector::default();
        for m in 0..60 {
            assert!(burst(&mut d, m, 10).is_none());
        }
    }

    #[test]
    fn two_consecutive_spikes_flag_once() {
        let mut d = AnomalyDetector::default();
        // Baseline: 10/min for 30 minutes
        for m in 0..30 {
            burst(&mut d, m, 10);
        }
        // Two spiked minutes, then a calm one to close the second spike
        assert!(burst(&mut d, 30, 200).is_none());
        let f1 = burst(&mut d, 31, 200);
        let f2 = burst(&mut d, 32, 10);
        let flagged = f1.or(f2).expect("two consecutive spikes must flag");
        assert_eq!(flagged.source, "db");
        assert!(flagged.z_score > DEFAULT_K);
        assert!(flagged.observed >= 200);
    }

    #[test]
    fn single_spike_does_not_flag() {
        let mut d = AnomalyDetector::default();
        for m in 0..30 {
            burst(&mut d, m, 10);
        }
        assert!(burst(&mut d, 30, 200).is_none());
        // Back to normal immediately: consecutive counter resets
        assert!(burst(&mut d, 31, 10).is_none());
        assert!(burst(&mut d, 32, 10).is_none());
    }

    #[test]
    fn cooldown_suppresses_reflag() {
        let mut d = AnomalyDetector::default();
        for m in 0..30 {
            burst(&mut d, m, 10);
        }
        // Sustained spike: flags once, then cooldown holds for 10 minutes
        let mut flags = 0;
        for m in 30..40 {
            if burst(&mut d, m, 200).is_some() {
                flags += 1;
            }
        }
        assert_eq!(flags, 1);
    }

    #[test]
    fn pairs_are_independent() {
        let mut d = AnomalyDetector::default();
        let ts = Utc.timestamp_millis_opt(0).unwrap();
        let a = LogEvent::new(ts, ts, LogLevel::Error, "db", "app", "x");
        let b = LogEvent::new(ts, ts, LogLevel::Info, "db", "app", "x");
        let c = LogEvent::new(ts, ts, LogLevel::Error, "web", "app", "x");
        d.on_event(&a);
        d.on_event(&b);
        d.on_event(&c);
        assert_eq!(d.model_count(), 3);
    }

    #[test]
    fn warmup_period_never_flags() {
        let mut d = AnomalyDetector::default();
        // Wild swings inside the warmup window
        assert!(burst(&mut d, 0, 1).is_none());
        assert!(burst(&mut d, 1, 500).is_none());
        assert!(burst(&mut d, 2, 500).is_none());
        assert!(burst(&mut d, 3, 1).is_none());
    }
}
