mod alerting;
mod anomaly;
mod buckets;
mod correlation;
mod engine;
mod error;
mod matcher;

pub use alerting::{AlertEvaluator, AlertFired, RuleState};
pub use anomaly::{AnomalyDetector, AnomalyFlagged, ANOMALY_COOLDOWN_MINUTES, DEFAULT_K, EWMA_ALPHA};
pub use buckets::BucketWindow;
pub use correlation::{
    CorrelationEngine, CorrelationMatched, CorrelationPattern, CorrelationStage,
    MAX_OPEN_SEQUENCES,
};
pub use engine::{RuleEngine, RuleOutput};
pub use error::{Error, Result};
pub use matcher::EventMatcher;
