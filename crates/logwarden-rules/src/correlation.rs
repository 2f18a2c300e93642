use logwarden_types::LogEvent;
use serde::Deserialize;
use slab::Slab;
use std::collections::{HashMap, VecDeque};

use crate::matcher::EventMatcher;
use crate::{Error, Result};

/// Open-sequence cap per pattern; the oldest is evicted past this.
pub const MAX_OPEN_SEQUENCES: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationStage {
    /// Serialized `FilterSpec`
    pub query: serde_json::Value,
    pub within_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationPattern {
    pub id: i64,
    pub name: String,
    pub sequence: Vec<CorrelationStage>,
    /// Event field the sequences key on: source, host, category, peer_ip
    pub group_by: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CorrelationMatched {
    pub pattern_id: i64,
    pub pattern_name: String,
    pub group_key: String,
    pub matched_ids: Vec<i64>,
    pub started_at_ms: i64,
    pub completed_at_ms: i64,
}

struct CompiledPattern {
    pattern: CorrelationPattern,
    stages: Vec<EventMatcher>,
    /// Slab keys in open order, oldest first, for cap eviction
    open_order: VecDeque<usize>,
}

/// One open instance: `Waiting(stage_index, started_at, matched_ids)` with a
/// deadline derived from the current stage's window.
struct OpenSequence {
    pattern_index: usize,
    group_key: String,
    stage_index: usize,
    started_at_ms: i64,
    stage_deadline_ms: i64,
    matched_ids: Vec<i64>,
}

/// Bounded in-memory sequencer; instances live only in memory and drop on
/// restart.
pub struct CorrelationEngine {
    patterns: Vec<CompiledPattern>,
    /// Arena of open sequences, indexed by `(pattern, group_key)`
    arena: Slab<OpenSequence>,
    index: HashMap<(usize, String), usize>,
    pub evicted_total: u64,
    pub expired_total: u64,
}

impl CorrelationEngine {
    pub fn new(patterns: Vec<CorrelationPattern>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if pattern.sequence.is_empty() {
                return Err(Error::BadPattern(format!("pattern '{}' has no stages", pattern.name)));
            }
            let stages = pattern
                .sequence
                .iter()
                .map(|stage| {
                    let spec = serde_json::from_value(stage.query.clone())
                        .map_err(|e| Error::BadQuery(e.to_string()))?;
                    EventMatcher::compile(spec)
                })
                .collect::<Result<Vec<_>>>()?;
            compiled.push(CompiledPattern {
                pattern,
                stages,
                open_order: VecDeque::new(),
            });
        }
        Ok(Self {
            patterns: compiled,
            arena: Slab::new(),
            index: HashMap::new(),
            evicted_total: 0,
            expired_total: 0,
        })
    }

    pub fn open_count(&self) -> usize {
        self.arena.len()
    }

    pub fn on_event(&mut self, event: &LogEvent, now_ms: i64) -> Vec<CorrelationMatched> {
        let mut matched = Vec::new();

        for pattern_index in 0..self.patterns.len() {
            if !self.patterns[pattern_index].pattern.enabled {
                continue;
            }
            let Some(group_key) = group_key(&self.patterns[pattern_index].pattern.group_by, event)
            else {
                continue;
            };

            let key = (pattern_index, group_key.clone());
            match self.index.get(&key).copied() {
                Some(slab_key) => {
                    if let Some(result) =
                        self.advance_open(pattern_index, slab_key, &key, event, now_ms)
                    {
                        matched.push(result);
                    }
                }
                None => self.try_open(pattern_index, group_key, event, now_ms),
            }
        }

        matched
    }

    /// Sweep sequences whose current-stage window expired.
    pub fn sweep_expired(&mut self, now_ms: i64) -> usize {
        let expired: Vec<usize> = self
            .arena
            .iter()
            .filter(|(_, seq)| seq.stage_deadline_ms < now_ms)
            .map(|(key, _)| key)
            .collect();
        for slab_key in &expired {
            self.remove_sequence(*slab_key);
        }
        self.expired_total += expired.len() as u64;
        expired.len()
    }

    fn try_open(&mut self, pattern_index: usize, group_key: String, event: &LogEvent, now_ms: i64) {
        if !self.patterns[pattern_index].stages[0].matches(event) {
            return;
        }

        let stage_count = self.patterns[pattern_index].pattern.sequence.len();
        if stage_count == 1 {
            // Degenerate single-stage pattern: opening equals completing,
            // nothing to track
            return;
        }

        if self.patterns[pattern_index].open_order.len() >= MAX_OPEN_SEQUENCES {
            if let Some(oldest) = self.patterns[pattern_index].open_order.front().copied() {
                self.remove_sequence(oldest);
                self.evicted_total += 1;
            }
        }

        let within_ms =
            i64::from(self.patterns[pattern_index].pattern.sequence[0].within_seconds) * 1000;
        let seq = OpenSequence {
            pattern_index,
            group_key: group_key.clone(),
            stage_index: 1,
            started_at_ms: now_ms,
            stage_deadline_ms: now_ms + within_ms,
            matched_ids: event.id.into_iter().collect(),
        };

        let slab_key = self.arena.insert(seq);
        self.index.insert((pattern_index, group_key), slab_key);
        self.patterns[pattern_index].open_order.push_back(slab_key);
    }

    fn advance_open(
        &mut self,
        pattern_index: usize,
        slab_key: usize,
        key: &(usize, String),
        event: &LogEvent,
        now_ms: i64,
    ) -> Option<CorrelationMatched> {
        let expired = self.arena[slab_key].stage_deadline_ms < now_ms;
        if expired {
            self.remove_sequence(slab_key);
            self.expired_total += 1;
            // The same event may legitimately restart the sequence
            self.try_open(pattern_index, key.1.clone(), event, now_ms);
            return None;
        }

        let stage_index = self.arena[slab_key].stage_index;
        if !self.patterns[pattern_index].stages[stage_index].matches(event) {
            return None;
        }

        let next_stage = {
            let seq = &mut self.arena[slab_key];
            if let Some(id) = event.id {
                seq.matched_ids.push(id);
            }
            seq.stage_index += 1;
            seq.stage_index
        };

        let stage_count = self.patterns[pattern_index].pattern.sequence.len();
        if next_stage >= stage_count {
            let (pattern_id, pattern_name) = {
                let p = &self.patterns[pattern_index].pattern;
                (p.id, p.name.clone())
            };
            let seq = self.remove_sequence(slab_key)?;
            return Some(CorrelationMatched {
                pattern_id,
                pattern_name,
                group_key: seq.group_key,
                matched_ids: seq.matched_ids,
                started_at_ms: seq.started_at_ms,
                completed_at_ms: now_ms,
            });
        }

        // Next stage's window starts now
        let within_ms =
            i64::from(self.patterns[pattern_index].pattern.sequence[next_stage].within_seconds)
                * 1000;
        self.arena[slab_key].stage_deadline_ms = now_ms + within_ms;
        None
    }

    fn remove_sequence(&mut self, slab_key: usize) -> Option<OpenSequence> {
        let seq = self.arena.try_remove(slab_key)?;
        self.index.remove(&(seq.pattern_index, seq.group_key.clone()));
        self.patterns[seq.pattern_index]
            .open_order
            .retain(|k| *k != slab_key);
        Some(seq)
    }
}

fn group_key(field: &str, event: &LogEvent) -> Option<String> {
    match field {
        "source" => Some(event.source.clone()),
        "category" => Some(event.category.clone()),
        "host" => event.host.clone(),
        "peer_ip" => event.peer_ip.map(|ip| ip.to_string()),
        "level" => Some(event.level.as_str().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logwarden_types::LogLevel;

    fn pattern() -> CorrelationPattern {
        CorrelationPattern {
            id: 1,
            name: "failed then locked".to_string(),
            sequence: vec![
                CorrelationStage {
                    query: serde_json::json!({"text": "login failed"}),
                    within_seconds: 60,
                },
                CorrelationStage {
                    query: serde_json::json!({"text": "account locked"}),
                    within_seconds: 60,
                },
            ],
            group_by: "source".to_string(),
            enabled: true,
        }
    }

    fn event(ts_ms: i64, id: i64, source: &str, message: &str) -> LogEvent {
        let ts = Utc.timestamp_millis_opt(ts_ms).unwrap();
        let mut e = LogEvent::new(ts, ts, LogLevel::Warn, source, "auth", message);
        e.id = Some(id);
        e
    }

    #[test]
    fn two_stage_sequence_completes() {
        let mut engine = CorrelationEngine::new(vec![pattern()]).unwrap();

        assert!(engine
            .on_event(&event(1_000, 1, "web-1", "login failed for bob"), 1_000)
            .is_empty());
        assert_eq!(engine.open_count(), 1);

        let matched = engine.on_event(&event(30_000, 2, "web-1", "account locked: bob"), 30_000);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].matched_ids, vec![1, 2]);
        assert_eq!(matched[0].group_key, "web-1");
        assert_eq!(engine.open_count(), 0);
    }

    #[test]
    fn group_keys_are_independent() {
        let mut engine = CorrelationEngine::new(vec![pattern()]).unwrap();
        engine.on_event(&event(1_000, 1, "web-1", "login failed"), 1_000);
        // Stage 2 from a different source must not complete web-1's sequence
        let matched = engine.on_event(&event(2_000, 2, "web-2", "account locked"), 2_000);
        assert!(matched.is_empty());
        assert_eq!(engine.open_count(), 1);
    }

    #[test]
    fn expired_window_drops_sequence() {
        let mut engine = CorrelationEngine::new(vec![pattern()]).unwrap();
        engine.on_event(&event(1_000, 1, "web-1", "login failed"), 1_000);

        // 61 seconds later: stage window (60 s) has expired
        let matched = engine.on_event(&event(62_000, 2, "web-1", "account locked"), 62_000);
        assert!(matched.is_empty());
        assert_eq!(engine.expired_total, 1);
    }

    #[test]
    fn sweep_drops_stale_sequences() {
        let mut engine = CorrelationEngine::new(vec![pattern()]).unwrap();
        engine.on_event(&event(1_000, 1, "a", "login failed"), 1_000);
        engine.on_event(&event(1_000, 2, "b", "login failed"), 1_000);
        assert_eq!(engine.sweep_expired(120_000), 2);
        assert_eq!(engine.open_count(), 0);
    }

    #[test]
    fn non_first_stage_event_does_not_open() {
        let mut engine = CorrelationEngine::new(vec![pattern()]).unwrap();
        engine.on_event(&event(1_000, 1, "web-1", "account locked"), 1_000);
        assert_eq!(engine.open_count(), 0);
    }

    #[test]
    fn empty_pattern_rejected() {
        let mut p = pattern();
        p.sequence.clear();
        assert!(matches!(
            CorrelationEngine::new(vec![p]),
            Err(Error::BadPattern(_))
        ));
    }
}
