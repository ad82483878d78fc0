//! Signal matching engine
//!
//! `SignalMatcher` holds the active rule set and the per-rule match state.
//! It is shared between the monitoring worker (the only caller of
//! [`evaluate`](SignalMatcher::evaluate)) and any number of readers taking
//! snapshots for display.
//!
//! A rule's state only changes when a frame with the rule's CAN ID arrives,
//! so the displayed state always reflects the most recent relevant
//! observation. Reloading swaps the whole table at once: a concurrent
//! evaluation sees either the old or the new rule set, never a mix.

use crate::rules::{validate_rules, SignalRule};
use crate::types::{ConfigError, Frame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Match state of one rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleState {
    pub matched: bool,
    /// Timestamp of the last frame that evaluated this rule
    pub last_updated: Option<Instant>,
}

/// A rule whose matched flag flipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleChange {
    /// Rule set generation the index refers to
    pub generation: u64,
    pub index: usize,
    pub name: String,
    pub matched: bool,
}

/// Rule and state pair as seen by a reader
#[derive(Debug, Clone, PartialEq)]
pub struct SignalStatus {
    pub rule: SignalRule,
    pub state: RuleState,
}

/// Consistent copy of the matcher contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatcherSnapshot {
    pub generation: u64,
    pub signals: Vec<SignalStatus>,
}

impl MatcherSnapshot {
    /// Number of rules currently matched
    pub fn matched_count(&self) -> usize {
        self.signals.iter().filter(|s| s.state.matched).count()
    }
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    /// Frames passed to `evaluate`
    pub frames_evaluated: u64,
    /// Frames whose ID had at least one rule
    pub frames_routed: u64,
}

type ChangeObserver = Box<dyn Fn(&RuleChange) + Send + Sync>;

struct RuleTable {
    generation: u64,
    rules: Vec<SignalRule>,
    states: Vec<RuleState>,
    /// CAN ID -> rule indices, in rule order
    by_id: HashMap<u32, Vec<usize>>,
}

impl RuleTable {
    fn build(generation: u64, rules: Vec<SignalRule>) -> Self {
        let mut by_id: HashMap<u32, Vec<usize>> = HashMap::new();
        for (index, signal) in rules.iter().enumerate() {
            by_id.entry(signal.rule.id()).or_default().push(index);
        }

        Self {
            generation,
            states: vec![RuleState::default(); rules.len()],
            rules,
            by_id,
        }
    }
}

/// Classifies frames against the active rule set
pub struct SignalMatcher {
    table: Mutex<RuleTable>,
    observers: Mutex<Vec<ChangeObserver>>,
    frames_evaluated: AtomicU64,
    frames_routed: AtomicU64,
}

impl SignalMatcher {
    /// Create a matcher with no rules
    pub fn new() -> Self {
        Self {
            table: Mutex::new(RuleTable::build(0, Vec::new())),
            observers: Mutex::new(Vec::new()),
            frames_evaluated: AtomicU64::new(0),
            frames_routed: AtomicU64::new(0),
        }
    }

    fn table(&self) -> MutexGuard<'_, RuleTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active rule set
    ///
    /// All rules are validated first. On error nothing changes and the
    /// previous rules stay active. On success every rule starts unmatched.
    pub fn load_rules(&self, rules: Vec<SignalRule>) -> Result<(), ConfigError> {
        if let Err(e) = validate_rules(&rules) {
            log::warn!("Rejected rule set: {}", e);
            return Err(e);
        }

        let count = rules.len();
        let mut table = self.table();
        let generation = table.generation + 1;
        *table = RuleTable::build(generation, rules);
        drop(table);

        log::info!("Loaded {} rules (generation {})", count, generation);
        Ok(())
    }

    /// Register a callback for matched/unmatched flips
    ///
    /// Callbacks run on the evaluating thread, after the rule table lock has
    /// been released and before `evaluate` returns. They run while the
    /// observer list is locked, so they must not register further observers.
    pub fn on_change<F>(&self, observer: F)
    where
        F: Fn(&RuleChange) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Evaluate one frame against every rule listening to its ID
    ///
    /// Returns the number of rules evaluated. Rules for other IDs keep their
    /// previous state.
    pub fn evaluate(&self, frame: &Frame) -> usize {
        self.frames_evaluated.fetch_add(1, Ordering::Relaxed);

        let mut changes = Vec::new();
        let evaluated = {
            let mut table = self.table();
            let table = &mut *table;
            let Some(indices) = table.by_id.get(&frame.id) else {
                log::trace!("No rules for CAN ID 0x{:X}", frame.id);
                return 0;
            };

            for &index in indices {
                let matched = table.rules[index].rule.matches(frame);
                let state = &mut table.states[index];
                if state.matched != matched {
                    changes.push(RuleChange {
                        generation: table.generation,
                        index,
                        name: table.rules[index].name.clone(),
                        matched,
                    });
                }
                state.matched = matched;
                state.last_updated = Some(frame.timestamp);
            }
            indices.len()
        };
        self.frames_routed.fetch_add(1, Ordering::Relaxed);

        if !changes.is_empty() {
            let observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            for change in &changes {
                log::debug!(
                    "Signal '{}' -> {}",
                    change.name,
                    if change.matched { "matched" } else { "unmatched" }
                );
                for observer in observers.iter() {
                    observer(change);
                }
            }
        }

        evaluated
    }

    /// Copy the current rules and states
    pub fn snapshot(&self) -> MatcherSnapshot {
        let table = self.table();
        MatcherSnapshot {
            generation: table.generation,
            signals: table
                .rules
                .iter()
                .zip(&table.states)
                .map(|(rule, state)| SignalStatus {
                    rule: rule.clone(),
                    state: *state,
                })
                .collect(),
        }
    }

    /// State of the rule at `index`, if it exists
    pub fn state(&self, index: usize) -> Option<RuleState> {
        self.table().states.get(index).copied()
    }

    /// Matched flags in rule order
    pub fn matched_flags(&self) -> Vec<bool> {
        self.table().states.iter().map(|s| s.matched).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.table().rules.len()
    }

    /// Number of successful loads so far
    pub fn generation(&self) -> u64 {
        self.table().generation
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            frames_evaluated: self.frames_evaluated.load(Ordering::Relaxed),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
        }
    }
}

impl Default for SignalMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MatchRule;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    fn frame(id: u32, data: &[u8]) -> Frame {
        Frame::new(id, data).unwrap()
    }

    fn scenario_rules() -> Vec<SignalRule> {
        vec![
            SignalRule::new(
                "Ignition",
                MatchRule::Exact {
                    id: 0x123,
                    expected_data: vec![1, 2, 3, 4, 5, 6, 7, 8],
                },
            ),
            SignalRule::new(
                "Throttle",
                MatchRule::Range {
                    id: 0x456,
                    byte_index: 0,
                    min_value: 10,
                    max_value: 50,
                },
            ),
        ]
    }

    #[test]
    fn test_scenario() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();
        assert_eq!(matcher.matched_flags(), vec![false, false]);

        matcher.evaluate(&frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(matcher.matched_flags(), vec![true, false]);

        matcher.evaluate(&frame(0x456, &[30, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(matcher.matched_flags(), vec![true, true]);

        matcher.evaluate(&frame(0x456, &[60, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(matcher.matched_flags(), vec![true, false]);
    }

    #[test]
    fn test_unrelated_ids_leave_state_untouched() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();

        let hit = frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]);
        matcher.evaluate(&hit);
        let before = matcher.state(0).unwrap();

        assert_eq!(matcher.evaluate(&frame(0x789, &[0; 8])), 0);
        assert_eq!(matcher.evaluate(&frame(0x456, &[20])), 1);

        assert_eq!(matcher.state(0), Some(before));
        assert_eq!(before.last_updated, Some(hit.timestamp));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();
        let f = frame(0x456, &[42]);

        matcher.evaluate(&f);
        let once = matcher.snapshot();
        matcher.evaluate(&f);
        let twice = matcher.snapshot();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_shared_id_rules_evaluated_independently() {
        let matcher = SignalMatcher::new();
        matcher
            .load_rules(vec![
                SignalRule::new(
                    "Low",
                    MatchRule::Range {
                        id: 0x200,
                        byte_index: 1,
                        min_value: 0,
                        max_value: 99,
                    },
                ),
                SignalRule::new(
                    "High",
                    MatchRule::Range {
                        id: 0x200,
                        byte_index: 1,
                        min_value: 100,
                        max_value: 255,
                    },
                ),
                SignalRule::new(
                    "Flag",
                    MatchRule::Bit {
                        id: 0x200,
                        byte_index: 0,
                        bit_index: 2,
                        bit_value: true,
                    },
                ),
            ])
            .unwrap();

        assert_eq!(matcher.evaluate(&frame(0x200, &[0b100, 150])), 3);
        assert_eq!(matcher.matched_flags(), vec![false, true, true]);

        matcher.evaluate(&frame(0x200, &[0, 5]));
        assert_eq!(matcher.matched_flags(), vec![true, false, false]);
    }

    #[test]
    fn test_invalid_reload_keeps_previous_rules() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();
        matcher.evaluate(&frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]));

        let bad = vec![
            SignalRule::new("Good", MatchRule::Exact { id: 1, expected_data: vec![] }),
            SignalRule::new(
                "Bad",
                MatchRule::Range {
                    id: 2,
                    byte_index: 9,
                    min_value: 0,
                    max_value: 1,
                },
            ),
        ];
        assert!(matches!(
            matcher.load_rules(bad),
            Err(ConfigError::InvalidRule { index: 1, .. })
        ));

        assert_eq!(matcher.generation(), 1);
        assert_eq!(matcher.rule_count(), 2);
        assert_eq!(matcher.matched_flags(), vec![true, false]);
    }

    #[test]
    fn test_reload_resets_state() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();
        matcher.evaluate(&frame(0x123, &[1, 2, 3, 4, 5, 6, 7, 8]));

        matcher.load_rules(scenario_rules()).unwrap();
        assert_eq!(matcher.generation(), 2);
        assert_eq!(matcher.state(0), Some(RuleState::default()));
    }

    #[test]
    fn test_change_observer_sees_flips_only() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        matcher.on_change(move |change| {
            sink.lock().unwrap().push((change.name.clone(), change.matched));
        });

        matcher.evaluate(&frame(0x456, &[20]));
        matcher.evaluate(&frame(0x456, &[25]));
        matcher.evaluate(&frame(0x456, &[70]));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("Throttle".to_string(), true), ("Throttle".to_string(), false)]
        );
    }

    #[test]
    fn test_stats() {
        let matcher = SignalMatcher::new();
        matcher.load_rules(scenario_rules()).unwrap();

        matcher.evaluate(&frame(0x123, &[0]));
        matcher.evaluate(&frame(0x999, &[0]));

        assert_eq!(
            matcher.stats(),
            MatcherStats {
                frames_evaluated: 2,
                frames_routed: 1
            }
        );
        assert_eq!(matcher.snapshot().matched_count(), 0);
    }

    fn door_rules() -> Vec<SignalRule> {
        vec![
            SignalRule::new("Door", MatchRule::Exact { id: 0x100, expected_data: vec![1] }),
            SignalRule::new(
                "Window",
                MatchRule::Range {
                    id: 0x200,
                    byte_index: 0,
                    min_value: 0,
                    max_value: 50,
                },
            ),
        ]
    }

    fn seat_rules() -> Vec<SignalRule> {
        vec![
            SignalRule::new(
                "Belt",
                MatchRule::Range {
                    id: 0x200,
                    byte_index: 0,
                    min_value: 10,
                    max_value: 20,
                },
            ),
            SignalRule::new(
                "Occupied",
                MatchRule::Bit {
                    id: 0x100,
                    byte_index: 0,
                    bit_index: 0,
                    bit_value: true,
                },
            ),
            SignalRule::new("Heater", MatchRule::Exact { id: 0x100, expected_data: vec![2] }),
        ]
    }

    /// Odd generations load the door rules, even ones the seat rules
    fn rules_for(generation: u64) -> Vec<SignalRule> {
        if generation % 2 == 1 {
            door_rules()
        } else {
            seat_rules()
        }
    }

    #[test]
    fn test_reload_during_evaluation_never_mixes_rule_sets() {
        let matcher = Arc::new(SignalMatcher::new());
        matcher.load_rules(rules_for(1)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        matcher.on_change(move |change| sink.lock().unwrap().push(change.clone()));

        let stop = Arc::new(AtomicBool::new(false));
        let evaluator = {
            let matcher = Arc::clone(&matcher);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let frames = [
                    frame(0x100, &[1]),
                    frame(0x100, &[2]),
                    frame(0x100, &[3]),
                    frame(0x200, &[15]),
                    frame(0x200, &[60]),
                ];
                let mut passes = 0u64;
                loop {
                    for f in &frames {
                        matcher.evaluate(f);
                    }
                    passes += 1;
                    if stop.load(Ordering::Acquire) {
                        return passes;
                    }
                }
            })
        };

        for generation in 2..=200u64 {
            matcher.load_rules(rules_for(generation)).unwrap();

            let snapshot = matcher.snapshot();
            assert_eq!(snapshot.generation, generation);
            let rules: Vec<SignalRule> = snapshot.signals.iter().map(|s| s.rule.clone()).collect();
            assert_eq!(rules, rules_for(generation));
        }

        stop.store(true, Ordering::Release);
        assert!(evaluator.join().unwrap() > 0);

        let changes = seen.lock().unwrap();
        assert!(!changes.is_empty());
        for change in changes.iter() {
            let rules = rules_for(change.generation);
            assert!(
                change.index < rules.len(),
                "generation {} has no rule {}",
                change.generation,
                change.index
            );
            assert_eq!(change.name, rules[change.index].name);
        }

        // Once reloads stop, the states follow the last rule set only
        let snapshot = matcher.snapshot();
        assert_eq!(snapshot.signals.len(), seat_rules().len());
    }
}
