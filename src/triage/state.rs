//! Event replay and run-state projection.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use thiserror::Error;

use super::events::TriageEvent;
use super::machine::VariantPhase;
use crate::diff::Classification;

/// Derived status of one mutant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutantStatus {
    /// Listed for the method, not processed yet.
    Pending,
    /// Classified.
    Classified(Classification),
    /// Not observed.
    Skipped(String),
}

/// Per-method state in a replay snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodState {
    /// Method display name.
    pub method: String,
    /// Last recorded phase.
    pub phase: VariantPhase,
    /// How many restore events were logged.
    pub restores: usize,
    /// Skip reason, if the method stopped early.
    pub skipped: Option<String>,
    /// Mutants by id.
    pub mutants: BTreeMap<String, MutantStatus>,
}

/// Materialized run state derived from `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    /// Run id.
    pub run_id: String,
    /// Methods selected when the run started.
    pub selected_methods: usize,
    /// Methods by folder index.
    pub methods: BTreeMap<usize, MethodState>,
    /// Number of malformed event lines ignored.
    pub malformed_lines: usize,
    /// Whether an interruption event has occurred.
    pub interrupted: bool,
    /// Fatal error that stopped the run, if any.
    pub aborted: Option<String>,
    /// Whether a completion event has occurred.
    pub completed: bool,
}

impl RunSnapshot {
    /// Methods whose artifact was changed but never restored.
    pub fn unrestored_methods(&self) -> Vec<usize> {
        self.methods
            .iter()
            .filter(|(_, state)| state.restores == 0 && state.phase != VariantPhase::Idle)
            .map(|(index, _)| *index)
            .collect()
    }

    /// Mutants across all methods with their status.
    pub fn mutants(&self) -> impl Iterator<Item = (&str, &MutantStatus)> {
        self.methods
            .values()
            .flat_map(|method| method.mutants.iter().map(|(id, status)| (id.as_str(), status)))
    }
}

/// State replay errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Replay event log from `events.jsonl` into a snapshot.
pub fn replay_events(events_path: &Path) -> Result<RunSnapshot, StateError> {
    let file = std::fs::File::open(events_path)?;
    let reader = BufReader::new(file);
    let mut snapshot = RunSnapshot::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TriageEvent>(&line) {
            Ok(event) => apply_event(&mut snapshot, event),
            Err(_) => snapshot.malformed_lines += 1,
        }
    }
    Ok(snapshot)
}

fn apply_event(snapshot: &mut RunSnapshot, event: TriageEvent) {
    match event {
        TriageEvent::RunStarted { run_id, methods, .. } => {
            if snapshot.run_id.is_empty() {
                snapshot.run_id = run_id;
            }
            snapshot.selected_methods = methods;
        }
        TriageEvent::MethodStarted {
            method_index,
            method,
            candidates,
            ..
        } => {
            snapshot.methods.insert(
                method_index,
                MethodState {
                    method,
                    phase: VariantPhase::Idle,
                    restores: 0,
                    skipped: None,
                    mutants: candidates
                        .into_iter()
                        .map(|id| (id, MutantStatus::Pending))
                        .collect(),
                },
            );
        }
        TriageEvent::PhaseChanged {
            method_index, phase, ..
        } => {
            if let Some(state) = snapshot.methods.get_mut(&method_index) {
                state.phase = phase;
            }
        }
        TriageEvent::MutantObserved {
            method_index,
            mutant_id,
            classification,
            ..
        } => {
            if let Some(state) = snapshot.methods.get_mut(&method_index) {
                state
                    .mutants
                    .insert(mutant_id, MutantStatus::Classified(classification));
            }
        }
        TriageEvent::MutantSkipped {
            method_index,
            mutant_id,
            reason,
            ..
        } => {
            if let Some(state) = snapshot.methods.get_mut(&method_index) {
                state.mutants.insert(mutant_id, MutantStatus::Skipped(reason));
            }
        }
        TriageEvent::MethodSkipped {
            method_index,
            reason,
            ..
        } => {
            if let Some(state) = snapshot.methods.get_mut(&method_index) {
                state.skipped = Some(reason);
            }
        }
        TriageEvent::MethodRestored { method_index, .. } => {
            if let Some(state) = snapshot.methods.get_mut(&method_index) {
                state.restores += 1;
                state.phase = VariantPhase::Restored;
            }
        }
        TriageEvent::RunInterrupted { .. } => snapshot.interrupted = true,
        TriageEvent::RunAborted { reason, .. } => snapshot.aborted = Some(reason),
        TriageEvent::RunCompleted { .. } => snapshot.completed = true,
    }
}

/// Append one event as JSONL line.
pub fn append_event(events_path: &Path, event: &TriageEvent) -> Result<(), StateError> {
    if let Some(parent) = events_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(events_path)?;
    let json = serde_json::to_string(event)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::triage::events::now_timestamp_ms;

    fn started(run_id: &str) -> TriageEvent {
        TriageEvent::RunStarted {
            run_id: run_id.to_string(),
            timestamp_ms: now_timestamp_ms(),
            methods: 1,
        }
    }

    fn method_started(index: usize) -> TriageEvent {
        TriageEvent::MethodStarted {
            run_id: "run-1".to_string(),
            timestamp_ms: now_timestamp_ms(),
            method_index: index,
            method: "pkg.Calc.add(II)I".to_string(),
            candidates: vec!["m#0".to_string(), "m#1".to_string()],
        }
    }

    #[test]
    fn replay_is_deterministic() {
        let tmp = tempdir().expect("tempdir should be created");
        let events_path = tmp.path().join("events.jsonl");
        append_event(&events_path, &started("run-1")).expect("run started should append");
        append_event(&events_path, &method_started(0)).expect("method started should append");

        let a = replay_events(&events_path).expect("first replay should work");
        let b = replay_events(&events_path).expect("second replay should work");
        assert_eq!(a, b);
        assert_eq!(a.methods[&0].mutants.len(), 2);
    }

    #[test]
    fn malformed_tail_is_ignored() {
        let tmp = tempdir().expect("tempdir should be created");
        let events_path = tmp.path().join("events.jsonl");
        append_event(&events_path, &started("run-1")).expect("run started should append");

        let mut file = OpenOptions::new()
            .append(true)
            .open(&events_path)
            .expect("events file should open");
        file.write_all(b"{bad json\n").expect("malformed tail should write");

        let snapshot = replay_events(&events_path).expect("replay should ignore malformed line");
        assert_eq!(snapshot.malformed_lines, 1);
        assert_eq!(snapshot.run_id, "run-1");
    }

    #[test]
    fn replay_tracks_verdicts_restores_and_interruptions() {
        let tmp = tempdir().expect("tempdir should be created");
        let events_path = tmp.path().join("events.jsonl");
        let events = [
            started("run-1"),
            method_started(0),
            TriageEvent::PhaseChanged {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                method_index: 0,
                phase: VariantPhase::OriginalInstalled,
                mutant_id: None,
            },
            TriageEvent::MutantObserved {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                method_index: 0,
                mutant_id: "m#0".to_string(),
                classification: Classification::Distinguishable,
                points: 2,
            },
            TriageEvent::MutantSkipped {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                method_index: 0,
                mutant_id: "m#1".to_string(),
                reason: "mutation could not be applied".to_string(),
            },
            TriageEvent::MethodRestored {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                method_index: 0,
            },
            TriageEvent::RunInterrupted {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                reason: "signal".to_string(),
            },
        ];
        for event in &events {
            append_event(&events_path, event).expect("event should append");
        }

        let snapshot = replay_events(&events_path).expect("replay should work");
        let method = &snapshot.methods[&0];
        assert_eq!(method.restores, 1);
        assert_eq!(method.phase, VariantPhase::Restored);
        assert_eq!(
            method.mutants["m#0"],
            MutantStatus::Classified(Classification::Distinguishable)
        );
        assert!(matches!(method.mutants["m#1"], MutantStatus::Skipped(_)));
        assert!(snapshot.interrupted);
        assert!(!snapshot.completed);
        assert!(snapshot.unrestored_methods().is_empty());
    }

    #[test]
    fn installed_but_unrestored_method_is_flagged() {
        let tmp = tempdir().expect("tempdir should be created");
        let events_path = tmp.path().join("events.jsonl");
        append_event(&events_path, &started("run-1")).expect("append");
        append_event(&events_path, &method_started(3)).expect("append");
        append_event(
            &events_path,
            &TriageEvent::PhaseChanged {
                run_id: "run-1".to_string(),
                timestamp_ms: now_timestamp_ms(),
                method_index: 3,
                phase: VariantPhase::MutantInstalled,
                mutant_id: Some("m#0".to_string()),
            },
        )
        .expect("append");

        let snapshot = replay_events(&events_path).expect("replay should work");
        assert_eq!(snapshot.unrestored_methods(), vec![3]);
    }
}
