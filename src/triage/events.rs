//! Event model for the append-only triage log.

use serde::{Deserialize, Serialize};

use super::machine::VariantPhase;
use crate::diff::Classification;

/// Log event emitted during orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriageEvent {
    /// New run created.
    RunStarted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Methods selected for observation.
        methods: usize,
    },
    /// Processing of one method began.
    MethodStarted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
        /// Method display name.
        method: String,
        /// Surviving mutants of the method.
        candidates: Vec<String>,
    },
    /// The method's variant lifecycle moved on.
    PhaseChanged {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
        /// New phase.
        phase: VariantPhase,
        /// Mutant involved, for mutant phases.
        #[serde(default)]
        mutant_id: Option<String>,
    },
    /// A mutant was classified.
    MutantObserved {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
        /// Candidate id.
        mutant_id: String,
        /// Merged verdict.
        classification: Classification,
        /// Execution points compared.
        points: usize,
    },
    /// A mutant was not observed.
    MutantSkipped {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
        /// Candidate id.
        mutant_id: String,
        /// Why.
        reason: String,
    },
    /// The method could not be processed past some point.
    MethodSkipped {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
        /// Why.
        reason: String,
    },
    /// Original artifact written back.
    MethodRestored {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Method folder index.
        method_index: usize,
    },
    /// Run interrupted by signal.
    RunInterrupted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Interruption reason.
        reason: String,
    },
    /// Run stopped on a fatal error.
    RunAborted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
        /// Error detail.
        reason: String,
    },
    /// Run finished every selected method.
    RunCompleted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: i64,
    },
}

/// Current UNIX timestamp in milliseconds.
pub fn now_timestamp_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0));
    (duration.as_secs() as i64)
        .saturating_mul(1000)
        .saturating_add(duration.subsec_millis() as i64)
}
