//! Per-method variant lifecycle.
//!
//! ```text
//! Idle -> OriginalInstalled -> OriginalExecuted -> (MutantInstalled -> MutantExecuted)* -> Restored
//! ```
//!
//! Every non-terminal phase may also go straight to `Restored`, which is reached
//! exactly once per method.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase of the artifact currently under manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantPhase {
    /// Nothing installed yet.
    Idle,
    /// Probe-instrumented original installed.
    OriginalInstalled,
    /// Baseline tests have run.
    OriginalExecuted,
    /// A probe-instrumented mutant is installed.
    MutantInstalled,
    /// The mutant's tests have run.
    MutantExecuted,
    /// Original bytes written back.
    Restored,
}

impl VariantPhase {
    /// True if `next` may follow this phase.
    pub fn can_advance_to(self, next: Self) -> bool {
        use VariantPhase::*;
        matches!(
            (self, next),
            (Idle, OriginalInstalled)
                | (OriginalInstalled, OriginalExecuted)
                | (OriginalExecuted, MutantInstalled)
                | (MutantInstalled, MutantExecuted)
                | (MutantExecuted, MutantInstalled)
                | (Idle | OriginalInstalled | OriginalExecuted | MutantInstalled | MutantExecuted, Restored)
        )
    }
}

/// Attempted transition not allowed by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal variant transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    /// Current phase.
    pub from: VariantPhase,
    /// Requested phase.
    pub to: VariantPhase,
}

/// Lifecycle tracker for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodMachine {
    phase: VariantPhase,
    history: Vec<VariantPhase>,
}

impl Default for MethodMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodMachine {
    /// Machine in `Idle`.
    pub fn new() -> Self {
        Self {
            phase: VariantPhase::Idle,
            history: vec![VariantPhase::Idle],
        }
    }

    /// Current phase.
    pub fn phase(&self) -> VariantPhase {
        self.phase
    }

    /// Phases visited so far, starting with `Idle`.
    pub fn history(&self) -> &[VariantPhase] {
        &self.history
    }

    /// Move to `next`, or fail without changing state.
    pub fn advance(&mut self, next: VariantPhase) -> Result<(), IllegalTransition> {
        if !self.phase.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
