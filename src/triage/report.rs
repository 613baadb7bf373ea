//! Run summaries rendered from a replayed event log.

use serde::Serialize;

use super::state::{MutantStatus, RunSnapshot};
use crate::diff::Classification;

/// Aggregated verdict counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Methods selected for observation.
    pub methods: usize,
    /// Methods that stopped early.
    pub methods_skipped: usize,
    /// Mutants listed across started methods.
    pub mutants: usize,
    /// Mutants whose observations matched the original.
    pub equivalent: usize,
    /// Mutants with an observable difference.
    pub distinguishable: usize,
    /// Mutants that could not be compared.
    pub incomparable: usize,
    /// Mutants not observed.
    pub skipped: usize,
    /// Mutants never reached.
    pub pending: usize,
    /// Methods whose artifact may still be modified.
    pub unrestored: Vec<usize>,
}

impl RunSummary {
    /// Build summary from snapshot.
    pub fn from_snapshot(snapshot: &RunSnapshot) -> Self {
        let mut out = Self {
            methods: snapshot.selected_methods,
            methods_skipped: snapshot
                .methods
                .values()
                .filter(|method| method.skipped.is_some())
                .count(),
            unrestored: snapshot.unrestored_methods(),
            ..Self::default()
        };

        for (_, status) in snapshot.mutants() {
            out.mutants += 1;
            match status {
                MutantStatus::Classified(Classification::Equivalent) => out.equivalent += 1,
                MutantStatus::Classified(Classification::Distinguishable) => {
                    out.distinguishable += 1
                }
                MutantStatus::Classified(Classification::Incomparable) => out.incomparable += 1,
                MutantStatus::Skipped(_) => out.skipped += 1,
                MutantStatus::Pending => out.pending += 1,
            }
        }
        out
    }
}

/// Per-mutant report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutantReport {
    /// Method folder index.
    pub method_index: usize,
    /// Candidate id.
    pub id: String,
    /// `equivalent`, `distinguishable`, `incomparable`, `skipped` or `pending`.
    pub status: String,
    /// Skip reason.
    pub reason: Option<String>,
}

fn mutant_reports(snapshot: &RunSnapshot) -> Vec<MutantReport> {
    snapshot
        .methods
        .iter()
        .flat_map(|(index, method)| {
            method.mutants.iter().map(move |(id, status)| {
                let (status, reason) = match status {
                    MutantStatus::Classified(classification) => {
                        (classification.as_str().to_string(), None)
                    }
                    MutantStatus::Skipped(reason) => ("skipped".to_string(), Some(reason.clone())),
                    MutantStatus::Pending => ("pending".to_string(), None),
                };
                MutantReport {
                    method_index: *index,
                    id: id.clone(),
                    status,
                    reason,
                }
            })
        })
        .collect()
}

/// JSON document written to `summary.json`.
pub fn summary_document(snapshot: &RunSnapshot) -> serde_json::Value {
    serde_json::json!({
        "run_id": snapshot.run_id,
        "completed": snapshot.completed,
        "interrupted": snapshot.interrupted,
        "aborted": snapshot.aborted,
        "malformed_lines": snapshot.malformed_lines,
        "summary": RunSummary::from_snapshot(snapshot),
        "mutants": mutant_reports(snapshot),
    })
}

/// Pretty-printed summary document.
pub fn render_summary(snapshot: &RunSnapshot) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&summary_document(snapshot))
}
