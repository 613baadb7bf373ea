//! Mutant triage: observe surviving mutants and classify them against the original.

pub mod checkout;
pub mod config;
pub mod engine;
pub mod events;
pub mod machine;
pub mod records;
/// Machine-readable verdict summaries.
pub mod report;
pub mod runner;
pub mod state;
pub mod store;

pub use checkout::{
    Artifact, ArtifactCheckout, ArtifactDirectory, ArtifactSource, FileArtifact, MemoryArtifact,
    RestoreError,
};
pub use config::{ConfigError, DEFAULT_CONFIG_FILE, TriageConfig};
pub use engine::{
    CommandInstrumentor, CommandMutator, CommandTestRunner, ExecutionError, InstrumentationError,
    Instrumentor, Mutator, RunOutcome, TestRun, TestRunner,
};
pub use events::{TriageEvent, now_timestamp_ms};
pub use machine::{IllegalTransition, MethodMachine, VariantPhase};
pub use records::{
    MethodClassification, MethodLocation, MethodReport, MethodUnderTest, MutationCandidate,
    MutationStatus, ReportError, load_method_report, parse_method_report,
};
pub use report::{MutantReport, RunSummary, render_summary, summary_document};
#[cfg(feature = "cli")]
pub use runner::install_signal_handler;
pub use runner::{
    Collaborators, ExecutionRecord, MethodOutcome, MutantOutcome, MutantVerdict,
    OrchestrationError, Orchestrator, PointDiff, RunResult, compare_variants, load_run_status,
    render_run_summary, run_observation,
};
pub use state::{MethodState, MutantStatus, RunSnapshot, StateError, append_event, replay_events};
pub use store::{
    ObservationLayout, PointRecord, SnapshotStore, StoreError, VariantLabel, read_json,
    read_point_records, write_json, write_point_record,
};
