//! Observation orchestration (run, status, report).
//!
//! For every selected method the orchestrator installs the probe-instrumented
//! original and runs the candidates' tests against it, then installs and runs each
//! surviving mutant in turn and diffs its observations against the original's. The
//! original artifact is written back exactly once per method, whatever happened in
//! between; a failed restore stops the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;

use super::checkout::{ArtifactCheckout, ArtifactDirectory, ArtifactSource, RestoreError};
use super::config::TriageConfig;
use super::engine::{
    CommandInstrumentor, CommandMutator, CommandTestRunner, ExecutionError, InstrumentationError,
    Instrumentor, Mutator, RunOutcome, TestRun, TestRunner,
};
use super::events::{TriageEvent, now_timestamp_ms};
use super::machine::{IllegalTransition, MethodMachine, VariantPhase};
use super::records::{MethodReport, MethodUnderTest, MutationCandidate, ReportError, load_method_report};
use super::report::{render_summary, summary_document};
use super::state::{RunSnapshot, StateError, append_event, replay_events};
use super::store::{ObservationLayout, SnapshotStore, StoreError, VariantLabel, write_json};
use crate::diff::{Classification, DiffReport, diff};
use crate::probe::ExecutionPointId;

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Run orchestration errors. Each one stops the run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Method report could not be loaded.
    #[error("report error: {0}")]
    Report(#[from] ReportError),
    /// Original artifact could not be written back.
    #[error(transparent)]
    Restore(#[from] RestoreError),
    /// Event log failure.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// Output directory failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Lifecycle violation.
    #[error(transparent)]
    Transition(#[from] IllegalTransition),
    /// Summary serialization failure.
    #[error("summary serialization failed: {0}")]
    Summary(#[from] serde_json::Error),
    /// Signal handler error.
    #[error("signal handler installation failed: {0}")]
    Signal(String),
}

/// External components the orchestrator drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Probe insertion.
    pub instrumentor: &'a dyn Instrumentor,
    /// Mutation application.
    pub mutator: &'a dyn Mutator,
    /// Test execution.
    pub runner: &'a dyn TestRunner,
    /// Artifact lookup.
    pub artifacts: &'a dyn ArtifactSource,
}

/// Diff result of one execution point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointDiff {
    /// Execution point.
    pub point: ExecutionPointId,
    /// Comparison of original and mutant snapshots.
    pub report: DiffReport,
}

/// What became of one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum MutantVerdict {
    /// Observed and compared.
    Classified {
        /// Merged verdict over all execution points.
        classification: Classification,
        /// Why no point could be compared, when that is the case.
        reason: Option<String>,
        /// Per-point comparisons.
        points: Vec<PointDiff>,
    },
    /// Not observed.
    Skipped {
        /// Why.
        reason: String,
    },
}

impl MutantVerdict {
    fn incomparable(reason: impl Into<String>) -> Self {
        Self::Classified {
            classification: Classification::Incomparable,
            reason: Some(reason.into()),
            points: Vec::new(),
        }
    }
}

/// Result for one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutantOutcome {
    /// Candidate id.
    pub id: String,
    /// Position within the method.
    pub ordinal: usize,
    /// Verdict.
    #[serde(flatten)]
    pub verdict: MutantVerdict,
}

impl MutantOutcome {
    /// Merged classification, if the mutant was observed.
    pub fn classification(&self) -> Option<Classification> {
        match &self.verdict {
            MutantVerdict::Classified { classification, .. } => Some(*classification),
            MutantVerdict::Skipped { .. } => None,
        }
    }
}

/// Result for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOutcome {
    /// Method folder index.
    pub index: usize,
    /// Method display name.
    pub method: String,
    /// Mutant results, in candidate order.
    pub mutants: Vec<MutantOutcome>,
    /// Why the method stopped early.
    pub skipped: Option<String>,
    /// Lifecycle phases visited.
    pub phases: Vec<VariantPhase>,
}

/// Observations produced by running one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    /// Installed variant.
    pub variant: VariantLabel,
    /// Tests that were run.
    pub tests: BTreeSet<String>,
    /// Execution points observed; snapshots live in the [`SnapshotStore`].
    pub points: Vec<ExecutionPointId>,
    /// Runner exit summary.
    pub outcome: RunOutcome,
}

/// Original observations that mutants of one test set are compared against.
#[derive(Debug, Clone)]
struct Baseline {
    record: ExecutionRecord,
    requested: BTreeSet<String>,
    /// Tests whose original run produced no observations, with the reason.
    lost: BTreeMap<String, String>,
}

impl Baseline {
    fn complete(requested: BTreeSet<String>, record: ExecutionRecord) -> Self {
        Self {
            record,
            requested,
            lost: BTreeMap::new(),
        }
    }

    fn failed(requested: BTreeSet<String>, variant: VariantLabel, err: &ExecutionError) -> Self {
        let reason = err.to_string();
        Self {
            record: ExecutionRecord {
                variant,
                tests: BTreeSet::new(),
                points: Vec::new(),
                outcome: RunOutcome::default(),
            },
            lost: requested.iter().map(|t| (t.clone(), reason.clone())).collect(),
            requested,
        }
    }

    /// `tests` minus those the original could not observe.
    fn usable(&self, tests: &BTreeSet<String>) -> BTreeSet<String> {
        tests
            .iter()
            .filter(|test| !self.lost.contains_key(*test))
            .cloned()
            .collect()
    }
}

/// Result returned by [`Orchestrator::observe_methods`].
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Run id.
    pub run_id: String,
    /// Output directory.
    pub output_dir: PathBuf,
    /// Processed methods.
    pub methods: Vec<MethodOutcome>,
    /// Whether the run stopped on an interrupt.
    pub interrupted: bool,
    /// Replayed event log at the end of the run.
    pub snapshot: RunSnapshot,
}

fn generate_run_id() -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!("run-{}-{}-{}", now_timestamp_ms(), std::process::id(), seq)
}

/// Install a Ctrl-C handler that sets `flag`. Only the first call installs.
#[cfg(feature = "cli")]
pub fn install_signal_handler(flag: Arc<AtomicBool>) -> Result<(), OrchestrationError> {
    use std::sync::OnceLock;

    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    let result = INIT.get_or_init(|| {
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| e.to_string())
    });

    match result {
        Ok(()) => Ok(()),
        Err(msg) => Err(OrchestrationError::Signal(msg.clone())),
    }
}

/// Drives the variant lifecycle of every selected method.
pub struct Orchestrator<'a> {
    config: &'a TriageConfig,
    collaborators: Collaborators<'a>,
    layout: ObservationLayout,
    run_id: String,
    interrupted: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator writing into `config.output_dir`.
    pub fn new(config: &'a TriageConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
            layout: ObservationLayout::new(&config.output_dir),
            run_id: generate_run_id(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned interrupt flag.
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Flag that stops the run after the method in progress.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Run id of this orchestrator.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn emit(&self, event: TriageEvent) -> Result<(), StateError> {
        append_event(&self.layout.events_path(), &event)
    }

    /// Observe every method of `report` in order.
    pub fn observe_methods(&self, report: &MethodReport) -> Result<RunResult, OrchestrationError> {
        self.layout.reset_run()?;
        write_json(&self.layout.uncovered_path(), &report.uncovered)?;
        self.emit(TriageEvent::RunStarted {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            methods: report.methods.len(),
        })?;
        tracing::info!(
            run_id = %self.run_id,
            methods = report.methods.len(),
            uncovered = report.uncovered.len(),
            output = %self.layout.root().display(),
            "starting observation run"
        );

        let mut methods = Vec::new();
        let mut interrupted = false;
        for (index, method) in report.methods.iter().enumerate() {
            if self.interrupted.load(Ordering::SeqCst) {
                tracing::warn!(run_id = %self.run_id, "interrupt received; stopping before next method");
                self.emit(TriageEvent::RunInterrupted {
                    run_id: self.run_id.clone(),
                    timestamp_ms: now_timestamp_ms(),
                    reason: "received interrupt signal".to_string(),
                })?;
                interrupted = true;
                break;
            }
            if method.candidates.is_empty() {
                tracing::info!(method = %method.location(), "no surviving mutants; skipping method");
                continue;
            }
            match self.observe_method(index, method) {
                Ok(outcome) => methods.push(outcome),
                Err(err) => {
                    tracing::error!(run_id = %self.run_id, error = %err, "aborting run");
                    let _ = self.emit(TriageEvent::RunAborted {
                        run_id: self.run_id.clone(),
                        timestamp_ms: now_timestamp_ms(),
                        reason: err.to_string(),
                    });
                    let _ = self.write_summary();
                    return Err(err);
                }
            }
        }

        if !interrupted {
            self.emit(TriageEvent::RunCompleted {
                run_id: self.run_id.clone(),
                timestamp_ms: now_timestamp_ms(),
            })?;
        }
        let snapshot = self.write_summary()?;
        tracing::info!(run_id = %self.run_id, methods = methods.len(), interrupted, "observation run finished");

        Ok(RunResult {
            run_id: self.run_id.clone(),
            output_dir: self.layout.root().to_path_buf(),
            methods,
            interrupted,
            snapshot,
        })
    }

    fn write_summary(&self) -> Result<RunSnapshot, OrchestrationError> {
        let snapshot = replay_events(&self.layout.events_path())?;
        write_json(&self.layout.summary_path(), &summary_document(&snapshot))?;
        Ok(snapshot)
    }

    /// Observe one method; `index` names its folder.
    pub fn observe_method(
        &self,
        index: usize,
        method: &MethodUnderTest,
    ) -> Result<MethodOutcome, OrchestrationError> {
        let method_name = method.location().to_string();
        self.layout.reset_method(index)?;
        write_json(&self.layout.method_info_path(index), method)?;
        self.emit(TriageEvent::MethodStarted {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            method_index: index,
            method: method_name.clone(),
            candidates: method.candidates.iter().map(|c| c.id.clone()).collect(),
        })?;
        tracing::info!(method_index = index, method = %method_name, candidates = method.candidates.len(), "observing method");

        let mut outcome = MethodOutcome {
            index,
            method: method_name,
            mutants: Vec::new(),
            skipped: None,
            phases: Vec::new(),
        };
        let artifact = self.collaborators.artifacts.artifact_for(method);
        let mut checkout = match ArtifactCheckout::acquire(&*artifact) {
            Ok(checkout) => checkout,
            Err(source) => {
                let err = InstrumentationError::Artifact {
                    location: artifact.location(),
                    source,
                };
                self.skip_remaining(index, method, 0, &mut outcome, err.to_string())?;
                outcome.phases = vec![VariantPhase::Idle];
                return Ok(outcome);
            }
        };

        let mut machine = MethodMachine::new();
        let mut store = SnapshotStore::new();
        let progress = self.run_variants(index, method, &mut checkout, &mut machine, &mut store, &mut outcome);

        let location = checkout.location();
        if let Err(err) = checkout.restore() {
            tracing::error!(method_index = index, error = %err, "restore failed");
            return Err(err.into());
        }
        tracing::debug!(method_index = index, artifact = %location, "original artifact restored");
        self.advance(index, &mut machine, VariantPhase::Restored, None)?;
        self.emit(TriageEvent::MethodRestored {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            method_index: index,
        })?;
        progress?;

        outcome.phases = machine.history().to_vec();
        Ok(outcome)
    }

    fn run_variants(
        &self,
        index: usize,
        method: &MethodUnderTest,
        checkout: &mut ArtifactCheckout<'_>,
        machine: &mut MethodMachine,
        store: &mut SnapshotStore,
        outcome: &mut MethodOutcome,
    ) -> Result<(), OrchestrationError> {
        if let Err(err) = self.install_original(checkout, method) {
            tracing::warn!(method_index = index, error = %err, "probe insertion failed");
            return self.skip_remaining(index, method, 0, outcome, err.to_string());
        }
        self.advance(index, machine, VariantPhase::OriginalInstalled, None)?;

        let baselines = self.run_original(index, method, store);
        self.advance(index, machine, VariantPhase::OriginalExecuted, None)?;

        for (position, candidate) in method.candidates.iter().enumerate() {
            let label = mutant_label(candidate);
            if candidate.tests.is_empty() {
                let verdict = MutantVerdict::incomparable("no test executes this mutant");
                self.finish_mutant(index, candidate, &label, verdict, outcome)?;
                continue;
            }
            let baseline = match self.baseline_for(&baselines, &candidate.tests) {
                Ok(baseline) => baseline,
                Err(reason) => {
                    self.finish_mutant(index, candidate, &label, MutantVerdict::incomparable(reason), outcome)?;
                    continue;
                }
            };
            let tests = baseline.usable(&candidate.tests);

            if let Err(err) = self.install_mutant(checkout, method, candidate) {
                tracing::warn!(method_index = index, mutant = %candidate.id, error = %err, "mutant could not be installed");
                return self.skip_remaining(index, method, position, outcome, err.to_string());
            }
            self.advance(index, machine, VariantPhase::MutantInstalled, Some(&candidate.id))?;
            write_json(&self.layout.mutation_info_path(index, &label), candidate)?;

            let run = self.execute_variant(index, &label, &tests, store);
            self.advance(index, machine, VariantPhase::MutantExecuted, Some(&candidate.id))?;
            let verdict = match run {
                Ok(record) => compare_variants(&baseline.record, &record, store),
                Err(err) => {
                    tracing::warn!(method_index = index, mutant = %candidate.id, error = %err, "mutant run produced no observations");
                    MutantVerdict::incomparable(format!("mutant run failed: {err}"))
                }
            };
            self.finish_mutant(index, candidate, &label, verdict, outcome)?;
            store.discard(&label);
            if !self.config.retain_snapshots {
                self.layout.prune_points(index, &label)?;
            }
        }

        if !self.config.retain_snapshots {
            for baseline in &baselines {
                self.layout.prune_points(index, &baseline.record.variant)?;
            }
        }
        Ok(())
    }

    /// Run the installed original and collect the observations candidates are
    /// compared against.
    ///
    /// With isolated tests every test gets its own run, so one failing test only
    /// costs the candidates that need it. Otherwise invocation counters span the
    /// whole process, and the original is run once per distinct candidate test set.
    fn run_original(
        &self,
        index: usize,
        method: &MethodUnderTest,
        store: &mut SnapshotStore,
    ) -> Vec<Baseline> {
        if self.config.isolate_tests {
            return vec![self.run_original_per_test(index, method.tests(), store)];
        }

        let mut sets: Vec<&BTreeSet<String>> = Vec::new();
        for candidate in &method.candidates {
            if !candidate.tests.is_empty() && !sets.contains(&&candidate.tests) {
                sets.push(&candidate.tests);
            }
        }
        let labels: Vec<VariantLabel> = match sets.len() {
            1 => vec![VariantLabel::Original],
            _ => (0..sets.len()).map(|set| VariantLabel::OriginalSubset { set }).collect(),
        };
        sets
            .into_iter()
            .zip(labels)
            .map(|(tests, label)| match self.execute_variant(index, &label, tests, store) {
                Ok(record) => {
                    tracing::debug!(method_index = index, variant = %label, points = record.points.len(), "original observed");
                    Baseline::complete(tests.clone(), record)
                }
                Err(err) => {
                    tracing::warn!(method_index = index, variant = %label, error = %err, "original run produced no observations");
                    Baseline::failed(tests.clone(), label, &err)
                }
            })
            .collect()
    }

    fn run_original_per_test(
        &self,
        index: usize,
        tests: BTreeSet<String>,
        store: &mut SnapshotStore,
    ) -> Baseline {
        let label = VariantLabel::Original;
        let points_dir = self.layout.points_dir(index, &label);
        let log_path = self.layout.runner_log_path(index, &label);
        let mut outcome = RunOutcome::default();
        let mut lost = BTreeMap::new();
        for test in &tests {
            let single = BTreeSet::from([test.clone()]);
            let run = self.collaborators.runner.run(&TestRun {
                tests: &single,
                variant: &label,
                points_dir: &points_dir,
                log_path: &log_path,
            });
            match run {
                Ok(run) => {
                    outcome.processes += run.processes;
                    outcome.failed += run.failed;
                    if outcome.exit_code.is_none() {
                        outcome.exit_code = run.exit_code;
                    }
                }
                Err(err) => {
                    tracing::warn!(method_index = index, test = %test, error = %err, "original run of test produced no observations");
                    lost.insert(test.clone(), err.to_string());
                }
            }
        }

        let mut points = match store.ingest(&label, &points_dir) {
            Ok(points) => points,
            Err(err) => {
                let err = ExecutionError::from(err);
                tracing::warn!(method_index = index, error = %err, "original observations unreadable");
                return Baseline::failed(tests, label, &err);
            }
        };
        points.retain(|point| !lost.contains_key(&point.scope));
        tracing::debug!(method_index = index, points = points.len(), lost = lost.len(), "original observed");
        Baseline {
            record: ExecutionRecord {
                variant: label,
                tests: tests.iter().filter(|t| !lost.contains_key(*t)).cloned().collect(),
                points,
                outcome,
            },
            requested: tests,
            lost,
        }
    }

    fn baseline_for<'b>(
        &self,
        baselines: &'b [Baseline],
        tests: &BTreeSet<String>,
    ) -> Result<&'b Baseline, String> {
        let found = if self.config.isolate_tests {
            baselines.iter().find(|b| b.requested.is_superset(tests))
        } else {
            baselines.iter().find(|b| b.requested == *tests)
        };
        let baseline = found.ok_or_else(|| "no original run covers this mutant's tests".to_string())?;
        match tests.iter().find_map(|test| baseline.lost.get(test)) {
            Some(reason) if baseline.usable(tests).is_empty() => Err(format!("original run failed: {reason}")),
            _ => Ok(baseline),
        }
    }

    fn install_original(
        &self,
        checkout: &mut ArtifactCheckout<'_>,
        method: &MethodUnderTest,
    ) -> Result<(), InstrumentationError> {
        let instrumented = self
            .collaborators
            .instrumentor
            .insert_probe(checkout.original(), method)?;
        checkout
            .install(&instrumented)
            .map_err(|source| InstrumentationError::Artifact {
                location: checkout.location(),
                source,
            })
    }

    fn install_mutant(
        &self,
        checkout: &mut ArtifactCheckout<'_>,
        method: &MethodUnderTest,
        candidate: &MutationCandidate,
    ) -> Result<(), InstrumentationError> {
        let mutated = self.collaborators.mutator.apply(checkout.original(), candidate)?;
        let instrumented = self.collaborators.instrumentor.insert_probe(&mutated, method)?;
        checkout
            .install(&instrumented)
            .map_err(|source| InstrumentationError::Artifact {
                location: checkout.location(),
                source,
            })
    }

    fn execute_variant(
        &self,
        index: usize,
        variant: &VariantLabel,
        tests: &BTreeSet<String>,
        store: &mut SnapshotStore,
    ) -> Result<ExecutionRecord, ExecutionError> {
        let points_dir = self.layout.points_dir(index, variant);
        let log_path = self.layout.runner_log_path(index, variant);
        let outcome = self.collaborators.runner.run(&TestRun {
            tests,
            variant,
            points_dir: &points_dir,
            log_path: &log_path,
        })?;
        if !outcome.passed() {
            tracing::debug!(
                variant = %variant,
                failed = outcome.failed,
                exit_code = ?outcome.exit_code,
                "some tests failed; keeping their observations"
            );
        }
        let points = store.ingest(variant, &points_dir)?;
        Ok(ExecutionRecord {
            variant: variant.clone(),
            tests: tests.clone(),
            points,
            outcome,
        })
    }

    fn advance(
        &self,
        index: usize,
        machine: &mut MethodMachine,
        phase: VariantPhase,
        mutant_id: Option<&str>,
    ) -> Result<(), OrchestrationError> {
        machine.advance(phase)?;
        tracing::trace!(method_index = index, ?phase, mutant = mutant_id, "phase changed");
        self.emit(TriageEvent::PhaseChanged {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            method_index: index,
            phase,
            mutant_id: mutant_id.map(str::to_string),
        })?;
        Ok(())
    }

    fn finish_mutant(
        &self,
        index: usize,
        candidate: &MutationCandidate,
        label: &VariantLabel,
        verdict: MutantVerdict,
        outcome: &mut MethodOutcome,
    ) -> Result<(), OrchestrationError> {
        let result = MutantOutcome {
            id: candidate.id.clone(),
            ordinal: candidate.ordinal,
            verdict,
        };
        match &result.verdict {
            MutantVerdict::Classified {
                classification,
                points,
                ..
            } => {
                write_json(&self.layout.diff_path(index, label), &result)?;
                tracing::info!(
                    method_index = index,
                    mutant = %candidate.id,
                    %classification,
                    points = points.len(),
                    "mutant classified"
                );
                self.emit(TriageEvent::MutantObserved {
                    run_id: self.run_id.clone(),
                    timestamp_ms: now_timestamp_ms(),
                    method_index: index,
                    mutant_id: candidate.id.clone(),
                    classification: *classification,
                    points: points.len(),
                })?;
            }
            MutantVerdict::Skipped { reason } => {
                self.emit(TriageEvent::MutantSkipped {
                    run_id: self.run_id.clone(),
                    timestamp_ms: now_timestamp_ms(),
                    method_index: index,
                    mutant_id: candidate.id.clone(),
                    reason: reason.clone(),
                })?;
            }
        }
        outcome.mutants.push(result);
        Ok(())
    }

    fn skip_remaining(
        &self,
        index: usize,
        method: &MethodUnderTest,
        from: usize,
        outcome: &mut MethodOutcome,
        reason: String,
    ) -> Result<(), OrchestrationError> {
        for candidate in method.candidates.iter().skip(from) {
            let verdict = MutantVerdict::Skipped {
                reason: reason.clone(),
            };
            self.finish_mutant(index, candidate, &mutant_label(candidate), verdict, outcome)?;
        }
        self.emit(TriageEvent::MethodSkipped {
            run_id: self.run_id.clone(),
            timestamp_ms: now_timestamp_ms(),
            method_index: index,
            reason: reason.clone(),
        })?;
        outcome.skipped = Some(reason);
        Ok(())
    }
}

fn mutant_label(candidate: &MutationCandidate) -> VariantLabel {
    VariantLabel::Mutant {
        ordinal: candidate.ordinal,
        id: candidate.id.clone(),
    }
}

/// Diff every execution point of `mutant` against `baseline`.
///
/// Points seen on only one side are incomparable; original points count only when
/// they are listed in `baseline.points` and belong to a test the mutant also ran.
pub fn compare_variants(
    baseline: &ExecutionRecord,
    mutant: &ExecutionRecord,
    store: &SnapshotStore,
) -> MutantVerdict {
    let original: BTreeSet<&ExecutionPointId> = baseline.points.iter().collect();
    let mut points = Vec::new();
    for point in &mutant.points {
        let report = match (
            original
                .contains(point)
                .then(|| store.load(&baseline.variant, point))
                .flatten(),
            store.load(&mutant.variant, point),
        ) {
            (Some(original), Some(candidate)) => diff(original, candidate),
            _ => DiffReport::incomparable("execution point not observed in the original run"),
        };
        points.push(PointDiff {
            point: point.clone(),
            report,
        });
    }

    let observed: BTreeSet<&ExecutionPointId> = mutant.points.iter().collect();
    for point in &baseline.points {
        if point.is_scoped_to(mutant.tests.iter()) && !observed.contains(point) {
            points.push(PointDiff {
                point: point.clone(),
                report: DiffReport::incomparable("execution point not observed in the mutant run"),
            });
        }
    }

    match Classification::merge_all(points.iter().map(|p| p.report.classification)) {
        Some(classification) => MutantVerdict::Classified {
            classification,
            reason: None,
            points,
        },
        None => MutantVerdict::incomparable("no execution point observed"),
    }
}

/// Run a full observation with the command collaborators described by `config`.
pub fn run_observation(
    config: &TriageConfig,
    interrupt: Arc<AtomicBool>,
) -> Result<RunResult, OrchestrationError> {
    let report = load_method_report(&config.method_report)?;
    let instrumentor = CommandInstrumentor::new(config.instrumentor_command.clone());
    let mutator = CommandMutator::new(config.mutator_command.clone());
    let runner = CommandTestRunner::from_config(config);
    let artifacts = ArtifactDirectory::from_config(config);
    let collaborators = Collaborators {
        instrumentor: &instrumentor,
        mutator: &mutator,
        runner: &runner,
        artifacts: &artifacts,
    };
    Orchestrator::new(config, collaborators)
        .with_interrupt_flag(interrupt)
        .observe_methods(&report)
}

/// Replay the event log of the run in `config.output_dir`.
pub fn load_run_status(config: &TriageConfig) -> Result<RunSnapshot, OrchestrationError> {
    let layout = ObservationLayout::new(&config.output_dir);
    Ok(replay_events(&layout.events_path())?)
}

/// Summary document of the run in `config.output_dir`, pretty-printed.
pub fn render_run_summary(config: &TriageConfig) -> Result<String, OrchestrationError> {
    let snapshot = load_run_status(config)?;
    Ok(render_summary(&snapshot)?)
}
