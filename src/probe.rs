//! Probe runtime linked into the code under test.
//!
//! An instrumented method calls [`observe_method_call`] right before it returns. The
//! call is captured into a [`Snapshot`](crate::snapshot::Snapshot) and persisted as a
//! point file in the results directory the orchestrator announced through the
//! environment. Without that environment the probe does nothing.
//!
//! Invocation counters are kept per test scope, so the `n`-th call of a method within
//! one test gets the same [`ExecutionPointId`] in the original and in every mutant run.
//! Calls made from several threads within one test are numbered in completion order.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::capture::{CallObservation, CaptureLimits, Observe, capture_call};
use crate::triage::store::{PointRecord, StoreError, write_point_record};

/// Directory where point files are written.
pub const RESULTS_DIR_ENV: &str = "MUTANT_TRIAGE_RESULTS_DIR";
/// Variant label recorded in every point file.
pub const VARIANT_ENV: &str = "MUTANT_TRIAGE_VARIANT";
/// Initial test scope.
pub const TEST_ID_ENV: &str = "MUTANT_TRIAGE_TEST_ID";
/// Capture depth limit.
pub const MAX_DEPTH_ENV: &str = "MUTANT_TRIAGE_MAX_DEPTH";
/// Capture node budget.
pub const MAX_NODES_ENV: &str = "MUTANT_TRIAGE_MAX_NODES";

/// Static location of an instrumented method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite<'a> {
    /// Qualified class or type name.
    pub class: &'a str,
    /// Method name.
    pub method: &'a str,
    /// Signature descriptor.
    pub descriptor: &'a str,
}

/// Stable identity of one method execution within one test.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionPointId {
    /// Test that produced the call; empty when the harness announced no test.
    pub scope: String,
    /// Qualified class name.
    pub class: String,
    /// Method name.
    pub method: String,
    /// Signature descriptor.
    pub descriptor: String,
    /// Zero-based invocation index of this method within the scope.
    pub invocation: u32,
}

impl ExecutionPointId {
    /// FNV-1a hash of the canonical form; stable across processes and platforms.
    pub fn stable_hash(&self) -> u64 {
        const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
        const PRIME: u64 = 0x100000001b3;

        let mut hash = OFFSET_BASIS;
        for b in self.to_string().as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        hash
    }

    /// True when this point belongs to one of `tests`.
    pub fn is_scoped_to<'t>(&self, mut tests: impl Iterator<Item = &'t String>) -> bool {
        tests.any(|test| *test == self.scope)
    }
}

impl fmt::Display for ExecutionPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.scope, self.class, self.method, self.descriptor, self.invocation
        )
    }
}

#[derive(Debug, Default)]
struct ProbeState {
    scope: String,
    counters: HashMap<(String, String, String), u32>,
}

/// Destination and counters of one probe-enabled process.
#[derive(Debug)]
pub struct ProbeSink {
    points_dir: PathBuf,
    variant: String,
    limits: CaptureLimits,
    state: Mutex<ProbeState>,
}

impl ProbeSink {
    /// Sink writing point files for `variant` into `points_dir`.
    pub fn new(points_dir: impl Into<PathBuf>, variant: impl Into<String>, limits: CaptureLimits) -> Self {
        Self {
            points_dir: points_dir.into(),
            variant: variant.into(),
            limits,
            state: Mutex::new(ProbeState::default()),
        }
    }

    /// Sink configured from the process environment, if a results directory is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Sink configured through `lookup`, which maps variable names to values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let points_dir = lookup(RESULTS_DIR_ENV).filter(|dir| !dir.is_empty())?;
        let variant = lookup(VARIANT_ENV).unwrap_or_else(|| "original".to_string());
        let mut limits = CaptureLimits::default();
        if let Some(depth) = parse_limit(&lookup, MAX_DEPTH_ENV) {
            limits.max_depth = depth;
        }
        if let Some(nodes) = parse_limit(&lookup, MAX_NODES_ENV) {
            limits.max_nodes = nodes;
        }

        let sink = Self::new(points_dir, variant, limits);
        if let Some(test_id) = lookup(TEST_ID_ENV) {
            sink.begin_test(&test_id);
        }
        Some(sink)
    }

    /// Variant label recorded in point files.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Enter the scope of `test_id` and reset its invocation counters.
    pub fn begin_test(&self, test_id: &str) {
        let mut state = self.state.lock();
        state.scope = test_id.to_string();
        state.counters.clear();
    }

    /// Allocate the next execution point for `site` in the current scope.
    pub fn next_point(&self, site: &CallSite<'_>) -> ExecutionPointId {
        let mut state = self.state.lock();
        let key = (
            site.class.to_string(),
            site.method.to_string(),
            site.descriptor.to_string(),
        );
        let counter = state.counters.entry(key).or_insert(0);
        let invocation = *counter;
        *counter += 1;
        ExecutionPointId {
            scope: state.scope.clone(),
            class: site.class.to_string(),
            method: site.method.to_string(),
            descriptor: site.descriptor.to_string(),
            invocation,
        }
    }

    /// Capture `call` and write its point file.
    pub fn record(
        &self,
        site: &CallSite<'_>,
        call: &CallObservation<'_>,
    ) -> Result<ExecutionPointId, StoreError> {
        let point = self.next_point(site);
        let snapshot = capture_call(self.limits, call);
        let record = PointRecord {
            variant: self.variant.clone(),
            point,
            snapshot,
        };
        write_point_record(&self.points_dir, &record)?;
        Ok(record.point)
    }

    /// Like [`ProbeSink::record`], but a write failure is logged instead of surfacing
    /// into the code under test.
    pub fn observe(&self, site: &CallSite<'_>, call: &CallObservation<'_>) {
        if let Err(err) = self.record(site, call) {
            tracing::warn!(
                class = site.class,
                method = site.method,
                variant = %self.variant,
                error = %err,
                "dropping observation"
            );
        }
    }
}

fn parse_limit(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<usize> {
    let raw = lookup(name)?;
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(variable = name, value = %raw, "ignoring invalid capture limit");
            None
        }
    }
}

static GLOBAL_SINK: OnceLock<Option<ProbeSink>> = OnceLock::new();

fn global_sink() -> Option<&'static ProbeSink> {
    GLOBAL_SINK.get_or_init(ProbeSink::from_env).as_ref()
}

/// Record one finished call of an instrumented method.
///
/// `receiver` is `None` for static methods and `return_value` is `None` for void
/// methods. Does nothing when the process was not started by the orchestrator.
pub fn observe_method_call(
    site: &CallSite<'_>,
    receiver: Option<&dyn Observe>,
    arguments: &[&dyn Observe],
    return_value: Option<&dyn Observe>,
) {
    if let Some(sink) = global_sink() {
        sink.observe(site, &CallObservation::new(receiver, arguments, return_value));
    }
}

/// Announce the start of a test to the process-wide probe.
pub fn begin_test(test_id: &str) {
    if let Some(sink) = global_sink() {
        sink.begin_test(test_id);
    }
}
