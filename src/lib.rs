//! # mutant-triage
//!
//! `mutant-triage` observes the internal state of methods whose mutants survived a
//! mutation-testing run, and tells which of those mutants actually change observable
//! state. It is organized around:
//! - `snapshot`: serializable captured object graphs
//! - `capture`: cycle-safe capture of live values through the [`Observe`] view
//! - `probe`: the runtime an instrumented method calls on return
//! - `diff`: lock-step comparison of two snapshots into a [`DiffReport`]
//! - `triage`: report parsing, the variant orchestrator, its event log and summaries
//!
//! Probe insertion, mutant generation and test execution are external collaborators
//! behind the [`Instrumentor`], [`Mutator`] and [`TestRunner`] traits.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod capture;
pub mod diff;
pub mod probe;
pub mod snapshot;
pub mod triage;

pub use capture::{CallObservation, Capture, CaptureLimits, Observe, capture_call};
pub use diff::{Classification, DiffReport, Difference, IncomparableSubtree, Observed, diff};
pub use probe::{CallSite, ExecutionPointId, ProbeSink, begin_test, observe_method_call};
pub use snapshot::{Link, Node, NodeBody, NodeId, Root, RootName, ScalarValue, Snapshot};
pub use triage::{Instrumentor, Mutator, Orchestrator, TestRunner, TriageConfig};
