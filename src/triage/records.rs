//! Method report parsing.
//!
//! The report is a JSON document produced by an upstream mutation testing run:
//!
//! ```json
//! { "methods": [ {
//!     "name": "add", "description": "(II)I", "class": "Calc", "package": "com/example",
//!     "classification": "pseudo-tested",
//!     "mutations": [ { "mutator": "MATH", "status": "SURVIVED", "tests": ["CalcTest.adds"] } ]
//! } ] }
//! ```
//!
//! Only partially-tested and pseudo-tested methods are observed, and only their
//! surviving mutations become candidates. Not-covered methods are kept verbatim so
//! they can be forwarded to the output directory.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failures reading the method report. Fatal for the run.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Report file could not be read.
    #[error("failed to read method report {path}: {source}")]
    Io {
        /// Report path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Report is not valid JSON.
    #[error("method report is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    /// Report structure is not the expected one.
    #[error("malformed method report: {0}")]
    Malformed(String),
}

/// How well the upstream run judged a method to be tested.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodClassification {
    /// Every mutation was detected.
    Tested,
    /// Some mutations survived.
    PartiallyTested,
    /// Every mutation survived.
    PseudoTested,
    /// No test executes the method.
    NotCovered,
    /// Classification this version does not know.
    #[serde(untagged)]
    Other(String),
}

impl MethodClassification {
    fn parse(raw: &str) -> Self {
        match raw {
            "tested" => Self::Tested,
            "partially-tested" => Self::PartiallyTested,
            "pseudo-tested" => Self::PseudoTested,
            "not-covered" => Self::NotCovered,
            other => Self::Other(other.to_string()),
        }
    }

    /// True for methods whose surviving mutants are worth observing.
    pub fn is_ill_tested(&self) -> bool {
        matches!(self, Self::PartiallyTested | Self::PseudoTested)
    }
}

/// Where a mutation applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodLocation {
    /// Qualified class name (dotted).
    pub class: String,
    /// Method name.
    pub method: String,
    /// Signature descriptor.
    pub descriptor: String,
}

impl fmt::Display for MethodLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.method, self.descriptor)
    }
}

/// Upstream verdict for one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationStatus {
    /// No test detected the mutation.
    Survived,
    /// At least one test failed.
    Killed,
    /// Any other upstream status.
    #[serde(untagged)]
    Other(String),
}

impl MutationStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "SURVIVED" => Self::Survived,
            "KILLED" => Self::Killed,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A surviving mutant of one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCandidate {
    /// Stable id: `<location>:<mutator>#<ordinal>`.
    pub id: String,
    /// Position within the method's candidates.
    pub ordinal: usize,
    /// Mutation operator.
    pub mutator: String,
    /// Mutated method.
    pub location: MethodLocation,
    /// Upstream status.
    pub status: MutationStatus,
    /// Tests that execute the mutated code.
    pub tests: BTreeSet<String>,
}

/// A method selected for observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodUnderTest {
    /// Simple class name.
    pub class: String,
    /// Dotted package name.
    pub package: String,
    /// Method name.
    pub name: String,
    /// Signature descriptor.
    pub descriptor: String,
    /// Upstream classification.
    pub classification: MethodClassification,
    /// Surviving mutants, in report order.
    pub candidates: Vec<MutationCandidate>,
}

impl MethodUnderTest {
    /// `package.Class`, or just `Class` in the default package.
    pub fn qualified_class(&self) -> String {
        if self.package.is_empty() {
            self.class.clone()
        } else {
            format!("{}.{}", self.package, self.class)
        }
    }

    /// Location of this method.
    pub fn location(&self) -> MethodLocation {
        MethodLocation {
            class: self.qualified_class(),
            method: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Union of the tests of all candidates; the baseline runs exactly these.
    pub fn tests(&self) -> BTreeSet<String> {
        self.candidates
            .iter()
            .flat_map(|candidate| candidate.tests.iter().cloned())
            .collect()
    }
}

/// Parsed report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodReport {
    /// Ill-tested methods, in report order.
    pub methods: Vec<MethodUnderTest>,
    /// Not-covered method entries, unchanged.
    pub uncovered: Vec<Value>,
}

#[derive(Deserialize)]
struct RawMethod {
    name: String,
    description: String,
    class: String,
    package: String,
    classification: String,
    #[serde(default)]
    mutations: Vec<RawMutation>,
}

#[derive(Deserialize)]
struct RawMutation {
    mutator: String,
    status: String,
    #[serde(default, alias = "covered_by")]
    tests: Vec<String>,
}

/// Read and parse the report at `path`.
pub fn load_method_report(path: &Path) -> Result<MethodReport, ReportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_method_report(&text)
}

/// Parse a report document.
pub fn parse_method_report(text: &str) -> Result<MethodReport, ReportError> {
    let document: Value = serde_json::from_str(text)?;
    let items = document
        .get("methods")
        .and_then(Value::as_array)
        .ok_or_else(|| ReportError::Malformed("missing `methods` array".to_string()))?;

    let mut report = MethodReport::default();
    for (index, item) in items.iter().enumerate() {
        let raw: RawMethod = serde_json::from_value(item.clone())
            .map_err(|err| ReportError::Malformed(format!("method entry {index}: {err}")))?;

        let classification = MethodClassification::parse(&raw.classification);
        match &classification {
            MethodClassification::NotCovered => {
                report.uncovered.push(item.clone());
                continue;
            }
            MethodClassification::Other(other) => {
                tracing::warn!(
                    method = %raw.name,
                    classification = %other,
                    "skipping method with unknown classification"
                );
                continue;
            }
            MethodClassification::Tested => continue,
            MethodClassification::PartiallyTested | MethodClassification::PseudoTested => {}
        }

        let mut method = MethodUnderTest {
            class: raw.class,
            package: raw.package.replace('/', "."),
            name: raw.name,
            descriptor: raw.description,
            classification,
            candidates: Vec::new(),
        };
        let location = method.location();
        for mutation in raw.mutations {
            let status = MutationStatus::parse(&mutation.status);
            if status != MutationStatus::Survived {
                continue;
            }
            let ordinal = method.candidates.len();
            method.candidates.push(MutationCandidate {
                id: format!("{location}:{}#{ordinal}", mutation.mutator),
                ordinal,
                mutator: mutation.mutator,
                location: location.clone(),
                status,
                tests: mutation.tests.into_iter().collect(),
            });
        }
        report.methods.push(method);
    }
    Ok(report)
}
