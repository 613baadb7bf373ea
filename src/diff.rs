//! Lock-step comparison of two snapshots.
//!
//! [`diff`] walks baseline and candidate graphs from matching roots. Every visited
//! node pair is remembered by `(baseline id, candidate id)`, so shared and cyclic
//! structure is compared once. Capture gaps (unreadable nodes, truncated links,
//! failed roots) never count as equal: they are reported as incomparable subtrees.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::{Link, Node, NodeBody, NodeId, Root, RootName, ScalarValue, Snapshot};

/// Verdict for one comparison, or merged over several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// No difference and no capture gap.
    Equivalent,
    /// At least one concrete difference.
    Distinguishable,
    /// No concrete difference, but some state could not be compared.
    Incomparable,
}

impl Classification {
    fn rank(self) -> u8 {
        match self {
            Self::Distinguishable => 2,
            Self::Equivalent => 1,
            Self::Incomparable => 0,
        }
    }

    /// Combine two invocation verdicts: distinguishable wins over equivalent, which
    /// wins over incomparable.
    pub fn merge(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Merge many verdicts; `None` when there are none.
    pub fn merge_all(verdicts: impl IntoIterator<Item = Self>) -> Option<Self> {
        verdicts.into_iter().reduce(Self::merge)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equivalent => "equivalent",
            Self::Distinguishable => "distinguishable",
            Self::Incomparable => "incomparable",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observed {
    /// A scalar value.
    Scalar {
        /// The value.
        value: ScalarValue,
    },
    /// A node summarised by its type tag, with the value when it is a scalar.
    Type {
        /// Runtime type tag.
        type_tag: String,
        /// Scalar value of the node, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ScalarValue>,
    },
    /// A node whose shape differs from the other side.
    Shape {
        /// Shape name (`scalar`, `sequence`, `record`).
        shape: String,
    },
    /// Sequence length.
    Length {
        /// Number of elements.
        length: usize,
    },
    /// Nothing at this path.
    Missing,
    /// Void return.
    Void,
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { value } => write!(f, "{value}"),
            Self::Type {
                type_tag,
                value: Some(value),
            } => write!(f, "<{type_tag}> {value}"),
            Self::Type { type_tag, value: None } => write!(f, "<{type_tag}>"),
            Self::Shape { shape } => write!(f, "<{shape}>"),
            Self::Length { length } => write!(f, "{length}"),
            Self::Missing => f.write_str("<missing>"),
            Self::Void => f.write_str("<void>"),
        }
    }
}

/// Concrete difference at one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Difference {
    /// Root the path starts from.
    pub root: RootName,
    /// Full path, e.g. `argument[0].items[2]`.
    pub path: String,
    /// Value on the original (baseline) side.
    pub original: Observed,
    /// Value on the mutant (candidate) side.
    pub mutant: Observed,
}

/// Subtree that could not be compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomparableSubtree {
    /// Root the path starts from; `None` when the whole execution point is affected.
    pub root: Option<RootName>,
    /// Path of the subtree; empty for a whole execution point.
    pub path: String,
    /// Why the comparison was not possible.
    pub reason: String,
}

/// Result of comparing one baseline snapshot with one candidate snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    /// Overall verdict.
    pub classification: Classification,
    /// Concrete differences in walk order.
    pub differences: Vec<Difference>,
    /// Subtrees skipped because of capture gaps.
    pub incomparable: Vec<IncomparableSubtree>,
}

impl DiffReport {
    /// Report for an execution point that produced no usable observation.
    pub fn incomparable(reason: impl Into<String>) -> Self {
        Self {
            classification: Classification::Incomparable,
            differences: Vec::new(),
            incomparable: vec![IncomparableSubtree {
                root: None,
                path: String::new(),
                reason: reason.into(),
            }],
        }
    }

    fn from_findings(differences: Vec<Difference>, incomparable: Vec<IncomparableSubtree>) -> Self {
        let classification = if !differences.is_empty() {
            Classification::Distinguishable
        } else if !incomparable.is_empty() {
            Classification::Incomparable
        } else {
            Classification::Equivalent
        };
        Self {
            classification,
            differences,
            incomparable,
        }
    }
}

/// Compare `candidate` against `baseline`.
pub fn diff(baseline: &Snapshot, candidate: &Snapshot) -> DiffReport {
    let mut walker = Walker {
        baseline,
        candidate,
        visited: HashSet::new(),
        differences: Vec::new(),
        incomparable: Vec::new(),
    };
    walker.walk_roots();
    DiffReport::from_findings(walker.differences, walker.incomparable)
}

struct Walker<'a> {
    baseline: &'a Snapshot,
    candidate: &'a Snapshot,
    visited: HashSet<(NodeId, NodeId)>,
    differences: Vec<Difference>,
    incomparable: Vec<IncomparableSubtree>,
}

impl<'a> Walker<'a> {
    fn walk_roots(&mut self) {
        let argument_count = self
            .baseline
            .arguments
            .len()
            .max(self.candidate.arguments.len());
        let names = std::iter::once(RootName::Receiver)
            .chain((0..argument_count).map(RootName::Argument))
            .chain(std::iter::once(RootName::ReturnValue));

        for name in names {
            let path = name.to_string();
            match (self.baseline.root(name), self.candidate.root(name)) {
                (Some(a), Some(b)) => self.compare_roots(name, &path, a, b),
                (Some(a), None) => {
                    let original = self.summarize_root(self.baseline, a);
                    self.differ(name, path, original, Observed::Missing);
                }
                (None, Some(b)) => {
                    let mutant = self.summarize_root(self.candidate, b);
                    self.differ(name, path, Observed::Missing, mutant);
                }
                (None, None) => {}
            }
        }
    }

    fn compare_roots(&mut self, name: RootName, path: &str, a: &Root, b: &Root) {
        match (a, b) {
            (Root::CaptureFailed { reason }, _) | (_, Root::CaptureFailed { reason }) => {
                self.gap(name, path, format!("capture failed: {reason}"));
            }
            (Root::Void, Root::Void) => {}
            (Root::Captured { link: la }, Root::Captured { link: lb }) => {
                self.compare_links(name, path, la, lb);
            }
            (Root::Void, Root::Captured { link }) => {
                let mutant = self.summarize_link(self.candidate, link);
                self.differ(name, path.to_string(), Observed::Void, mutant);
            }
            (Root::Captured { link }, Root::Void) => {
                let original = self.summarize_link(self.baseline, link);
                self.differ(name, path.to_string(), original, Observed::Void);
            }
        }
    }

    fn compare_links(&mut self, name: RootName, path: &str, a: &Link, b: &Link) {
        let (x, y) = match (a, b) {
            (Link::Node(x), Link::Node(y)) => (*x, *y),
            _ => {
                self.gap(name, path, "subtree truncated at capture".to_string());
                return;
            }
        };
        if !self.visited.insert((x, y)) {
            return;
        }
        let baseline = self.baseline;
        let candidate = self.candidate;
        match (baseline.node(x), candidate.node(y)) {
            (Some(nx), Some(ny)) => self.compare_nodes(name, path, nx, ny),
            _ => self.gap(name, path, "dangling node reference".to_string()),
        }
    }

    fn compare_nodes(&mut self, name: RootName, path: &str, x: &'a Node, y: &'a Node) {
        if let NodeBody::Unreadable { reason } = &x.body {
            self.gap(name, path, format!("unreadable in original: {reason}"));
            return;
        }
        if let NodeBody::Unreadable { reason } = &y.body {
            self.gap(name, path, format!("unreadable in mutant: {reason}"));
            return;
        }
        if x.type_tag != y.type_tag {
            self.differ(name, path.to_string(), typed(x), typed(y));
            return;
        }

        match (&x.body, &y.body) {
            (NodeBody::Scalar { value: va }, NodeBody::Scalar { value: vb }) => {
                if va != vb {
                    self.differ(
                        name,
                        path.to_string(),
                        Observed::Scalar { value: va.clone() },
                        Observed::Scalar { value: vb.clone() },
                    );
                }
            }
            (NodeBody::Record { fields: fa }, NodeBody::Record { fields: fb }) => {
                let keys: BTreeSet<&String> = fa.keys().chain(fb.keys()).collect();
                for key in keys {
                    let field_path = format!("{path}.{key}");
                    match (fa.get(key), fb.get(key)) {
                        (Some(la), Some(lb)) => self.compare_links(name, &field_path, la, lb),
                        (Some(la), None) => {
                            let original = self.summarize_link(self.baseline, la);
                            self.differ(name, field_path, original, Observed::Missing);
                        }
                        (None, Some(lb)) => {
                            let mutant = self.summarize_link(self.candidate, lb);
                            self.differ(name, field_path, Observed::Missing, mutant);
                        }
                        (None, None) => {}
                    }
                }
            }
            (NodeBody::Sequence { elements: ea }, NodeBody::Sequence { elements: eb }) => {
                if ea.len() != eb.len() {
                    self.differ(
                        name,
                        format!("{path}.#length"),
                        Observed::Length { length: ea.len() },
                        Observed::Length { length: eb.len() },
                    );
                }
                for (index, (la, lb)) in ea.iter().zip(eb.iter()).enumerate() {
                    self.compare_links(name, &format!("{path}[{index}]"), la, lb);
                }
            }
            (a, b) => self.differ(
                name,
                path.to_string(),
                Observed::Shape {
                    shape: a.shape_name().to_string(),
                },
                Observed::Shape {
                    shape: b.shape_name().to_string(),
                },
            ),
        }
    }

    fn summarize_root(&self, snapshot: &Snapshot, root: &Root) -> Observed {
        match root {
            Root::Captured { link } => self.summarize_link(snapshot, link),
            Root::Void => Observed::Void,
            Root::CaptureFailed { .. } => Observed::Shape {
                shape: "capture-failed".to_string(),
            },
        }
    }

    fn summarize_link(&self, snapshot: &Snapshot, link: &Link) -> Observed {
        let node = match link {
            Link::Node(id) => snapshot.node(*id),
            Link::Truncated => None,
        };
        match node {
            Some(Node {
                body: NodeBody::Scalar { value },
                ..
            }) => Observed::Scalar {
                value: value.clone(),
            },
            Some(node) => typed(node),
            None => Observed::Shape {
                shape: "truncated".to_string(),
            },
        }
    }

    fn differ(&mut self, root: RootName, path: String, original: Observed, mutant: Observed) {
        self.differences.push(Difference {
            root,
            path,
            original,
            mutant,
        });
    }

    fn gap(&mut self, root: RootName, path: &str, reason: String) {
        self.incomparable.push(IncomparableSubtree {
            root: Some(root),
            path: path.to_string(),
            reason,
        });
    }
}

fn typed(node: &Node) -> Observed {
    let value = match &node.body {
        NodeBody::Scalar { value } => Some(value.clone()),
        _ => None,
    };
    Observed::Type {
        type_tag: node.type_tag.clone(),
        value,
    }
}
