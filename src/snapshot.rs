//! Captured object graphs.
//!
//! A [`Snapshot`] is a plain, serializable value: an arena of [`Node`]s indexed by
//! capture-local [`NodeId`]s plus the roots of one execution point (receiver,
//! arguments, return value). Repeated references to the same live object reuse the
//! same id, so aliasing and cycles survive serialization.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Capture-local node identity. Assigned in traversal order, never a memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Arena index of this node.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Primitive value captured by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ScalarValue {
    /// Absent reference (`None`, null pointer).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer, widened.
    Int(i64),
    /// Unsigned integer, widened.
    UInt(u64),
    /// Floating point, widened. Non-finite values persist as strings.
    Float(#[serde(with = "float_repr")] f64),
    /// Single character.
    Char(char),
    /// Textual value.
    Text(String),
}

/// JSON has no NaN or infinity, so those are written as `"NaN"`, `"inf"` and `"-inf"`.
/// A NaN other than the canonical quiet NaN keeps its bits as `"NaN:<hex>"`.
mod float_repr {
    use serde::de::{self, Deserializer};
    use serde::{Deserialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            if value.to_bits() == f64::NAN.to_bits() {
                serializer.serialize_str("NaN")
            } else {
                serializer.collect_str(&format_args!("NaN:{:016x}", value.to_bits()))
            }
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => parse(&text)
                .ok_or_else(|| de::Error::custom(format!("invalid float `{text}`"))),
        }
    }

    fn parse(text: &str) -> Option<f64> {
        match text {
            "NaN" => Some(f64::NAN),
            "inf" => Some(f64::INFINITY),
            "-inf" => Some(f64::NEG_INFINITY),
            _ => text
                .strip_prefix("NaN:")
                .and_then(|bits| u64::from_str_radix(bits, 16).ok())
                .map(f64::from_bits)
                .filter(|value| value.is_nan()),
        }
    }
}

// Floats compare by bit pattern so that a snapshot always equals itself, NaN included.
impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Char(v) => write!(f, "{v:?}"),
            Self::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// Reference from a node (or root) to a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "link", content = "node", rename_all = "snake_case")]
pub enum Link {
    /// Captured child node.
    Node(NodeId),
    /// Subtree cut off by the depth or node budget.
    Truncated,
}

/// Content of one captured node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum NodeBody {
    /// Primitive scalar.
    Scalar {
        /// Captured value.
        value: ScalarValue,
    },
    /// Ordered elements of an array or sequence.
    Sequence {
        /// Elements in order.
        elements: Vec<Link>,
    },
    /// Named fields of a structured value.
    Record {
        /// Field name to child.
        fields: BTreeMap<String, Link>,
    },
    /// State that exists but could not be read at capture time.
    Unreadable {
        /// Why access was denied.
        reason: String,
    },
}

impl NodeBody {
    /// Short shape name used in difference reports.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Scalar { .. } => "scalar",
            Self::Sequence { .. } => "sequence",
            Self::Record { .. } => "record",
            Self::Unreadable { .. } => "unreadable",
        }
    }

    fn links(&self) -> Box<dyn Iterator<Item = &Link> + '_> {
        match self {
            Self::Sequence { elements } => Box::new(elements.iter()),
            Self::Record { fields } => Box::new(fields.values()),
            Self::Scalar { .. } | Self::Unreadable { .. } => Box::new(std::iter::empty()),
        }
    }
}

/// One vertex of the captured graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Capture-local identity.
    pub id: NodeId,
    /// Runtime type tag.
    pub type_tag: String,
    /// Captured content.
    pub body: NodeBody,
}

/// Root slot of an execution point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "root", rename_all = "snake_case")]
pub enum Root {
    /// Root captured (possibly truncated).
    Captured {
        /// Link into the arena.
        link: Link,
    },
    /// The method returns nothing.
    Void,
    /// The root could not be captured at all.
    CaptureFailed {
        /// Failure detail.
        reason: String,
    },
}

impl Root {
    /// Root pointing at a node.
    pub fn node(id: NodeId) -> Self {
        Self::Captured {
            link: Link::Node(id),
        }
    }
}

/// Name of a root slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum RootName {
    /// The receiver (`self`).
    Receiver,
    /// Positional argument.
    Argument(usize),
    /// The return value.
    ReturnValue,
}

impl fmt::Display for RootName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receiver => f.write_str("receiver"),
            Self::Argument(i) => write!(f, "argument[{i}]"),
            Self::ReturnValue => f.write_str("returnValue"),
        }
    }
}

/// Structural problems found by [`Snapshot::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// A node's stored id does not match its arena slot.
    #[error("node at index {index} carries id {id}")]
    MisplacedNode {
        /// Arena index.
        index: usize,
        /// Stored id.
        id: NodeId,
    },
    /// A link points outside the arena.
    #[error("dangling reference to {0}")]
    Dangling(NodeId),
    /// A node cannot be reached from any root.
    #[error("node {0} is unreachable from the roots")]
    Unreachable(NodeId),
}

/// Structural capture of one execution point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Node arena, indexed by [`NodeId`].
    pub nodes: Vec<Node>,
    /// Receiver root; `None` for static methods.
    pub receiver: Option<Root>,
    /// Argument roots in declaration order.
    pub arguments: Vec<Root>,
    /// Return value root.
    pub return_value: Option<Root>,
}

impl Snapshot {
    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Number of captured nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All present roots with their names, in comparison order.
    pub fn roots(&self) -> Vec<(RootName, &Root)> {
        let mut out = Vec::with_capacity(self.arguments.len() + 2);
        if let Some(receiver) = &self.receiver {
            out.push((RootName::Receiver, receiver));
        }
        for (index, root) in self.arguments.iter().enumerate() {
            out.push((RootName::Argument(index), root));
        }
        if let Some(ret) = &self.return_value {
            out.push((RootName::ReturnValue, ret));
        }
        out
    }

    /// Look up a root slot by name.
    pub fn root(&self, name: RootName) -> Option<&Root> {
        match name {
            RootName::Receiver => self.receiver.as_ref(),
            RootName::Argument(index) => self.arguments.get(index),
            RootName::ReturnValue => self.return_value.as_ref(),
        }
    }

    /// Number of links marked truncated anywhere in the snapshot.
    pub fn truncated_links(&self) -> usize {
        let in_nodes = self
            .nodes
            .iter()
            .flat_map(|node| node.body.links())
            .filter(|link| **link == Link::Truncated)
            .count();
        let in_roots = self
            .roots()
            .into_iter()
            .filter(|(_, root)| {
                matches!(
                    root,
                    Root::Captured {
                        link: Link::Truncated
                    }
                )
            })
            .count();
        in_nodes + in_roots
    }

    /// Check that ids match arena slots, every link resolves, and every node is
    /// reachable from a root.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.index() != index {
                return Err(SnapshotError::MisplacedNode { index, id: node.id });
            }
            for link in node.body.links() {
                if let Link::Node(child) = link {
                    if self.node(*child).is_none() {
                        return Err(SnapshotError::Dangling(*child));
                    }
                }
            }
        }

        let mut reached: BTreeSet<NodeId> = BTreeSet::new();
        let mut stack: Vec<NodeId> = Vec::new();
        for (_, root) in self.roots() {
            if let Root::Captured {
                link: Link::Node(id),
            } = root
            {
                if self.node(*id).is_none() {
                    return Err(SnapshotError::Dangling(*id));
                }
                stack.push(*id);
            }
        }
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(node) = self.node(id) {
                for link in node.body.links() {
                    if let Link::Node(child) = link {
                        stack.push(*child);
                    }
                }
            }
        }

        match self.nodes.iter().find(|node| !reached.contains(&node.id)) {
            Some(orphan) => Err(SnapshotError::Unreachable(orphan.id)),
            None => Ok(()),
        }
    }
}

/// Hand assembly of snapshots, for collaborators that produce observations
/// without going through [`crate::capture`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    /// Start an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, type_tag: &str, body: NodeBody) -> NodeId {
        let id = NodeId(self.snapshot.nodes.len() as u32);
        self.snapshot.nodes.push(Node {
            id,
            type_tag: type_tag.to_string(),
            body,
        });
        id
    }

    /// Add a scalar node.
    pub fn scalar(&mut self, type_tag: &str, value: ScalarValue) -> NodeId {
        self.push(type_tag, NodeBody::Scalar { value })
    }

    /// Add a sequence node.
    pub fn sequence(&mut self, type_tag: &str, elements: Vec<Link>) -> NodeId {
        self.push(type_tag, NodeBody::Sequence { elements })
    }

    /// Add a record node from `(field, link)` pairs.
    pub fn record<'a>(
        &mut self,
        type_tag: &str,
        fields: impl IntoIterator<Item = (&'a str, Link)>,
    ) -> NodeId {
        let fields = fields
            .into_iter()
            .map(|(name, link)| (name.to_string(), link))
            .collect();
        self.push(type_tag, NodeBody::Record { fields })
    }

    /// Add an unreadable node.
    pub fn unreadable(&mut self, type_tag: &str, reason: &str) -> NodeId {
        self.push(
            type_tag,
            NodeBody::Unreadable {
                reason: reason.to_string(),
            },
        )
    }

    /// Replace the fields of an existing record node; used to close cycles.
    pub fn set_field(&mut self, record: NodeId, field: &str, link: Link) {
        if let Some(Node {
            body: NodeBody::Record { fields },
            ..
        }) = self.snapshot.nodes.get_mut(record.index())
        {
            fields.insert(field.to_string(), link);
        }
    }

    /// Set the receiver root.
    pub fn receiver(&mut self, root: Root) -> &mut Self {
        self.snapshot.receiver = Some(root);
        self
    }

    /// Append an argument root.
    pub fn argument(&mut self, root: Root) -> &mut Self {
        self.snapshot.arguments.push(root);
        self
    }

    /// Set the return value root.
    pub fn return_value(&mut self, root: Root) -> &mut Self {
        self.snapshot.return_value = Some(root);
        self
    }

    /// Finish building.
    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: i64, y: i64, ret: i64) -> Snapshot {
        let mut b = SnapshotBuilder::new();
        let xs = b.scalar("i64", ScalarValue::Int(x));
        let ys = b.scalar("i64", ScalarValue::Int(y));
        let p = b.record("Point", [("x", Link::Node(xs)), ("y", Link::Node(ys))]);
        let r = b.scalar("i64", ScalarValue::Int(ret));
        b.argument(Root::node(p)).return_value(Root::node(r));
        b.build()
    }

    #[test]
    fn builder_assigns_sequential_ids_and_validates() {
        let snapshot = point(1, 2, 3);
        assert_eq!(snapshot.node_count(), 4);
        assert_eq!(snapshot.nodes[2].id, NodeId(2));
        assert!(snapshot.validate().is_ok());
        assert_eq!(
            snapshot.roots().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![RootName::Argument(0), RootName::ReturnValue]
        );
    }

    #[test]
    fn validate_rejects_dangling_and_unreachable_nodes() {
        let mut b = SnapshotBuilder::new();
        let orphan = b.scalar("i32", ScalarValue::Int(1));
        let dangling = b.sequence("Vec<i32>", vec![Link::Node(NodeId(42))]);
        b.argument(Root::node(dangling));
        let snapshot = b.build();
        assert_eq!(snapshot.validate(), Err(SnapshotError::Dangling(NodeId(42))));

        let mut b = SnapshotBuilder::new();
        let _ = b.scalar("i32", ScalarValue::Int(1));
        let kept = b.scalar("i32", ScalarValue::Int(2));
        b.return_value(Root::node(kept));
        assert_eq!(
            b.build().validate(),
            Err(SnapshotError::Unreachable(orphan))
        );
    }

    #[test]
    fn cyclic_snapshot_is_valid_and_serializes() {
        let mut b = SnapshotBuilder::new();
        let node = b.record("Node", []);
        b.set_field(node, "next", Link::Node(node));
        b.receiver(Root::node(node)).return_value(Root::Void);
        let snapshot = b.build();
        assert!(snapshot.validate().is_ok());

        let json = serde_json::to_string(&snapshot).expect("snapshot should serialize");
        let back: Snapshot = serde_json::from_str(&json).expect("snapshot should deserialize");
        assert_eq!(back, snapshot);
    }

    #[test]
    fn nan_scalars_equal_themselves() {
        let nan = ScalarValue::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_ne!(ScalarValue::Int(1), ScalarValue::UInt(1));
    }

    #[test]
    fn non_finite_floats_survive_json_bit_for_bit() {
        let negative_nan = f64::from_bits(0xfff8_0000_0000_0000);
        for value in [f64::NAN, negative_nan, f64::INFINITY, f64::NEG_INFINITY, -0.0, 1.5] {
            let scalar = ScalarValue::Float(value);
            let json = serde_json::to_string(&scalar).expect("float should serialize");
            let back: ScalarValue = serde_json::from_str(&json).expect("float should deserialize");
            assert_eq!(back, scalar, "{json}");
        }
        assert_eq!(
            serde_json::to_string(&ScalarValue::Float(f64::NEG_INFINITY)).expect("serialize"),
            r#"{"kind":"float","value":"-inf"}"#
        );
        assert!(serde_json::from_str::<ScalarValue>(r#"{"kind":"float","value":"huge"}"#).is_err());
    }

    #[test]
    fn truncated_links_are_counted_in_nodes_and_roots() {
        let mut b = SnapshotBuilder::new();
        let seq = b.sequence("Vec<Node>", vec![Link::Truncated, Link::Truncated]);
        b.argument(Root::node(seq));
        b.argument(Root::Captured {
            link: Link::Truncated,
        });
        assert_eq!(b.build().truncated_links(), 3);
    }

    #[test]
    fn root_names_render_like_paths() {
        assert_eq!(RootName::Receiver.to_string(), "receiver");
        assert_eq!(RootName::Argument(2).to_string(), "argument[2]");
        assert_eq!(RootName::ReturnValue.to_string(), "returnValue");
    }
}
