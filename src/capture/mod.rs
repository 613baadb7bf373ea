//! Cycle-safe capture of live values into a [`Snapshot`].
//!
//! Values expose their internal state through [`Observe`], a read-only debug view.
//! Traversal assigns each node a capture-local [`NodeId`]; values that report a
//! runtime [`Observe::identity`] (shared pointers) are captured once and every
//! further reference reuses the same id, which makes aliasing and cycles terminate.
//!
//! Capture never fails as a whole:
//! - state that cannot be read right now becomes [`NodeBody::Unreadable`];
//! - subtrees beyond [`CaptureLimits`] become [`Link::Truncated`];
//! - a root whose view panics becomes [`Root::CaptureFailed`], and the nodes it
//!   had produced are rolled back.

mod impls;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::snapshot::{Link, Node, NodeBody, NodeId, Root, ScalarValue, Snapshot};

/// Traversal budget for one execution point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureLimits {
    /// Maximum link distance from a root; deeper subtrees are truncated.
    pub max_depth: usize,
    /// Maximum number of nodes in one snapshot.
    pub max_nodes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_nodes: 4096,
        }
    }
}

/// Read-only structural view of a value.
///
/// Implementations must only read: no iterator advancement, no lazy initialisation,
/// no retained references. Interior-mutable containers use non-blocking access and
/// report [`NodeBody::Unreadable`] when it is denied.
pub trait Observe {
    /// Runtime type tag recorded on the node.
    fn type_tag(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }

    /// Runtime identity of shared state, if the value can be aliased.
    ///
    /// Owned values cannot be reached twice and keep the default `None`.
    fn identity(&self) -> Option<usize> {
        None
    }

    /// Describe this value's content, capturing children through `cx`.
    fn observe(&self, cx: &mut Capture) -> NodeBody;
}

/// One root slot handed to [`capture_call`].
pub enum RootValue<'a> {
    /// A live value.
    Value(&'a dyn Observe),
    /// The method returned nothing.
    Void,
    /// The probe could not provide this root.
    Unavailable(String),
}

/// Receiver, arguments and return value of one finished call.
pub struct CallObservation<'a> {
    /// Receiver; `None` for static methods.
    pub receiver: Option<RootValue<'a>>,
    /// Arguments in declaration order.
    pub arguments: Vec<RootValue<'a>>,
    /// Return value or void marker.
    pub return_value: RootValue<'a>,
}

impl<'a> CallObservation<'a> {
    /// Build from plain references; `return_value: None` means void.
    pub fn new(
        receiver: Option<&'a dyn Observe>,
        arguments: &[&'a dyn Observe],
        return_value: Option<&'a dyn Observe>,
    ) -> Self {
        Self {
            receiver: receiver.map(RootValue::Value),
            arguments: arguments.iter().map(|arg| RootValue::Value(*arg)).collect(),
            return_value: return_value.map_or(RootValue::Void, RootValue::Value),
        }
    }
}

/// Arena state of one traversal.
pub struct Capture {
    limits: CaptureLimits,
    nodes: Vec<Node>,
    seen: HashMap<usize, NodeId>,
    depth: usize,
}

impl Capture {
    /// Start a traversal bounded by `limits`.
    pub fn new(limits: CaptureLimits) -> Self {
        Self {
            limits,
            nodes: Vec::new(),
            seen: HashMap::new(),
            depth: 0,
        }
    }

    /// Capture `value` and return the link to it.
    pub fn link(&mut self, value: &dyn Observe) -> Link {
        let identity = value.identity();
        if let Some(id) = identity.and_then(|key| self.seen.get(&key)) {
            return Link::Node(*id);
        }
        if self.depth >= self.limits.max_depth || self.nodes.len() >= self.limits.max_nodes {
            return Link::Truncated;
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            type_tag: value.type_tag().into_owned(),
            body: NodeBody::Record {
                fields: BTreeMap::new(),
            },
        });
        if let Some(key) = identity {
            self.seen.insert(key, id);
        }

        self.depth += 1;
        let body = value.observe(self);
        self.depth -= 1;

        self.nodes[id.index()].body = body;
        Link::Node(id)
    }

    /// Allocate a node for state that exists but cannot be read.
    pub fn unreadable(&mut self, type_tag: &str, reason: impl Into<String>) -> Link {
        if self.nodes.len() >= self.limits.max_nodes {
            return Link::Truncated;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            type_tag: type_tag.to_string(),
            body: NodeBody::Unreadable {
                reason: reason.into(),
            },
        });
        Link::Node(id)
    }

    /// Scalar body.
    pub fn scalar(value: impl Into<ScalarValue>) -> NodeBody {
        NodeBody::Scalar {
            value: value.into(),
        }
    }

    /// Unreadable body for the current node.
    pub fn denied(reason: impl Into<String>) -> NodeBody {
        NodeBody::Unreadable {
            reason: reason.into(),
        }
    }

    /// Sequence body capturing each element in order.
    pub fn sequence<'v>(&mut self, items: impl IntoIterator<Item = &'v dyn Observe>) -> NodeBody {
        let elements = items.into_iter().map(|item| self.link(item)).collect();
        NodeBody::Sequence { elements }
    }

    /// Start a record body.
    pub fn record(&mut self) -> RecordBuilder<'_> {
        RecordBuilder {
            cx: self,
            fields: BTreeMap::new(),
        }
    }

    fn root(&mut self, value: &RootValue<'_>) -> Root {
        match value {
            RootValue::Void => Root::Void,
            RootValue::Unavailable(reason) => Root::CaptureFailed {
                reason: reason.clone(),
            },
            RootValue::Value(value) => {
                let mark = self.nodes.len();
                match panic::catch_unwind(AssertUnwindSafe(|| self.link(*value))) {
                    Ok(link) => Root::Captured { link },
                    Err(payload) => {
                        self.rollback(mark);
                        Root::CaptureFailed {
                            reason: panic_message(payload.as_ref()),
                        }
                    }
                }
            }
        }
    }

    fn rollback(&mut self, mark: usize) {
        self.nodes.truncate(mark);
        self.seen.retain(|_, id| id.index() < mark);
        self.depth = 0;
    }

    /// Number of nodes captured so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Field-by-field construction of a record body.
pub struct RecordBuilder<'c> {
    cx: &'c mut Capture,
    fields: BTreeMap<String, Link>,
}

impl RecordBuilder<'_> {
    /// Capture a readable field.
    pub fn field(mut self, name: &str, value: &dyn Observe) -> Self {
        let link = self.cx.link(value);
        self.fields.insert(name.to_string(), link);
        self
    }

    /// Record a field the view cannot read.
    pub fn unreadable(mut self, name: &str, type_tag: &str, reason: &str) -> Self {
        let link = self.cx.unreadable(type_tag, reason);
        self.fields.insert(name.to_string(), link);
        self
    }

    /// Finish the record.
    pub fn finish(self) -> NodeBody {
        NodeBody::Record {
            fields: self.fields,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("observer panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("observer panicked: {message}")
    } else {
        "observer panicked".to_string()
    }
}

/// Capture every root of one call into a single snapshot.
///
/// All roots share one arena, so state reachable from several roots is captured once.
pub fn capture_call(limits: CaptureLimits, call: &CallObservation<'_>) -> Snapshot {
    let mut cx = Capture::new(limits);
    let receiver = call.receiver.as_ref().map(|value| cx.root(value));
    let arguments = call.arguments.iter().map(|value| cx.root(value)).collect();
    let return_value = Some(cx.root(&call.return_value));
    Snapshot {
        nodes: cx.nodes,
        receiver,
        arguments,
        return_value,
    }
}

/// Implement [`Observe`] for a struct by listing its observable fields.
///
/// ```
/// use mutant_triage::observe_record;
///
/// struct Account { owner: String, balance: i64 }
/// observe_record!(Account { owner, balance });
/// ```
#[macro_export]
macro_rules! observe_record {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::capture::Observe for $ty {
            fn observe(&self, cx: &mut $crate::capture::Capture) -> $crate::snapshot::NodeBody {
                cx.record()
                    $(.field(stringify!($field), &self.$field))*
                    .finish()
            }
        }
    };
}
