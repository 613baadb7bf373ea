//! [`Observe`] views for standard library types.
//!
//! Smart pointers and wrappers are transparent: they report the type tag and body
//! of what they point at. `Rc`/`Arc` additionally report the pointee address as
//! identity so shared and cyclic structure is captured once.

use std::any::type_name;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::rc::{self, Rc};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use super::{Capture, Observe};
use crate::snapshot::{NodeBody, ScalarValue};

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident as $wide:ty),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    ScalarValue::$variant(<$wide>::from(value))
                }
            }

            impl Observe for $ty {
                fn observe(&self, _cx: &mut Capture) -> NodeBody {
                    Capture::scalar(*self)
                }
            }
        )*
    };
}

scalar_from! {
    bool => Bool as bool,
    char => Char as char,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
}

impl From<isize> for ScalarValue {
    fn from(value: isize) -> Self {
        ScalarValue::Int(value as i64)
    }
}

impl From<usize> for ScalarValue {
    fn from(value: usize) -> Self {
        ScalarValue::UInt(value as u64)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Text(value.to_string())
    }
}

impl Observe for isize {
    fn observe(&self, _cx: &mut Capture) -> NodeBody {
        Capture::scalar(*self)
    }
}

impl Observe for usize {
    fn observe(&self, _cx: &mut Capture) -> NodeBody {
        Capture::scalar(*self)
    }
}

impl Observe for () {
    fn observe(&self, _cx: &mut Capture) -> NodeBody {
        Capture::scalar(ScalarValue::Null)
    }
}

impl Observe for str {
    fn observe(&self, _cx: &mut Capture) -> NodeBody {
        Capture::scalar(self)
    }
}

impl Observe for String {
    fn observe(&self, _cx: &mut Capture) -> NodeBody {
        Capture::scalar(self.as_str())
    }
}

impl<T: Observe + ?Sized> Observe for &T {
    fn type_tag(&self) -> Cow<'static, str> {
        (**self).type_tag()
    }

    fn identity(&self) -> Option<usize> {
        (**self).identity()
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        (**self).observe(cx)
    }
}

impl<T: Observe + ?Sized> Observe for Box<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        (**self).type_tag()
    }

    fn identity(&self) -> Option<usize> {
        (**self).identity()
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        (**self).observe(cx)
    }
}

impl<T: Observe + ?Sized> Observe for Rc<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        (**self).type_tag()
    }

    fn identity(&self) -> Option<usize> {
        Some(Rc::as_ptr(self).cast::<()>() as usize)
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        (**self).observe(cx)
    }
}

impl<T: Observe + ?Sized> Observe for Arc<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        (**self).type_tag()
    }

    fn identity(&self) -> Option<usize> {
        Some(Arc::as_ptr(self).cast::<()>() as usize)
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        (**self).observe(cx)
    }
}

// Upgrading only borrows the pointee for the duration of the capture.
impl<T: Observe> Observe for rc::Weak<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        match self.upgrade() {
            Some(strong) => strong.type_tag(),
            None => Cow::Borrowed(type_name::<Self>()),
        }
    }

    fn identity(&self) -> Option<usize> {
        self.upgrade().and_then(|strong| strong.identity())
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        match self.upgrade() {
            Some(strong) => strong.observe(cx),
            None => Capture::scalar(ScalarValue::Null),
        }
    }
}

impl<T: Observe> Observe for Option<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        match self {
            Some(value) => value.type_tag(),
            None => Cow::Borrowed(type_name::<Self>()),
        }
    }

    fn identity(&self) -> Option<usize> {
        self.as_ref().and_then(Observe::identity)
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        match self {
            Some(value) => value.observe(cx),
            None => Capture::scalar(ScalarValue::Null),
        }
    }
}

impl<T: Observe> Observe for RefCell<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        match self.try_borrow() {
            Ok(inner) => inner.type_tag(),
            Err(_) => Cow::Borrowed(type_name::<T>()),
        }
    }

    fn identity(&self) -> Option<usize> {
        self.try_borrow().ok().and_then(|inner| inner.identity())
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        match self.try_borrow() {
            Ok(inner) => inner.observe(cx),
            Err(_) => Capture::denied("value is mutably borrowed"),
        }
    }
}

impl<T: Observe + Copy> Observe for Cell<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        self.get().type_tag()
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        let value = self.get();
        value.observe(cx)
    }
}

impl<T: Observe> Observe for Mutex<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<T>())
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        match self.try_lock() {
            Ok(guard) => guard.observe(cx),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().observe(cx),
            Err(TryLockError::WouldBlock) => Capture::denied("lock is held"),
        }
    }
}

impl<T: Observe> Observe for RwLock<T> {
    fn type_tag(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<T>())
    }

    fn observe(&self, cx: &mut Capture) -> NodeBody {
        match self.try_read() {
            Ok(guard) => guard.observe(cx),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().observe(cx),
            Err(TryLockError::WouldBlock) => Capture::denied("lock is held for writing"),
        }
    }
}

impl<T: Observe> Observe for [T] {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

impl<T: Observe, const N: usize> Observe for [T; N] {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

impl<T: Observe> Observe for Vec<T> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

impl<T: Observe> Observe for VecDeque<T> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

impl<T: Observe> Observe for BTreeSet<T> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

// Iteration order follows the hasher; differences caused by it are reported as-is.
impl<T: Observe, S> Observe for HashSet<T, S> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        cx.sequence(self.iter().map(|item| item as &dyn Observe))
    }
}

/// Map entries become record fields named by the key's `Display` output. Keys that
/// render alike get a `#n` suffix in iteration order, so no entry is dropped.
fn keyed_record<'v, K: Display + 'v, V: Observe + 'v>(
    cx: &mut Capture,
    entries: impl Iterator<Item = (&'v K, &'v V)>,
) -> NodeBody {
    let mut used = BTreeSet::new();
    let mut record = cx.record();
    for (key, value) in entries {
        let rendered = key.to_string();
        let mut name = rendered.clone();
        let mut n = 1;
        while used.contains(&name) {
            name = format!("{rendered}#{n}");
            n += 1;
        }
        record = record.field(&name, value);
        used.insert(name);
    }
    record.finish()
}

impl<K: Display, V: Observe> Observe for BTreeMap<K, V> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        keyed_record(cx, self.iter())
    }
}

impl<K: Display, V: Observe, S> Observe for HashMap<K, V, S> {
    fn observe(&self, cx: &mut Capture) -> NodeBody {
        keyed_record(cx, self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CallObservation, CaptureLimits, capture_call};
    use crate::snapshot::{Link, Root, Snapshot};

    fn capture_one(value: &dyn Observe) -> Snapshot {
        capture_call(
            CaptureLimits::default(),
            &CallObservation::new(None, &[value], None),
        )
    }

    fn first_body(snapshot: &Snapshot) -> &NodeBody {
        &snapshot.nodes[0].body
    }

    #[test]
    fn mutably_borrowed_refcell_is_unreadable_not_fatal() {
        let cell = RefCell::new(5_i32);
        let guard = cell.borrow_mut();
        let snapshot = capture_one(&cell);
        drop(guard);

        assert!(matches!(first_body(&snapshot), NodeBody::Unreadable { .. }));
        assert_eq!(snapshot.nodes[0].type_tag, "i32");
    }

    #[test]
    fn held_mutex_is_unreadable_and_released_mutex_is_read() {
        let lock = Mutex::new(vec![1_u8, 2]);
        {
            let _held = lock.lock().expect("mutex should lock");
            let snapshot = capture_one(&lock);
            assert!(matches!(first_body(&snapshot), NodeBody::Unreadable { .. }));
        }
        let snapshot = capture_one(&lock);
        assert!(matches!(
            first_body(&snapshot),
            NodeBody::Sequence { elements } if elements.len() == 2
        ));
    }

    #[test]
    fn map_keys_become_field_names() {
        let mut map = HashMap::new();
        map.insert(2_u32, "two".to_string());
        map.insert(1_u32, "one".to_string());
        let snapshot = capture_one(&map);
        let NodeBody::Record { fields } = first_body(&snapshot) else {
            panic!("map should be a record");
        };
        assert_eq!(fields.keys().cloned().collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn keys_rendering_alike_keep_every_entry() {
        #[derive(PartialEq, Eq, PartialOrd, Ord)]
        struct Bucket(u8);

        impl Display for Bucket {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("bucket")
            }
        }

        let map: BTreeMap<Bucket, i32> = [(Bucket(0), 10), (Bucket(1), 11), (Bucket(2), 12)]
            .into_iter()
            .collect();
        let snapshot = capture_one(&map);
        let NodeBody::Record { fields } = first_body(&snapshot) else {
            panic!("map should be a record");
        };
        assert_eq!(
            fields.keys().cloned().collect::<Vec<_>>(),
            vec!["bucket", "bucket#1", "bucket#2"]
        );
        let Some(Link::Node(last)) = fields.get("bucket#2") else {
            panic!("last entry should be captured");
        };
        assert_eq!(
            snapshot.node(*last).map(|node| &node.body),
            Some(&NodeBody::Scalar {
                value: ScalarValue::Int(12)
            })
        );
    }

    #[test]
    fn none_and_dangling_weak_are_null() {
        let none: Option<String> = None;
        assert_eq!(
            first_body(&capture_one(&none)),
            &NodeBody::Scalar {
                value: ScalarValue::Null
            }
        );

        let weak = {
            let strong = Rc::new(1_i64);
            Rc::downgrade(&strong)
        };
        assert_eq!(
            first_body(&capture_one(&weak)),
            &NodeBody::Scalar {
                value: ScalarValue::Null
            }
        );
    }

    #[test]
    fn capture_leaves_reference_counts_untouched() {
        let shared = Rc::new(vec![1_i32, 2, 3]);
        let weak = Rc::downgrade(&shared);
        let _ = capture_one(&weak);
        let _ = capture_one(&shared);
        assert_eq!(Rc::strong_count(&shared), 1);
        assert_eq!(Rc::weak_count(&shared), 1);
    }

    #[test]
    fn sequences_preserve_order_and_length() {
        let values = VecDeque::from(vec!['a', 'b', 'c']);
        let snapshot = capture_one(&values);
        let NodeBody::Sequence { elements } = first_body(&snapshot) else {
            panic!("deque should be a sequence");
        };
        let chars: Vec<&NodeBody> = elements
            .iter()
            .map(|link| match link {
                Link::Node(id) => &snapshot.nodes[id.index()].body,
                Link::Truncated => panic!("nothing should be truncated"),
            })
            .collect();
        assert_eq!(
            chars,
            vec![
                &NodeBody::Scalar {
                    value: ScalarValue::Char('a')
                },
                &NodeBody::Scalar {
                    value: ScalarValue::Char('b')
                },
                &NodeBody::Scalar {
                    value: ScalarValue::Char('c')
                },
            ]
        );
        assert!(matches!(snapshot.return_value, Some(Root::Void)));
    }
}
