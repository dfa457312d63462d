use crate::path::{Key, Path, PathBuf};
use crate::value::Value;
use anyhow::{Context, Result};
use fnv::FnvHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// Key-to-index snapshot of a keyed sequence, taken when a change was emitted.
pub type KeyMap = FnvHashMap<Value, usize>;

/// One hop of a [`Trace`].
#[derive(Clone, Debug)]
pub struct TraceElem {
    /// The key descended through at this hop.
    pub key: Key,
    /// For hops addressing a keyed sequence, the key map at emission time.
    pub keys: Option<Arc<KeyMap>>,
}

impl TraceElem {
    fn new(key: Key) -> Self {
        Self { key, keys: None }
    }
}

/// The address a change applies to, oriented from the root downward.
///
/// A change with trace `a.2.name` originated at the node at path
/// `(a, 2, name)`. A change without a trace originated at the root.
#[derive(Clone, Debug, Default)]
pub struct Trace(SmallVec<[TraceElem; 4]>);

impl Trace {
    /// Builds a trace addressing `path`.
    pub fn from_path(path: Path<'_>) -> Self {
        Self(path.iter().cloned().map(TraceElem::new).collect())
    }

    /// Returns the number of hops.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the trace has no hops.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the hop at `depth`.
    pub fn get(&self, depth: usize) -> Option<&TraceElem> {
        self.0.get(depth)
    }

    /// Returns an iterator over the hops.
    pub fn iter(&self) -> impl Iterator<Item = &TraceElem> {
        self.0.iter()
    }

    /// Returns the trace without its first hop.
    pub fn narrow(&self) -> Option<(&TraceElem, Trace)> {
        let first = self.0.first()?;
        Some((first, Trace(self.0[1..].iter().cloned().collect())))
    }

    /// Returns the addressed path, with key maps stripped.
    pub fn path(&self) -> PathBuf {
        self.0.iter().map(|elem| elem.key.clone()).collect()
    }

    /// Attaches a key map to the hop at `depth`.
    pub fn annotate(&mut self, depth: usize, keys: Arc<KeyMap>) {
        if let Some(elem) = self.0.get_mut(depth) {
            elem.keys = Some(keys);
        }
    }
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// How a change's origin relates to an observing node's path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Relation {
    /// The change originated at an ancestor (or cannot be ruled out: a
    /// traceless root replacement); the node's value may have changed.
    Above,
    /// The change originated at the node itself.
    At,
    /// The change originated below the node; its value changed at a lower
    /// address.
    Below,
    /// The change addresses a sibling subtree; the node is unaffected.
    Disjoint,
}

impl Relation {
    /// Returns true unless the change provably misses the node.
    pub fn overlaps(&self) -> bool {
        !matches!(self, Relation::Disjoint)
    }
}

/// Walks `trace` and `path` in lockstep and classifies their overlap.
///
/// An absent trace is a root-origin change, which can address anything.
pub fn relation(trace: Option<&Trace>, path: Path<'_>) -> Relation {
    let trace = match trace {
        Some(trace) => trace,
        None => {
            return if path.is_empty() {
                Relation::At
            } else {
                Relation::Above
            }
        }
    };
    for (depth, key) in path.iter().enumerate() {
        match trace.get(depth) {
            Some(elem) if elem.key == *key => continue,
            Some(_) => return Relation::Disjoint,
            None => return Relation::Above,
        }
    }
    if trace.len() == path.len() {
        Relation::At
    } else {
        Relation::Below
    }
}

/// A single write flowing through the tree.
#[derive(Clone, Debug)]
pub struct Change {
    /// Post-change value from the observing node's perspective. On the
    /// shared root downstream this is the new root value.
    pub value: Value,
    /// Pre-change value at the origin.
    pub from: Option<Value>,
    /// Post-change value at the origin.
    pub to: Option<Value>,
    /// Address of the origin, oriented from the observer downward: on the
    /// shared root downstream it starts at a first-level key, on a node's
    /// change stream it is re-scoped to that node. `None` when the origin
    /// is at or above the observer.
    pub trace: Option<Trace>,
}

impl Change {
    /// Builds the change emitted by a write of `to` at `path`.
    pub fn write(from: Value, to: Value, path: Path<'_>) -> Self {
        let trace = if path.is_empty() {
            None
        } else {
            Some(Trace::from_path(path))
        };
        Self {
            value: to.clone(),
            from: Some(from),
            to: Some(to),
            trace,
        }
    }

    /// Applies the change to `root`, producing the new root value.
    ///
    /// Containers along the trace are shallow-copied; everything else is
    /// shared with `root`.
    pub fn apply(&self, root: &Value) -> Result<Value> {
        let to = self.to.clone().unwrap_or_else(|| self.value.clone());
        match &self.trace {
            None => Ok(to),
            Some(trace) => root
                .replace(trace.path().as_path(), to)
                .with_context(|| format!("applying change at {}", trace)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathBuf;

    fn path(keys: &[Key]) -> PathBuf {
        keys.iter().cloned().collect()
    }

    #[test]
    fn relation_cases() {
        let trace = Trace::from_path(path(&["a".into(), 2usize.into()]).as_path());

        // origin below the observer
        let p = path(&["a".into()]);
        assert_eq!(relation(Some(&trace), p.as_path()), Relation::Below);
        // origin at the observer
        let p = path(&["a".into(), 2usize.into()]);
        assert_eq!(relation(Some(&trace), p.as_path()), Relation::At);
        // origin above the observer
        let p = path(&["a".into(), 2usize.into(), "name".into()]);
        assert_eq!(relation(Some(&trace), p.as_path()), Relation::Above);
        // sibling subtree
        let p = path(&["a".into(), 1usize.into(), "name".into()]);
        assert_eq!(relation(Some(&trace), p.as_path()), Relation::Disjoint);
        assert!(!relation(Some(&trace), p.as_path()).overlaps());
        // root-origin change addresses everything
        assert_eq!(relation(None, p.as_path()), Relation::Above);
        assert_eq!(relation(None, PathBuf::new().as_path()), Relation::At);
    }

    #[test]
    fn apply_replaces_and_shares() {
        let root = Value::map([("people", Value::seq([Value::map([("name", "John")])]))]);
        let p = path(&["people".into(), 0usize.into(), "name".into()]);
        let change = Change::write(root.pluck(p.as_path()), "Jane".into(), p.as_path());
        let next = change.apply(&root).unwrap();
        assert_eq!(next.pluck(p.as_path()), Value::from("Jane"));

        // a root-origin change replaces the whole value
        let change = Change {
            value: Value::from(1u64),
            from: None,
            to: Some(Value::from(1u64)),
            trace: None,
        };
        assert_eq!(change.apply(&next).unwrap(), Value::from(1u64));
    }

    #[test]
    fn apply_out_of_bounds_fails() {
        let root = Value::seq([Value::from(1u64)]);
        let p = path(&[4usize.into()]);
        let change = Change::write(Value::Null, Value::from(2u64), p.as_path());
        assert!(change.apply(&root).is_err());
    }

    #[test]
    fn annotate_attaches_keys() {
        let mut trace = Trace::from_path(path(&["people".into(), 1usize.into()]).as_path());
        let mut keys = KeyMap::default();
        keys.insert(Value::from(101u64), 1);
        trace.annotate(1, Arc::new(keys));
        assert!(trace.get(0).unwrap().keys.is_none());
        assert_eq!(
            trace.get(1).unwrap().keys.as_ref().unwrap()[&Value::from(101u64)],
            1
        );
    }
}
