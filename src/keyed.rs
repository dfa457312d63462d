use crate::bus::{Bus, Receiver};
use crate::change::{relation, Change, KeyMap};
use crate::state::{Addr, Resolved, State};
use crate::value::{Value, ValueKind};
use futures::stream::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Extracts the stable key of a sequence item.
pub type KeyFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// One added or deleted item, with the index it was added at or deleted
/// from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListEntry {
    /// Index of the item in its sequence.
    pub index: usize,
    /// The item itself.
    pub item: Value,
}

/// One item whose index changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListMove {
    /// Index before the change.
    pub old_index: usize,
    /// Index after the change.
    pub new_index: usize,
    /// The item after the change.
    pub item: Value,
}

/// Structural edits turning one sequence into the next.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListChanges {
    /// Items whose key is new to the sequence.
    pub additions: Vec<ListEntry>,
    /// Items whose key left the sequence.
    pub deletions: Vec<ListEntry>,
    /// Items whose key stayed but whose index changed.
    pub moves: Vec<ListMove>,
}

impl ListChanges {
    /// Returns true if the change is purely value-level (no structural
    /// edits).
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.moves.is_empty()
    }
}

/// A non-fatal problem observed while keying a sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    /// Two items produced the same key; the later one is unaddressable.
    DuplicateKey {
        /// The colliding key.
        key: Value,
        /// Index of the ignored later occurrence.
        index: usize,
    },
    /// The wrapped state's value is not a sequence.
    NotASequence {
        /// The kind actually found.
        kind: ValueKind,
    },
}

struct MapCache {
    seq: Value,
    map: Arc<KeyMap>,
}

struct DiffCache {
    prev: Value,
    next: Value,
    diff: Arc<ListChanges>,
}

/// Shared internals of a [`KeyedState`]: the wrapped state, the key
/// function and the per-generation memoized key map and diff.
pub(crate) struct KeyedInner {
    state: State,
    key_fn: KeyFn,
    map_cache: Mutex<Option<MapCache>>,
    diff_cache: Mutex<Option<DiffCache>>,
    diags: Bus<Diagnostic>,
}

impl KeyedInner {
    /// Resolves the location of the item keyed `key` under `root`.
    pub(crate) fn resolve_key(
        &self,
        root: &Value,
        change: Option<&Change>,
        key: &Value,
    ) -> Option<Resolved> {
        let mut resolved = self.state.addr.resolve(root, change)?;
        let seq = root.pluck(resolved.path.as_path());
        let depth = resolved.path.len();
        let map = self.keys_for(change, depth, &seq);
        let ix = *map.get(key)?;
        resolved.path.index(ix);
        resolved.keys.push((depth, map));
        Some(resolved)
    }

    /// Key map for the sequence at `seq`, which sits at trace depth
    /// `depth` of `change`.
    ///
    /// A change written through a keyed child carries the map on its
    /// trace; adopting it skips the rebuild the memo cannot serve, since
    /// such a write replaced the sequence pointer.
    fn keys_for(&self, change: Option<&Change>, depth: usize, seq: &Value) -> Arc<KeyMap> {
        let attached = change
            .and_then(|change| change.trace.as_ref())
            .and_then(|trace| trace.get(depth))
            .and_then(|elem| elem.keys.clone());
        let map = match attached {
            Some(map) => map,
            None => return self.map_at(seq),
        };
        let mut cache = self.map_cache.lock();
        let stale = !matches!(&*cache, Some(cached) if cached.seq.same(seq));
        if stale {
            *cache = Some(MapCache {
                seq: seq.clone(),
                map: map.clone(),
            });
        }
        map
    }

    /// Returns the key map for `seq`, rebuilding it only when the
    /// sequence itself changed since the last keying.
    fn map_at(&self, seq: &Value) -> Arc<KeyMap> {
        let mut cache = self.map_cache.lock();
        if let Some(cached) = &*cache {
            if cached.seq.same(seq) {
                return cached.map.clone();
            }
        }
        let map = Arc::new(self.build_map(seq, true));
        *cache = Some(MapCache {
            seq: seq.clone(),
            map: map.clone(),
        });
        map
    }

    fn build_map(&self, seq: &Value, report: bool) -> KeyMap {
        let mut map = KeyMap::default();
        match seq.items() {
            Some(items) => {
                for (ix, item) in items.iter().enumerate() {
                    let key = (self.key_fn)(item);
                    if map.contains_key(&key) {
                        // first occurrence wins; later ones stay in the
                        // sequence but cannot be addressed by key
                        if report {
                            tracing::warn!(index = ix, "duplicate key {} in keyed sequence", key);
                            self.diags.publish(Diagnostic::DuplicateKey { key, index: ix });
                        }
                    } else {
                        map.insert(key, ix);
                    }
                }
            }
            None => {
                if !seq.is_null() && report {
                    tracing::warn!("keyed state over a {:?} value", seq.kind());
                    self.diags.publish(Diagnostic::NotASequence { kind: seq.kind() });
                }
            }
        }
        map
    }

    /// Diffs `prev` against `next`, memoizing the result so concurrent
    /// subscribers share one computation per replacement.
    fn diff_at(&self, prev: &Value, next: &Value, map_b: Arc<KeyMap>) -> Arc<ListChanges> {
        let mut cache = self.diff_cache.lock();
        if let Some(cached) = &*cache {
            if cached.prev.same(prev) && cached.next.same(next) {
                return cached.diff.clone();
            }
        }
        let diff = Arc::new(self.diff(prev, next, &map_b));
        *cache = Some(DiffCache {
            prev: prev.clone(),
            next: next.clone(),
            diff: diff.clone(),
        });
        diff
    }

    fn diff(&self, prev: &Value, next: &Value, map_b: &KeyMap) -> ListChanges {
        let a_items = prev.items().unwrap_or(&[]);
        let b_items = next.items().unwrap_or(&[]);
        let map_a = self.build_map(prev, false);
        let mut changes = ListChanges::default();
        for (ix, item) in a_items.iter().enumerate() {
            let key = (self.key_fn)(item);
            if map_a.get(&key) != Some(&ix) {
                continue;
            }
            match map_b.get(&key) {
                None => changes.deletions.push(ListEntry {
                    index: ix,
                    item: item.clone(),
                }),
                Some(&new_ix) if new_ix != ix => changes.moves.push(ListMove {
                    old_index: ix,
                    new_index: new_ix,
                    item: b_items[new_ix].clone(),
                }),
                Some(_) => {}
            }
        }
        for (ix, item) in b_items.iter().enumerate() {
            let key = (self.key_fn)(item);
            if map_b.get(&key) != Some(&ix) {
                continue;
            }
            if !map_a.contains_key(&key) {
                changes.additions.push(ListEntry {
                    index: ix,
                    item: item.clone(),
                });
            }
        }
        changes
    }
}

/// A sequence-valued [`State`] whose items are addressed by a stable key
/// instead of their index.
///
/// Items are keyed by a user-supplied function; the key-to-index map and
/// the structural diff of each sequence replacement are computed once and
/// shared by all derived subscriptions.
#[derive(Clone)]
pub struct KeyedState {
    inner: Arc<KeyedInner>,
}

impl KeyedState {
    /// Wraps `state` with `key_fn`.
    pub fn new(state: &State, key_fn: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(KeyedInner {
                state: state.clone(),
                key_fn: Arc::new(key_fn),
                map_cache: Mutex::new(None),
                diff_cache: Mutex::new(None),
                diags: Bus::default(),
            }),
        }
    }

    /// Returns the wrapped state.
    pub fn state(&self) -> &State {
        &self.inner.state
    }

    /// Returns a state over the item with key `key`.
    ///
    /// The item is found by key at every read, write and emission, so the
    /// returned state follows it across reorders. While the key is absent
    /// the state reads [`Value::Null`] and its streams stay quiet.
    pub fn key(&self, key: impl Into<Value>) -> State {
        State {
            core: self.inner.state.core.clone(),
            up: self.inner.state.up.clone(),
            addr: Addr::Keyed {
                keyed: self.inner.clone(),
                key: key.into(),
                rest: Default::default(),
            },
        }
    }

    /// Streams the index of the item with key `key`, starting with its
    /// current index; `None` while the item is absent.
    pub fn index(&self, key: impl Into<Value>) -> IndexStream {
        IndexStream {
            rx: self.inner.state.core.subscribe(true),
            keyed: self.inner.clone(),
            key: key.into(),
            last: None,
        }
    }

    /// Streams the structural edits of every sequence replacement.
    pub fn changes(&self) -> ListChangeStream {
        let root = self.inner.state.core.snapshot();
        let prev = match self.inner.state.addr.resolve(&root, None) {
            Some(resolved) => root.pluck(resolved.path.as_path()),
            None => Value::Null,
        };
        ListChangeStream {
            rx: self.inner.state.core.subscribe(false),
            keyed: self.inner.clone(),
            prev,
        }
    }

    /// Streams keying problems: duplicate keys and non-sequence values.
    pub fn diagnostics(&self) -> DiagnosticStream {
        DiagnosticStream {
            rx: self.inner.diags.subscribe(None),
        }
    }
}

impl std::fmt::Debug for KeyedState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KeyedState")
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

/// Wraps a sequence-valued state so its items can be addressed by key.
pub fn keyed(state: &State, key_fn: impl Fn(&Value) -> Value + Send + Sync + 'static) -> KeyedState {
    KeyedState::new(state, key_fn)
}

/// Stream of an item's index. See [`KeyedState::index`].
pub struct IndexStream {
    rx: Receiver<Arc<Change>>,
    keyed: Arc<KeyedInner>,
    key: Value,
    last: Option<Option<usize>>,
}

impl Stream for IndexStream {
    type Item = Option<usize>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let change = match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(change)) => change,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            let root = &change.value;
            let ix = match this.keyed.state.addr.resolve(root, Some(&change)) {
                Some(resolved) => {
                    if !relation(change.trace.as_ref(), resolved.path.as_path()).overlaps() {
                        continue;
                    }
                    let seq = root.pluck(resolved.path.as_path());
                    this.keyed
                        .keys_for(Some(&change), resolved.path.len(), &seq)
                        .get(&this.key)
                        .copied()
                }
                None => None,
            };
            if this.last == Some(ix) {
                continue;
            }
            this.last = Some(ix);
            return Poll::Ready(Some(ix));
        }
    }
}

/// Stream of structural sequence edits. See [`KeyedState::changes`].
pub struct ListChangeStream {
    rx: Receiver<Arc<Change>>,
    keyed: Arc<KeyedInner>,
    prev: Value,
}

impl Stream for ListChangeStream {
    type Item = ListChanges;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let change = match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(change)) => change,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            let root = &change.value;
            let (next, map_b) = match this.keyed.state.addr.resolve(root, Some(&change)) {
                Some(resolved) => {
                    if !relation(change.trace.as_ref(), resolved.path.as_path()).overlaps() {
                        continue;
                    }
                    let next = root.pluck(resolved.path.as_path());
                    let map_b = this.keyed.keys_for(Some(&change), resolved.path.len(), &next);
                    (next, map_b)
                }
                None => (Value::Null, Arc::new(KeyMap::default())),
            };
            if next.same(&this.prev) {
                continue;
            }
            let diff = this.keyed.diff_at(&this.prev, &next, map_b);
            this.prev = next;
            return Poll::Ready(Some((*diff).clone()));
        }
    }
}

/// Stream of keying problems. See [`KeyedState::diagnostics`].
pub struct DiagnosticStream {
    rx: Receiver<Diagnostic>,
}

impl Stream for DiagnosticStream {
    type Item = Diagnostic;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
