use crate::bus::{Bus, Receiver};
use crate::change::{relation, Change, KeyMap, Trace};
use crate::keyed::KeyedInner;
use crate::path::{Key, PathBuf};
use crate::value::Value;
use futures::sink::Sink;
use futures::stream::Stream;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Equality predicate used to suppress redundant emissions.
pub type Equality = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// The root binding: retains the root value, applies upstream changes and
/// rebroadcasts them downstream.
pub(crate) struct Core {
    value: Mutex<Value>,
    bus: Bus<Arc<Change>>,
    eq: Equality,
}

impl Core {
    pub fn snapshot(&self) -> Value {
        self.value.lock().clone()
    }

    pub fn commit(&self, change: Change) {
        let mut value = self.value.lock();
        let next = match change.apply(&value) {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!("dropping unappliable change: {:#}", err);
                return;
            }
        };
        *value = next.clone();
        let mut change = change;
        change.value = next;
        // publishing under the lock keeps the broadcast order identical to
        // the commit order
        self.bus.publish(Arc::new(change));
    }

    /// Subscribes to the shared downstream; with `replay`, the subscription
    /// is seeded with a synthetic change carrying the current root value.
    pub fn subscribe(&self, replay: bool) -> Receiver<Arc<Change>> {
        let value = self.value.lock();
        let seed = if replay {
            Some(Arc::new(Change {
                value: value.clone(),
                from: None,
                to: Some(value.clone()),
                trace: None,
            }))
        } else {
            None
        };
        self.bus.subscribe(seed)
    }
}

/// The sink a node pushes its writes into. Gates (verification) stack by
/// wrapping the next sink in the chain; the chain ends at the root binding.
pub(crate) trait Upstream: Send + Sync {
    fn push(&self, change: Change);
}

struct RootUpstream {
    core: Arc<Core>,
}

impl Upstream for RootUpstream {
    fn push(&self, change: Change) {
        self.core.commit(change);
    }
}

/// Where a node lives in the tree: a fixed path, or an item of a keyed
/// sequence looked up by key at every use.
#[derive(Clone)]
pub(crate) enum Addr {
    Fixed(PathBuf),
    Keyed {
        keyed: Arc<KeyedInner>,
        key: Value,
        rest: PathBuf,
    },
}

/// A concrete path for one particular root value, together with the key
/// maps of the keyed hops crossed while resolving it.
pub(crate) struct Resolved {
    pub path: PathBuf,
    pub keys: SmallVec<[(usize, Arc<KeyMap>); 1]>,
}

impl Resolved {
    pub fn fixed(path: PathBuf) -> Self {
        Self {
            path,
            keys: SmallVec::new(),
        }
    }

    /// Builds the trace for a write at this location.
    pub fn trace(&self) -> Option<Trace> {
        if self.path.is_empty() {
            return None;
        }
        let mut trace = Trace::from_path(self.path.as_path());
        for (depth, keys) in &self.keys {
            trace.annotate(*depth, keys.clone());
        }
        Some(trace)
    }
}

impl Addr {
    /// Resolves the address against `root`, or `None` when a keyed hop's
    /// key is currently absent. When resolving for an observed `change`,
    /// keyed hops reuse a key map carried on its trace.
    pub fn resolve(&self, root: &Value, change: Option<&Change>) -> Option<Resolved> {
        match self {
            Addr::Fixed(path) => Some(Resolved::fixed(path.clone())),
            Addr::Keyed { keyed, key, rest } => {
                let mut resolved = keyed.resolve_key(root, change, key)?;
                resolved.path.extend(rest.as_path());
                Some(resolved)
            }
        }
    }
}

impl std::fmt::Debug for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Addr::Fixed(path) => write!(f, "{}", path),
            Addr::Keyed { key, rest, .. } => write!(f, "[key={}].{}", key, rest),
        }
    }
}

/// A live view of one location in the tree.
///
/// States are cheap handles: children share the root's plumbing and differ
/// only in their address, so `sub` can be called freely and repeatedly.
/// Reading is synchronous against the retained root; writing emits a
/// [`Change`] into the upstream and becomes observable once the change has
/// round-tripped through the root binding.
#[derive(Clone)]
pub struct State {
    pub(crate) core: Arc<Core>,
    pub(crate) up: Arc<dyn Upstream>,
    pub(crate) addr: Addr,
}

impl State {
    /// Returns the current value at this node.
    pub fn value(&self) -> Value {
        let root = self.core.snapshot();
        match self.addr.resolve(&root, None) {
            Some(resolved) => root.pluck(resolved.path.as_path()),
            None => Value::Null,
        }
    }

    /// Writes a new value at this node.
    ///
    /// The node's own caches are not touched; the value becomes observable
    /// when the change returns on the downstream.
    pub fn set(&self, to: impl Into<Value>) {
        let to = to.into();
        let root = self.core.snapshot();
        let resolved = match self.addr.resolve(&root, None) {
            Some(resolved) => resolved,
            None => {
                tracing::warn!(addr = ?self.addr, "dropping write to unresolvable node");
                return;
            }
        };
        let from = root.pluck(resolved.path.as_path());
        let trace = resolved.trace();
        self.up.push(Change {
            value: to.clone(),
            from: Some(from),
            to: Some(to),
            trace,
        });
    }

    /// Returns a child node at this node's path extended by `key`.
    pub fn sub(&self, key: impl Into<Key>) -> State {
        let key = key.into();
        let mut child = self.clone();
        match &mut child.addr {
            Addr::Fixed(path) => path.push(key),
            Addr::Keyed { rest, .. } => rest.push(key),
        }
        child
    }

    /// Subscribes to this node's values.
    ///
    /// The stream replays the current value immediately, then emits every
    /// downstream value addressing this node, deduplicated with the
    /// equality configured at the root. Dropping the stream cancels the
    /// subscription.
    pub fn subscribe(&self) -> ValueStream {
        ValueStream {
            rx: self.core.subscribe(true),
            addr: self.addr.clone(),
            eq: self.core.eq.clone(),
            last: None,
        }
    }

    /// Returns the change stream observed by this node: every committed
    /// change overlapping its address, with `value` plucked at this node
    /// and the trace re-scoped to it.
    pub fn changes(&self) -> ChangeStream {
        ChangeStream {
            rx: self.core.subscribe(true),
            addr: self.addr.clone(),
        }
    }

    /// Returns a sink that pushes foreign changes into this node's
    /// upstream, for bridging from an external source.
    pub fn upstream(&self) -> UpstreamSink {
        UpstreamSink {
            up: self.up.clone(),
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("State")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Feeding a value into a node is the same as setting it.
impl Sink<Value> for State {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Value) -> Result<(), Self::Error> {
        State::set(&self, item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Stream of values at one node. See [`State::subscribe`].
pub struct ValueStream {
    rx: Receiver<Arc<Change>>,
    addr: Addr,
    eq: Equality,
    last: Option<Value>,
}

impl Stream for ValueStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let change = match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(change)) => change,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            let root = &change.value;
            let next = match this.addr.resolve(root, Some(&change)) {
                Some(resolved) => {
                    if !relation(change.trace.as_ref(), resolved.path.as_path()).overlaps() {
                        continue;
                    }
                    root.pluck(resolved.path.as_path())
                }
                None => Value::Null,
            };
            if let Some(last) = &this.last {
                if (this.eq)(last, &next) {
                    continue;
                }
            }
            this.last = Some(next.clone());
            return Poll::Ready(Some(next));
        }
    }
}

/// Re-scopes a root-oriented trace to an observer `depth` hops down.
/// Returns `None` once the origin is at or above the observer.
fn relative_trace(trace: Option<Trace>, depth: usize) -> Option<Trace> {
    let mut trace = trace?;
    for _ in 0..depth {
        let (_, rest) = trace.narrow()?;
        trace = rest;
    }
    if trace.is_empty() {
        None
    } else {
        Some(trace)
    }
}

/// Stream of changes observed by one node. See [`State::changes`].
pub struct ChangeStream {
    rx: Receiver<Arc<Change>>,
    addr: Addr,
}

impl Stream for ChangeStream {
    type Item = Change;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let change = match Pin::new(&mut this.rx).poll_next(cx) {
                Poll::Ready(Some(change)) => change,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };
            let root = &change.value;
            if let Some(resolved) = this.addr.resolve(root, Some(&change)) {
                if relation(change.trace.as_ref(), resolved.path.as_path()).overlaps() {
                    let mut observed = (*change).clone();
                    observed.value = root.pluck(resolved.path.as_path());
                    observed.trace = relative_trace(observed.trace.take(), resolved.path.len());
                    return Poll::Ready(Some(observed));
                }
            }
        }
    }
}

/// Sink of foreign changes into a node's upstream. See [`State::upstream`].
pub struct UpstreamSink {
    up: Arc<dyn Upstream>,
}

impl Sink<Change> for UpstreamSink {
    type Error = Infallible;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Change) -> Result<(), Self::Error> {
        self.up.push(item);
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Configures and builds a root [`State`].
pub struct RootBuilder {
    equality: Equality,
}

impl Default for RootBuilder {
    fn default() -> Self {
        Self {
            equality: Arc::new(Value::same),
        }
    }
}

impl RootBuilder {
    /// Creates a builder with the default identity equality.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom equality for emission suppression.
    pub fn equality(
        mut self,
        eq: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.equality = Arc::new(eq);
        self
    }

    /// Uses structural equality for emission suppression.
    pub fn structural(self) -> Self {
        self.equality(|a, b| a == b)
    }

    /// Builds the root state holding `initial`.
    pub fn build(self, initial: impl Into<Value>) -> State {
        let core = Arc::new(Core {
            value: Mutex::new(initial.into()),
            bus: Bus::default(),
            eq: self.equality,
        });
        State {
            up: Arc::new(RootUpstream { core: core.clone() }),
            core,
            addr: Addr::Fixed(PathBuf::new()),
        }
    }
}

/// Builds a root [`State`] holding `initial`, with the default equality.
pub fn root(initial: impl Into<Value>) -> State {
    RootBuilder::default().build(initial)
}
