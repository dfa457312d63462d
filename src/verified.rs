use crate::change::Change;
use crate::state::{State, Upstream};
use std::ops::Deref;
use std::sync::Arc;

/// Decides whether a change may pass a [`VerifiedState`].
pub type Predicate = Arc<dyn Fn(&Change) -> bool + Send + Sync>;

struct Gate {
    next: Arc<dyn Upstream>,
    predicate: Predicate,
}

impl Upstream for Gate {
    fn push(&self, change: Change) {
        if (self.predicate)(&change) {
            self.next.push(change);
        } else {
            // nothing was emitted optimistically, so a rejection is a
            // silent drop: subscribers keep observing the committed state
            tracing::debug!(trace = ?change.trace, "change rejected");
        }
    }
}

/// A [`State`] whose writes, including writes through its `sub` children,
/// must pass a predicate before reaching the root.
///
/// The predicate sees the whole [`Change`]; rejected changes are dropped
/// before they reach the root binding, so no subscriber ever observes
/// them.
#[derive(Clone)]
pub struct VerifiedState {
    state: State,
}

impl VerifiedState {
    /// Wraps `state` with `predicate`.
    pub fn new(state: &State, predicate: impl Fn(&Change) -> bool + Send + Sync + 'static) -> Self {
        let mut gated = state.clone();
        gated.up = Arc::new(Gate {
            next: state.up.clone(),
            predicate: Arc::new(predicate),
        });
        Self { state: gated }
    }

    /// Returns the gated state.
    pub fn state(&self) -> &State {
        &self.state
    }
}

impl Deref for VerifiedState {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

impl std::fmt::Debug for VerifiedState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("VerifiedState")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Wraps `state` so every write must pass `predicate`.
pub fn verified(
    state: &State,
    predicate: impl Fn(&Change) -> bool + Send + Sync + 'static,
) -> VerifiedState {
    VerifiedState::new(state, predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::root;
    use crate::value::Value;
    use futures::prelude::*;

    fn monotone(change: &Change) -> bool {
        match (&change.from, &change.to) {
            (Some(from), Some(to)) => from < to,
            _ => false,
        }
    }

    #[test]
    fn rejects_non_monotone_writes() {
        let top = root(Value::from(12u64));
        let counter = verified(&top, monotone);

        let mut reads = vec![counter.value()];
        for write in [10u64, 14, 9, 13, 15] {
            counter.set(write);
            reads.push(counter.value());
        }
        let expect: Vec<Value> = [12u64, 12, 14, 14, 14, 15].map(Value::from).into();
        assert_eq!(reads, expect);
    }

    #[test]
    fn subscribers_only_see_accepted_writes() {
        let top = root(Value::from(12u64));
        let counter = verified(&top, monotone);
        let mut values = counter.subscribe();

        for write in [10u64, 14, 9, 13, 15] {
            counter.set(write);
        }
        let mut seen = Vec::new();
        while let Some(Some(v)) = values.next().now_or_never() {
            seen.push(v);
        }
        assert_eq!(seen, [12u64, 14, 15].map(Value::from).to_vec());
    }

    #[test]
    fn descendant_writes_are_verified() {
        let top = root(Value::map([("count", Value::from(1u64))]));
        let gated = verified(&top, |change| {
            matches!(&change.to, Some(Value::U64(_)))
        });

        gated.sub("count").set(2u64);
        assert_eq!(top.sub("count").value(), Value::from(2u64));

        gated.sub("count").set("two");
        assert_eq!(top.sub("count").value(), Value::from(2u64));
    }

    #[test]
    fn unverified_siblings_bypass_the_gate() {
        let top = root(Value::map([("count", Value::from(1u64))]));
        let _gated = verified(&top, |_| false);

        // the wrapped state itself is not gated
        top.sub("count").set(7u64);
        assert_eq!(top.sub("count").value(), Value::from(7u64));
    }

    #[test]
    fn root_and_subscribers_untouched_after_rejection() {
        let top = root(Value::seq([Value::from(3u64)]));
        let gated = verified(&top, |_| false);
        let before = top.value();
        let mut values = top.sub(0usize).subscribe();
        assert_eq!(values.next().now_or_never(), Some(Some(Value::from(3u64))));

        gated.sub(0usize).set(4u64);
        assert!(top.value().same(&before));
        assert_eq!(values.next().now_or_never(), None);
    }
}
