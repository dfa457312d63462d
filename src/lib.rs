//! # A reactive state tree
//!
//! An application holds a single hierarchical value: an arbitrary nesting
//! of maps, sequences and leaves. This crate turns any location of that
//! tree into a live [`State`]: a cheap handle that can be read
//! synchronously, written through, and subscribed to as a stream of
//! values. There is no central dispatcher; a write anywhere propagates up
//! into the retained root value and down to every overlapping subscriber.
//!
//! ## Values and paths
//! The tree holds [`Value`]s. Container payloads are reference-counted,
//! so cloning is cheap and rewriting a location shares every untouched
//! sub-tree with the previous root. Locations are addressed by a
//! [`Path`]: a sequence of [`Key`]s (map fields and sequence indices)
//! starting at the root. Callers must treat values as immutable: a
//! location is changed by assigning a new value, never by mutating a
//! container in place.
//!
//! ## Changes
//! Every write becomes a [`Change`] carrying the pre- and post-values at
//! its origin and a [`Trace`]: the origin's address, oriented from the
//! root downward. Changes flow into the node's *upstream*, reach the root
//! binding, are applied to the retained root value (shallow-copying the
//! spine along the trace) and are then rebroadcast on the shared
//! *downstream*. Every node filters the same broadcast by walking the
//! change's trace against its own path in lockstep: a change on a sibling
//! subtree is discarded, anything else re-plucks the node's value. A
//! configurable equality (pointer identity by default, see
//! [`Value::same`]) suppresses the emissions this filter cannot rule out.
//!
//! Nodes never hold parent pointers and parents never enumerate children;
//! a child is just another filter over the shared plumbing, so handles
//! can be created and dropped freely.
//!
//! ## Keyed sequences
//! A sequence-valued state can be wrapped in a [`KeyedState`], which
//! indexes its items by a user-supplied key function. Items are then
//! addressed by key instead of index: [`KeyedState::key`] returns a state
//! that follows its item across reorders, [`KeyedState::index`] streams
//! an item's current position and [`KeyedState::changes`] streams the
//! structural difference (additions, deletions, moves) of every sequence
//! replacement, computed in one O(|A|+|B|) pass and shared by all
//! subscribers. Duplicate keys are reported on a diagnostic side channel
//! and never panic.
//!
//! ## Verification
//! A [`VerifiedState`] gates the write path with a predicate over the
//! full change. Accepted changes pass through unchanged; rejected changes
//! are dropped before they reach the root, so subscribers only ever
//! observe committed state.
//!
//! ## Example
//! ```
//! use futures::prelude::*;
//! use substate::{keyed, root, Value};
//!
//! # async_std::task::block_on(async {
//! let team = root(Value::seq([
//!     Value::map([("id", Value::from(101u64)), ("name", Value::from("Jill"))]),
//!     Value::map([("id", Value::from(102u64)), ("name", Value::from("Jack"))]),
//! ]));
//!
//! // subscribe to one field of one item, addressed by key
//! let people = keyed(&team, |p| p.get(&"id".into()));
//! let mut name = people.key(101u64).sub("name").subscribe();
//! assert_eq!(name.next().await, Some(Value::from("Jill")));
//!
//! // writes propagate up into the root and back down to subscribers
//! people.key(101u64).sub("name").set("Jillian");
//! assert_eq!(name.next().await, Some(Value::from("Jillian")));
//! assert_eq!(team.sub(0usize).sub("name").value(), Value::from("Jillian"));
//! # });
//! ```
#![warn(missing_docs)]
mod bus;
mod change;
mod keyed;
mod path;
#[cfg(test)]
mod props;
mod state;
mod value;
mod verified;

pub use crate::change::{relation, Change, KeyMap, Relation, Trace, TraceElem};
pub use crate::keyed::{
    keyed, Diagnostic, DiagnosticStream, IndexStream, KeyFn, KeyedState, ListChangeStream,
    ListChanges, ListEntry, ListMove,
};
pub use crate::path::{Key, Path, PathBuf};
pub use crate::state::{
    root, ChangeStream, Equality, RootBuilder, State, UpstreamSink, ValueStream,
};
pub use crate::value::{Value, ValueKind};
pub use crate::verified::{verified, Predicate, VerifiedState};
