//! The replicated data model.
//!
//! - `id`: client ids, clocks, ids and state vectors
//! - `content` / `block`: the structs that make up history
//! - `store`: per-client columns of structs
//! - `integrate`: YATA ordering of items inside their container
//! - `delete_set`: tombstone ranges, independent of what is known
//! - `pending`: integration of blocks whose dependencies may be missing
//! - `doc`: the document handle tying these together

pub mod block;
pub mod content;
pub mod delete_set;
pub mod doc;
pub mod id;
mod integrate;
pub(crate) mod pending;
pub mod store;

use delete_set::DeleteSet;
use id::StateVector;

use crate::update::Update;

/// A CRDT is a data type with a merge operator that is commutative,
/// associative, and idempotent.
pub trait Crdt {
    /// Merge another instance into this one.
    fn merge(&mut self, other: &Self);
}

impl Crdt for StateVector {
    fn merge(&mut self, other: &Self) {
        StateVector::merge(self, other);
    }
}

impl Crdt for DeleteSet {
    fn merge(&mut self, other: &Self) {
        DeleteSet::merge(self, other);
    }
}

impl Crdt for Update {
    fn merge(&mut self, other: &Self) {
        let this = std::mem::take(self);
        *self = Update::merge([this, other.clone()]);
    }
}
