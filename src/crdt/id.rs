//! Identifiers for replicated structs and per-client progress.
//!
//! # Identifier Hierarchy
//!
//! - `ClientId`: a replica, chosen at random when a document is created
//! - `Id`: a single clock tick of one client, `(client, clock)`
//! - `StateVector`: for every client, the next clock we expect from it
//!
//! Ids are globally unique because a client never reuses a clock, and
//! totally ordered so they can be compared deterministically on every
//! replica.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;

/// A replica identifier. Only the low 53 bits are used on the wire.
pub type ClientId = u64;

/// A per-client logical clock. Every inserted unit advances it by one.
pub type Clock = u32;

/// The largest client id that survives a round trip through a 53-bit integer.
pub const MAX_CLIENT_ID: ClientId = (1 << 53) - 1;

// =============================================================================
// Identifiers
// =============================================================================

/// A struct identifier.
///
/// Identifies a single unit of content inserted by a client. A struct of
/// length `n` starting at `id` covers `id.clock..id.clock + n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id {
    /// The client that created this unit.
    pub client: ClientId,
    /// The clock of this unit (monotonically increasing per client).
    pub clock: Clock,
}

impl Id {
    /// Create a new id.
    pub fn new(client: ClientId, clock: Clock) -> Id {
        return Id { client, clock };
    }

    /// The id `offset` ticks further along the same client.
    pub fn offset(&self, offset: u32) -> Id {
        return Id::new(self.client, self.clock + offset);
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        return Some(self.cmp(other));
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        // Compare by client first, then by clock
        match self.client.cmp(&other.client) {
            Ordering::Equal => self.clock.cmp(&other.clock),
            other => other,
        }
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "Id({}, {})", self.client, self.clock);
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}#{}", self.client, self.clock);
    }
}

// =============================================================================
// State vectors
// =============================================================================

/// A state vector: for each client, the exclusive upper bound of the
/// contiguous history we know about.
///
/// Missing entries read as 0. Two vectors are equal when they agree on every
/// client, so explicit zero entries are irrelevant.
#[derive(Clone, Debug, Default)]
pub struct StateVector {
    entries: FxHashMap<ClientId, Clock>,
}

impl StateVector {
    /// Create an empty state vector.
    pub fn new() -> StateVector {
        return StateVector {
            entries: FxHashMap::default(),
        };
    }

    /// Get the next expected clock for a client.
    pub fn get(&self, client: ClientId) -> Clock {
        return *self.entries.get(&client).unwrap_or(&0);
    }

    /// Overwrite the entry for a client.
    pub fn set(&mut self, client: ClientId, clock: Clock) {
        self.entries.insert(client, clock);
    }

    /// Raise the entry for a client to at least `clock`.
    pub fn set_max(&mut self, client: ClientId, clock: Clock) {
        let entry = self.entries.entry(client).or_insert(0);
        *entry = (*entry).max(clock);
    }

    /// Lower the entry for a client to at most `clock`, inserting it if the
    /// client is absent. Used to record the lowest missing clock.
    pub fn set_min(&mut self, client: ClientId, clock: Clock) {
        let entry = self.entries.entry(client).or_insert(clock);
        *entry = (*entry).min(clock);
    }

    /// True when the unit identified by `id` is covered by this vector.
    pub fn contains(&self, id: &Id) -> bool {
        return id.clock < self.get(id.client);
    }

    /// Take the pointwise maximum with another vector.
    pub fn merge(&mut self, other: &StateVector) {
        for (client, clock) in &other.entries {
            self.set_max(*client, *clock);
        }
    }

    /// Number of clients with an entry.
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    /// True if no client has an entry.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    /// Entries sorted ascending by client, as written on the wire.
    pub fn sorted(&self) -> BTreeMap<ClientId, Clock> {
        return self.entries.iter().map(|(c, k)| (*c, *k)).collect();
    }

    /// Iterate over entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, Clock)> + '_ {
        return self.entries.iter().map(|(c, k)| (*c, *k));
    }
}

impl PartialEq for StateVector {
    fn eq(&self, other: &Self) -> bool {
        for (client, clock) in &self.entries {
            if other.get(*client) != *clock {
                return false;
            }
        }
        for (client, clock) in &other.entries {
            if self.get(*client) != *clock {
                return false;
            }
        }
        return true;
    }
}

impl Eq for StateVector {}

impl FromIterator<(ClientId, Clock)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ClientId, Clock)>>(iter: I) -> Self {
        let mut sv = StateVector::new();
        for (client, clock) in iter {
            sv.set_max(client, clock);
        }
        return sv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_ordering() {
        let a = Id::new(1, 5);
        let b = Id::new(1, 6);
        let c = Id::new(2, 0);

        assert!(a < b);
        assert!(b < c); // client dominates clock
    }

    #[test]
    fn id_offset() {
        assert_eq!(Id::new(7, 3).offset(4), Id::new(7, 7));
    }

    #[test]
    fn state_vector_defaults_to_zero() {
        let sv = StateVector::new();
        assert_eq!(sv.get(42), 0);
        assert!(!sv.contains(&Id::new(42, 0)));
    }

    #[test]
    fn state_vector_contains() {
        let mut sv = StateVector::new();
        sv.set(1, 3);
        assert!(sv.contains(&Id::new(1, 2)));
        assert!(!sv.contains(&Id::new(1, 3)));
    }

    #[test]
    fn state_vector_merge_takes_max() {
        let mut a: StateVector = [(1, 4), (2, 1)].into_iter().collect();
        let b: StateVector = [(1, 2), (3, 9)].into_iter().collect();
        a.merge(&b);

        assert_eq!(a.get(1), 4);
        assert_eq!(a.get(2), 1);
        assert_eq!(a.get(3), 9);
    }

    #[test]
    fn state_vector_equality_ignores_zero_entries() {
        let mut a = StateVector::new();
        a.set(1, 0);
        a.set(2, 5);
        let b: StateVector = [(2, 5)].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn set_min_keeps_lowest() {
        let mut sv = StateVector::new();
        sv.set_min(1, 8);
        sv.set_min(1, 3);
        sv.set_min(1, 5);
        assert_eq!(sv.get(1), 3);
    }
}
