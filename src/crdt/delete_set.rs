//! Delete sets: compressed per-client ranges of tombstoned clocks.
//!
//! A delete set is independent of what the store knows. A range may name
//! clocks that have not arrived yet; applying it deletes what is known and
//! hands back the rest so it can be retried after later integrations.
//!
//! Ranges of a client are kept sorted and disjoint, and touching ranges are
//! coalesced on insert, so two delete sets covering the same clocks compare
//! equal and encode to the same bytes.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::block::Block;
use super::id::{ClientId, Clock, Id};
use super::store::StructStore;
use crate::error::Error;

// =============================================================================
// Ranges
// =============================================================================

/// A half-open range `[clock, clock + len)` of deleted clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteRange {
    pub clock: Clock,
    pub len: u32,
}

impl DeleteRange {
    pub fn new(clock: Clock, len: u32) -> DeleteRange {
        return DeleteRange { clock, len };
    }

    /// Exclusive end clock.
    pub fn end(&self) -> Clock {
        return self.clock + self.len;
    }
}

type Ranges = SmallVec<[DeleteRange; 4]>;

// =============================================================================
// Delete set
// =============================================================================

/// Deleted clock ranges per client, ordered by client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteSet {
    clients: BTreeMap<ClientId, Ranges>,
}

impl DeleteSet {
    /// Create an empty delete set.
    pub fn new() -> DeleteSet {
        return DeleteSet::default();
    }

    /// Collect every deleted block of a store.
    pub fn from_store(store: &StructStore) -> DeleteSet {
        let mut ds = DeleteSet::new();
        for client in store.clients() {
            for block in store.blocks(*client) {
                if block.is_deleted() {
                    ds.add(*client, block.clock(), block.len());
                }
            }
        }
        return ds;
    }

    /// True if no range is recorded.
    pub fn is_empty(&self) -> bool {
        return self.clients.is_empty();
    }

    /// Mark `[clock, clock + len)` of a client as deleted.
    ///
    /// Overlapping and touching ranges are merged into one.
    pub fn add(&mut self, client: ClientId, clock: Clock, len: u32) {
        if len == 0 {
            return;
        }
        let ranges = self.clients.entry(client).or_default();
        let mut start = clock;
        let mut end = clock + len;

        // First range that touches or follows the new one
        let first = ranges.partition_point(|r| r.end() < start);
        let mut last = first;
        while last < ranges.len() && ranges[last].clock <= end {
            start = start.min(ranges[last].clock);
            end = end.max(ranges[last].end());
            last += 1;
        }
        ranges.drain(first..last);
        ranges.insert(first, DeleteRange::new(start, end - start));
    }

    /// True if the unit `id` is inside a deleted range.
    pub fn contains(&self, id: &Id) -> bool {
        let ranges = match self.clients.get(&id.client) {
            Some(ranges) => ranges,
            None => return false,
        };
        let index = ranges.partition_point(|r| r.end() <= id.clock);
        return index < ranges.len() && ranges[index].clock <= id.clock;
    }

    /// Union another delete set into this one.
    pub fn merge(&mut self, other: &DeleteSet) {
        for (client, ranges) in &other.clients {
            for range in ranges {
                self.add(*client, range.clock, range.len);
            }
        }
    }

    /// Ranges per client, ascending by client then clock.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &[DeleteRange])> + '_ {
        return self.clients.iter().map(|(c, r)| (*c, r.as_slice()));
    }

    /// Ranges of a single client.
    pub fn ranges(&self, client: ClientId) -> &[DeleteRange] {
        return match self.clients.get(&client) {
            Some(ranges) => ranges.as_slice(),
            None => &[],
        };
    }

    /// Tombstone every known struct covered by this set.
    ///
    /// Boundary structs are split so exactly the named clocks are deleted.
    /// Items that changed state are recorded in `deleted`. Ranges past the
    /// store's knowledge are returned so they can be retried later.
    pub fn apply(&self, store: &mut StructStore, deleted: &mut DeleteSet) -> Result<DeleteSet, Error> {
        let mut unapplied = DeleteSet::new();
        for (client, ranges) in &self.clients {
            let state = store.get_state(*client);
            for range in ranges {
                let end = range.end();
                if range.clock < state {
                    let stop = end.min(state);
                    let mut index = store.split_start(Id::new(*client, range.clock))?;
                    while let Some(block) = store.blocks(*client).get(index) {
                        if block.clock() >= stop {
                            break;
                        }
                        if block.end() > stop {
                            store.split_end(Id::new(*client, stop - 1))?;
                        }
                        if let Block::Item(item) = &store.blocks(*client)[index] {
                            if !item.deleted {
                                let id = item.id;
                                store.delete_item(id, deleted);
                            }
                        }
                        index += 1;
                    }
                }
                if end > state {
                    let from = range.clock.max(state);
                    unapplied.add(*client, from, end - from);
                }
            }
        }
        return Ok(unapplied);
    }
}
