//! The struct store: per-client, clock-ordered block sequences.
//!
//! Every client owns a column of blocks sorted by clock with no gaps and no
//! overlaps, so the column's end is that client's entry in the state vector.
//! Blocks are addressed by id and found by binary search; links between
//! items are ids as well, which keeps the store free of reference cycles.
//!
//! Complexity:
//! - state / state vector: O(1) / O(clients)
//! - lookup by id: O(log n) in the client's column
//! - split: O(n) in the client's column (vector insert)

use rustc_hash::FxHashMap;

use super::block::{Block, ContainerRef, Item};
use super::id::{ClientId, Clock, Id, StateVector};
use crate::error::Error;

// =============================================================================
// Containers
// =============================================================================

/// Per-container bookkeeping for linked order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Branch {
    /// First clock of the leftmost item in the sequence part.
    pub start: Option<Id>,
    /// For each map key, the last clock of the rightmost item.
    pub map: FxHashMap<String, Id>,
}

// =============================================================================
// Store
// =============================================================================

/// Per-client ordered blocks plus the containers they are linked into.
#[derive(Clone, Debug, Default)]
pub struct StructStore {
    clients: FxHashMap<ClientId, Vec<Block>>,
    /// Clients in the order they were first seen.
    order: Vec<ClientId>,
    pub(crate) branches: FxHashMap<ContainerRef, Branch>,
}

impl StructStore {
    /// Create an empty store.
    pub fn new() -> StructStore {
        return StructStore::default();
    }

    /// True if no block has been stored yet.
    pub fn is_empty(&self) -> bool {
        return self.order.is_empty();
    }

    /// The next expected clock for a client.
    pub fn get_state(&self, client: ClientId) -> Clock {
        return match self.clients.get(&client).and_then(|blocks| blocks.last()) {
            Some(last) => last.end(),
            None => 0,
        };
    }

    /// The state vector of everything stored.
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, blocks) in &self.clients {
            if let Some(last) = blocks.last() {
                sv.set(*client, last.end());
            }
        }
        return sv;
    }

    /// Clients in registration order.
    pub fn clients(&self) -> &[ClientId] {
        return &self.order;
    }

    /// All blocks of a client, sorted by clock.
    pub fn blocks(&self, client: ClientId) -> &[Block] {
        return match self.clients.get(&client) {
            Some(blocks) => blocks.as_slice(),
            None => &[],
        };
    }

    /// Append a block at the end of its client's column.
    ///
    /// Fails with `OutOfOrder` unless the block starts exactly at the
    /// client's current state.
    pub fn append(&mut self, block: Block) -> Result<(), Error> {
        let client = block.client();
        let expected = self.get_state(client);
        if block.clock() != expected || block.is_skip() {
            return Err(Error::OutOfOrder {
                id: block.id(),
                expected,
            });
        }
        if !self.clients.contains_key(&client) {
            self.order.push(client);
        }
        self.clients.entry(client).or_default().push(block);
        return Ok(());
    }

    /// Index of the block containing `id` in its client's column.
    pub fn find_index(&self, id: Id) -> Result<usize, Error> {
        let blocks = self.clients.get(&id.client).ok_or(Error::NotFound(id))?;
        return find_index_in(blocks, id.clock).ok_or(Error::NotFound(id));
    }

    /// The block containing `id`.
    ///
    /// Fails with `NotFound` if the clock is outside the known range.
    pub fn get(&self, id: Id) -> Result<&Block, Error> {
        let index = self.find_index(id)?;
        return Ok(&self.clients[&id.client][index]);
    }

    pub(crate) fn get_mut(&mut self, id: Id) -> Result<&mut Block, Error> {
        let index = self.find_index(id)?;
        let blocks = self.clients.get_mut(&id.client).ok_or(Error::NotFound(id))?;
        return Ok(&mut blocks[index]);
    }

    /// The item containing `id`, if it exists and is an item.
    pub fn get_item(&self, id: Id) -> Option<&Item> {
        return self.get(id).ok().and_then(|block| block.as_item());
    }

    pub(crate) fn get_item_mut(&mut self, id: Id) -> Option<&mut Item> {
        return self.get_mut(id).ok().and_then(|block| block.as_item_mut());
    }

    /// Make sure a block starts at `id`, splitting the block containing it
    /// if necessary. Returns the index of that block.
    pub fn split_start(&mut self, id: Id) -> Result<usize, Error> {
        let index = self.find_index(id)?;
        let blocks = self.clients.get_mut(&id.client).ok_or(Error::NotFound(id))?;
        let offset = id.clock - blocks[index].clock();
        if offset == 0 {
            return Ok(index);
        }
        let right = blocks[index].split(offset);
        blocks.insert(index + 1, right);
        return Ok(index + 1);
    }

    /// Make sure a block ends at `id`, splitting the block containing it if
    /// necessary. Returns the index of that block.
    pub fn split_end(&mut self, id: Id) -> Result<usize, Error> {
        let index = self.find_index(id)?;
        let blocks = self.clients.get_mut(&id.client).ok_or(Error::NotFound(id))?;
        let offset = id.clock - blocks[index].clock() + 1;
        if offset == blocks[index].len() {
            return Ok(index);
        }
        let right = blocks[index].split(offset);
        blocks.insert(index + 1, right);
        return Ok(index);
    }

    /// Merge payload-free tombstones that became adjacent after garbage
    /// collection. Only `Deleted` blocks are merged; they are never linked.
    pub(crate) fn squash_deleted(&mut self, client: ClientId) {
        let blocks = match self.clients.get_mut(&client) {
            Some(blocks) => blocks,
            None => return,
        };
        let mut squashed: Vec<Block> = Vec::with_capacity(blocks.len());
        for block in blocks.drain(..) {
            if let Some(last) = squashed.last_mut() {
                if last.try_squash(&block) {
                    continue;
                }
            }
            squashed.push(block);
        }
        *blocks = squashed;
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Binary search for the block containing `clock`.
///
/// Starts with a pivot guessed from the average block length, which is
/// exact for columns of single-unit blocks.
pub(crate) fn find_index_in(blocks: &[Block], clock: Clock) -> Option<usize> {
    let last = blocks.last()?;
    if clock >= last.end() {
        return None;
    }
    let mut left = 0;
    let mut right = blocks.len() - 1;
    let mut mid = ((clock as u64 * right as u64) / (last.end().max(1) as u64)) as usize;
    while left <= right {
        let block = &blocks[mid];
        if block.contains(clock) {
            return Some(mid);
        }
        if block.clock() <= clock {
            left = mid + 1;
        } else {
            if mid == 0 {
                return None;
            }
            right = mid - 1;
        }
        mid = (left + right) / 2;
    }
    return None;
}
