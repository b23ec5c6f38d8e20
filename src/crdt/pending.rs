//! Integration of update blocks whose dependencies may not be known yet.
//!
//! Blocks are queued per client in clock order and integrated in rounds.
//! A block is ready when its client's history reaches its clock and every
//! id it references (origins and nested parent) is known. A round that
//! integrates nothing ends the loop; whatever is left is returned together
//! with the lowest missing clock per client, to be merged with the next
//! update that arrives.
//!
//! The loop is an explicit work-list so adversarial chains of dependencies
//! cost iterations, not stack depth.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace};

use super::block::{Block, ContainerRef};
use super::delete_set::DeleteSet;
use super::id::{ClientId, Id, StateVector};
use super::store::StructStore;
use crate::error::Error;
use crate::update::Update;

// =============================================================================
// Queued blocks
// =============================================================================

/// Blocks that could not be integrated yet.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Pending {
    /// Left-over blocks. Gaps are filled with `Skip` so the update encodes.
    pub update: Update,
    /// For every blocked client, the lowest clock we are waiting for.
    pub missing: StateVector,
}

/// What integrating a block would do right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Integration {
    /// The store already covers the whole block.
    Known,
    /// The block can be integrated after dropping `offset` known clocks.
    Ready(u32),
    /// The block depends on an id the store does not cover yet.
    Pending(Id),
}

/// Decide whether a block can be integrated into `store`.
pub(crate) fn check(store: &StructStore, block: &Block) -> Integration {
    let client = block.client();
    let state = store.get_state(client);
    if block.end() <= state {
        return Integration::Known;
    }
    if block.clock() > state {
        return Integration::Pending(Id::new(client, state));
    }
    if let Block::Item(item) = block {
        let parent = match item.parent {
            ContainerRef::Nested(id) => Some(id),
            ContainerRef::Root(_) => None,
        };
        for dep in [item.origin, item.right_origin, parent].into_iter().flatten() {
            if dep.clock >= store.get_state(dep.client) {
                return Integration::Pending(dep);
            }
        }
    }
    return Integration::Ready(state - block.clock());
}

// =============================================================================
// Integration rounds
// =============================================================================

/// Integrate as many blocks as dependencies allow.
///
/// Tombstones created along the way are recorded in `deleted`. Returns
/// the blocks that are still waiting, if any.
pub(crate) fn integrate_blocks(
    store: &mut StructStore,
    blocks: BTreeMap<ClientId, Vec<Block>>,
    deleted: &mut DeleteSet,
) -> Result<Option<Pending>, Error> {
    let mut queues: BTreeMap<ClientId, VecDeque<Block>> = blocks
        .into_iter()
        .map(|(client, column)| {
            let queue: VecDeque<Block> = column.into_iter().filter(|b| !b.is_skip()).collect();
            (client, queue)
        })
        .collect();

    let mut integrated = 0usize;
    loop {
        let mut progress = false;
        for queue in queues.values_mut() {
            while let Some(block) = queue.front() {
                match check(store, block) {
                    Integration::Known => {
                        queue.pop_front();
                    }
                    Integration::Ready(offset) => {
                        if let Some(block) = queue.pop_front() {
                            integrate_block(store, block, offset, deleted)?;
                            integrated += 1;
                            progress = true;
                        }
                    }
                    Integration::Pending(_) => break,
                }
            }
        }
        if !progress {
            break;
        }
    }

    let mut missing = StateVector::new();
    let mut leftover = Update::new();
    for (client, queue) in queues {
        if let Some(front) = queue.front() {
            if let Integration::Pending(id) = check(store, front) {
                trace!(client, missing = %id, "blocks parked in pending queue");
                missing.set_min(id.client, id.clock);
            }
            leftover.blocks.insert(client, queue.into_iter().collect());
        }
    }
    if leftover.blocks.is_empty() {
        debug!(integrated, "integrated blocks");
        return Ok(None);
    }
    debug!(integrated, waiting = leftover.blocks.len(), "integrated blocks, some pending");
    return Ok(Some(Pending {
        update: Update::merge([leftover]),
        missing,
    }));
}

fn integrate_block(
    store: &mut StructStore,
    block: Block,
    offset: u32,
    deleted: &mut DeleteSet,
) -> Result<(), Error> {
    return match block {
        Block::Item(item) => store.integrate(item, offset, deleted),
        Block::Deleted(_) => store.append(block.slice_front(offset)),
        // Filtered out before queuing
        Block::Skip(_) => Ok(()),
    };
}
