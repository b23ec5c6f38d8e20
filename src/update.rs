//! The update algebra: operations on encoded updates that never build a
//! document.
//!
//! An update is a set of blocks per client plus a delete set. Blocks of one
//! client are contiguous; a `Skip` block stands for a range the update does
//! not carry. Because every clock range has exactly one author, two updates
//! that cover the same range carry the same content, which is what makes
//! merging a plain union:
//!
//! - `merge`: union of blocks, overlaps trimmed, holes filled with `Skip`
//! - `diff`: drop everything a state vector already covers
//! - `state_vector`: the contiguous prefix each client contributes from 0
//!
//! The byte-level entry points (`merge_updates`, `diff_update`, ...) decode,
//! run the operation, and encode again in the same version.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::varint::Reader;
use crate::codec::{
    self, BlockHeader, Version, decode_state_vector, encode_state_vector, read_state_vector,
    write_state_vector,
};
use crate::crdt::block::{Block, BlockRange};
use crate::crdt::delete_set::DeleteSet;
use crate::crdt::doc::Doc;
use crate::crdt::id::{ClientId, Clock, Id, StateVector};
use crate::crdt::store::StructStore;
use crate::error::{CodecError, Error};

/// A decoded update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub(crate) blocks: BTreeMap<ClientId, Vec<Block>>,
    pub(crate) delete_set: DeleteSet,
}

impl Update {
    /// An update that carries nothing.
    pub fn new() -> Update {
        return Update::default();
    }

    /// Decode an update. Fails without side effects on malformed input.
    pub fn decode(bytes: &[u8], version: Version) -> Result<Update, Error> {
        return Ok(codec::decode_update(bytes, version)?);
    }

    pub fn encode(&self, version: Version) -> Vec<u8> {
        return codec::encode_update(self, version);
    }

    /// True if the update carries no blocks and no deletions.
    pub fn is_empty(&self) -> bool {
        return self.blocks.values().all(|b| b.is_empty()) && self.delete_set.is_empty();
    }

    /// Blocks of one client, sorted by clock.
    pub fn blocks(&self, client: ClientId) -> &[Block] {
        return match self.blocks.get(&client) {
            Some(blocks) => blocks.as_slice(),
            None => &[],
        };
    }

    pub fn delete_set(&self) -> &DeleteSet {
        return &self.delete_set;
    }

    /// Everything a store holds at or above `sv`, plus its full delete set.
    pub(crate) fn from_store(store: &StructStore, sv: &StateVector) -> Update {
        let mut update = Update::new();
        for client in store.clients() {
            let known = sv.get(*client);
            let blocks = store.blocks(*client);
            let start = blocks.partition_point(|b| b.end() <= known);
            if start == blocks.len() {
                continue;
            }
            let mut column: Vec<Block> = Vec::with_capacity(blocks.len() - start);
            for block in &blocks[start..] {
                column.push(detach(block.clone()));
            }
            column[0] = trim_front(column[0].clone(), known);
            update.blocks.insert(*client, column);
        }
        update.delete_set = DeleteSet::from_store(store);
        return update;
    }

    /// The state a document reaches by applying only this update: for each
    /// client whose blocks start at clock 0, the end of the leading run
    /// without gaps.
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, blocks) in &self.blocks {
            let headers = blocks.iter().map(|b| BlockHeader {
                clock: b.clock(),
                len: b.len(),
                skip: b.is_skip(),
            });
            if let Some(end) = contiguous_end(headers) {
                sv.set(*client, end);
            }
        }
        return sv;
    }

    /// Union several updates into one.
    ///
    /// Overlapping ranges are kept once, holes become `Skip` blocks and
    /// delete sets are unioned. The result does not depend on the order of
    /// the inputs.
    pub fn merge<I: IntoIterator<Item = Update>>(updates: I) -> Update {
        let mut columns: BTreeMap<ClientId, Vec<Block>> = BTreeMap::new();
        let mut delete_set = DeleteSet::new();
        for update in updates {
            delete_set.merge(&update.delete_set);
            for (client, blocks) in update.blocks {
                columns
                    .entry(client)
                    .or_default()
                    .extend(blocks.into_iter().filter(|b| !b.is_skip()));
            }
        }

        let mut merged = Update::new();
        for (client, mut column) in columns {
            // Longest first on equal clocks so shorter duplicates are covered
            column.sort_by(|a, b| a.clock().cmp(&b.clock()).then(b.len().cmp(&a.len())));
            let mut out: Vec<Block> = Vec::with_capacity(column.len());
            for block in column {
                let end = match out.last() {
                    Some(last) => last.end(),
                    None => {
                        out.push(block);
                        continue;
                    }
                };
                if block.end() <= end {
                    continue;
                }
                if block.clock() > end {
                    let gap = BlockRange::new(Id::new(client, end), block.clock() - end);
                    out.push(Block::Skip(gap));
                }
                push_squashed(&mut out, trim_front(block, end));
            }
            if !out.is_empty() {
                merged.blocks.insert(client, out);
            }
        }
        merged.delete_set = delete_set;
        return merged;
    }

    /// The part of this update not covered by `sv`. The delete set is kept
    /// whole since deletions are not ordered by clock.
    pub fn diff(&self, sv: &StateVector) -> Update {
        let mut diff = Update::new();
        for (client, blocks) in &self.blocks {
            let known = sv.get(*client);
            let start = blocks.partition_point(|b| b.end() <= known);
            let mut column: Vec<Block> = Vec::new();
            for block in &blocks[start..] {
                let block = trim_front(block.clone(), known);
                if column.is_empty() && block.is_skip() {
                    continue;
                }
                column.push(block);
            }
            if !column.is_empty() {
                diff.blocks.insert(*client, column);
            }
        }
        diff.delete_set = self.delete_set.clone();
        return diff;
    }
}

/// Drop the part of a block below `clock`.
fn trim_front(block: Block, clock: Clock) -> Block {
    if block.clock() >= clock {
        return block;
    }
    let offset = clock - block.clock();
    return block.slice_front(offset);
}

/// Clear store-local neighbour links before a block leaves the store.
fn detach(mut block: Block) -> Block {
    if let Block::Item(item) = &mut block {
        item.left = None;
        item.right = None;
    }
    return block;
}

fn push_squashed(out: &mut Vec<Block>, block: Block) {
    if let Some(last) = out.last_mut() {
        if last.try_squash(&block) {
            return;
        }
    }
    out.push(block);
}

fn contiguous_end<I: Iterator<Item = BlockHeader>>(mut headers: I) -> Option<Clock> {
    let first = headers.next()?;
    if first.clock != 0 || first.skip {
        return None;
    }
    let mut end = first.end();
    for header in headers {
        if header.skip || header.clock != end {
            break;
        }
        end = header.end();
    }
    return Some(end);
}

// ============================================================================
// Byte-level operations
// ============================================================================

/// Merge encoded updates into one encoded update.
pub fn merge_updates<B: AsRef<[u8]>>(updates: &[B], version: Version) -> Result<Vec<u8>, Error> {
    let mut decoded = Vec::with_capacity(updates.len());
    for update in updates {
        decoded.push(Update::decode(update.as_ref(), version)?);
    }
    let merged = Update::merge(decoded);
    debug!(inputs = updates.len(), clients = merged.blocks.len(), "merged updates");
    return Ok(merged.encode(version));
}

/// Strip from an encoded update everything the encoded state vector covers.
pub fn diff_update(update: &[u8], sv: &[u8], version: Version) -> Result<Vec<u8>, Error> {
    let sv = decode_state_vector(sv)?;
    let update = Update::decode(update, version)?;
    return Ok(update.diff(&sv).encode(version));
}

/// Read the state vector an update leads to, looking at block headers only.
pub fn state_vector_from_update(update: &[u8], version: Version) -> Result<StateVector, Error> {
    let mut sv = StateVector::new();
    for (client, headers) in codec::decode_headers(update, version)? {
        if let Some(end) = contiguous_end(headers.into_iter()) {
            sv.set(client, end);
        }
    }
    return Ok(sv);
}

/// `state_vector_from_update`, encoded.
pub fn encode_state_vector_from_update(update: &[u8], version: Version) -> Result<Vec<u8>, Error> {
    let sv = state_vector_from_update(update, version)?;
    return Ok(encode_state_vector(&sv));
}

/// The clock span an update covers per client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateMeta {
    /// First clock carried for each client.
    pub from: StateVector,
    /// Exclusive end clock carried for each client.
    pub to: StateVector,
}

impl UpdateMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_state_vector(&mut buf, &self.from);
        write_state_vector(&mut buf, &self.to);
        return buf;
    }

    pub fn decode(bytes: &[u8]) -> Result<UpdateMeta, CodecError> {
        let mut reader = Reader::new(bytes);
        let from = read_state_vector(&mut reader)?;
        let to = read_state_vector(&mut reader)?;
        reader.finish()?;
        return Ok(UpdateMeta { from, to });
    }
}

/// Read the clock span of an update without decoding payloads.
pub fn parse_update_meta(update: &[u8], version: Version) -> Result<UpdateMeta, Error> {
    let mut meta = UpdateMeta::default();
    for (client, headers) in codec::decode_headers(update, version)? {
        if let (Some(first), Some(last)) = (headers.first(), headers.last()) {
            meta.from.set(client, first.clock);
            meta.to.set(client, last.end());
        }
    }
    return Ok(meta);
}

// ============================================================================
// Splitting a document into updates
// ============================================================================

/// Chooses where a client's history is cut when a document is encoded as a
/// sequence of updates.
pub trait SplitPolicy {
    /// The end of the chunk that starts at `clock`. Values past `max` are
    /// clamped, values not after `clock` mean "everything up to `max`".
    fn next(&mut self, client: ClientId, clock: Clock, max: Clock) -> Clock;
}

impl<F: FnMut(ClientId, Clock, Clock) -> Clock> SplitPolicy for F {
    fn next(&mut self, client: ClientId, clock: Clock, max: Clock) -> Clock {
        return self(client, clock, max);
    }
}

/// Chunks of at most `n` clocks.
#[derive(Clone, Copy, Debug)]
pub struct SplitEvery(pub u32);

impl SplitPolicy for SplitEvery {
    fn next(&mut self, _client: ClientId, clock: Clock, max: Clock) -> Clock {
        if self.0 == 0 {
            return max;
        }
        return clock.saturating_add(self.0);
    }
}

/// Cut at fixed clock boundaries, for every client.
#[derive(Clone, Debug)]
pub struct SplitAt(pub Vec<Clock>);

impl SplitPolicy for SplitAt {
    fn next(&mut self, _client: ClientId, clock: Clock, max: Clock) -> Clock {
        return self.0.iter().copied().filter(|c| *c > clock).min().unwrap_or(max);
    }
}

/// Chooses the order in which clients are emitted. Receives each client
/// with its end clock, in registration order. Clients left out of the
/// result are not emitted.
pub trait SortPolicy {
    fn order(&mut self, clients: &[(ClientId, Clock)]) -> Vec<ClientId>;
}

impl<F: FnMut(&[(ClientId, Clock)]) -> Vec<ClientId>> SortPolicy for F {
    fn order(&mut self, clients: &[(ClientId, Clock)]) -> Vec<ClientId> {
        return self(clients);
    }
}

/// Clients in the order the document first saw them.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegistrationOrder;

impl SortPolicy for RegistrationOrder {
    fn order(&mut self, clients: &[(ClientId, Clock)]) -> Vec<ClientId> {
        return clients.iter().map(|(client, _)| *client).collect();
    }
}

/// Encode a document as a sequence of updates.
///
/// The first update carries the delete set and no blocks. Each following
/// update carries one chunk of one client's history; chunks of a client are
/// emitted in clock order and clients in the order `sort` returns. Applying
/// all updates in order, or their merge, yields the same document as
/// `encode_state_as_update`.
pub fn encode_state_as_updates<S: SplitPolicy, O: SortPolicy>(
    doc: &Doc,
    mut split: S,
    mut sort: O,
    version: Version,
) -> Vec<Vec<u8>> {
    let store = doc.store();
    let mut updates = Vec::new();

    let mut head = Update::new();
    head.delete_set = DeleteSet::from_store(store);
    updates.push(head.encode(version));

    let clients: Vec<(ClientId, Clock)> = store
        .clients()
        .iter()
        .map(|client| (*client, store.get_state(*client)))
        .collect();
    for client in sort.order(&clients) {
        let max = store.get_state(client);
        let mut clock = 0;
        while clock < max {
            let mut next = split.next(client, clock, max).min(max);
            if next <= clock {
                next = max;
            }
            let mut chunk = Update::new();
            chunk.blocks.insert(client, slice_column(store.blocks(client), clock, next));
            updates.push(chunk.encode(version));
            clock = next;
        }
    }
    debug!(updates = updates.len(), "encoded state as updates");
    return updates;
}

/// Copies of the blocks covering `[from, to)`, cut exactly at both ends.
fn slice_column(blocks: &[Block], from: Clock, to: Clock) -> Vec<Block> {
    let start = blocks.partition_point(|b| b.end() <= from);
    let mut out = Vec::new();
    for block in &blocks[start..] {
        if block.clock() >= to {
            break;
        }
        let mut block = trim_front(detach(block.clone()), from);
        if block.end() > to {
            block.split(to - block.clock());
            if let Block::Item(item) = &mut block {
                item.right = None;
            }
        }
        out.push(block);
    }
    return out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::block::{ContainerRef, Item};
    use crate::crdt::content::Content;

    fn text(client: ClientId, clock: Clock, origin: Option<Id>, s: &str) -> Block {
        return Block::Item(Item::new(
            Id::new(client, clock),
            origin,
            None,
            ContainerRef::root("t"),
            None,
            Content::String(s.to_string()),
        ));
    }

    fn update(blocks: Vec<Block>) -> Update {
        let mut update = Update::new();
        for block in blocks {
            update.blocks.entry(block.client()).or_default().push(block);
        }
        return update;
    }

    fn spans(update: &Update, client: ClientId) -> Vec<(Clock, u32, bool)> {
        return update
            .blocks(client)
            .iter()
            .map(|b| (b.clock(), b.len(), b.is_skip()))
            .collect();
    }

    #[test]
    fn merge_fills_gaps_with_skip() {
        let a = update(vec![text(1, 0, None, "ab")]);
        let b = update(vec![text(1, 5, Some(Id::new(1, 4)), "f")]);
        let merged = Update::merge(vec![a, b]);
        assert_eq!(spans(&merged, 1), vec![(0, 2, false), (2, 3, true), (5, 1, false)]);
        assert_eq!(merged.state_vector().get(1), 2);
    }

    #[test]
    fn merge_trims_overlap() {
        let a = update(vec![text(1, 0, None, "abc")]);
        let b = update(vec![text(1, 2, Some(Id::new(1, 1)), "cde")]);
        let merged = Update::merge(vec![b.clone(), a.clone()]);
        assert_eq!(spans(&merged, 1), vec![(0, 3, false), (3, 2, false)]);
        assert_eq!(merged, Update::merge(vec![a, b]));
    }

    #[test]
    fn merge_drops_covered_duplicates() {
        let a = update(vec![text(1, 0, None, "abc")]);
        let merged = Update::merge(vec![a.clone(), a.clone()]);
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_replaces_skip_with_content() {
        let mut partial = update(vec![text(1, 0, None, "a")]);
        partial
            .blocks
            .get_mut(&1)
            .unwrap()
            .push(Block::Skip(BlockRange::new(Id::new(1, 1), 2)));
        let rest = update(vec![text(1, 1, Some(Id::new(1, 0)), "bc")]);
        let merged = Update::merge(vec![partial, rest]);
        assert_eq!(spans(&merged, 1), vec![(0, 1, false), (1, 2, false)]);
    }

    #[test]
    fn diff_slices_boundary_block() {
        let mut u = update(vec![text(1, 0, None, "abcd"), text(2, 0, None, "x")]);
        u.delete_set.add(1, 0, 1);
        let mut sv = StateVector::new();
        sv.set(1, 2);
        sv.set(2, 1);
        let diff = u.diff(&sv);
        assert_eq!(spans(&diff, 1), vec![(2, 2, false)]);
        assert!(diff.blocks(2).is_empty());
        assert!(diff.delete_set().contains(&Id::new(1, 0)));
        let first = diff.blocks(1)[0].as_item().unwrap();
        assert_eq!(first.origin, Some(Id::new(1, 1)));
    }

    #[test]
    fn state_vector_needs_clock_zero() {
        let u = update(vec![text(1, 3, Some(Id::new(1, 2)), "x"), text(2, 0, None, "yz")]);
        let sv = u.state_vector();
        assert_eq!(sv.get(1), 0);
        assert_eq!(sv.get(2), 2);

        let bytes = u.encode(Version::V2);
        assert_eq!(state_vector_from_update(&bytes, Version::V2).unwrap(), sv);
    }

    #[test]
    fn meta_spans_and_round_trip() {
        let u = update(vec![text(1, 3, Some(Id::new(1, 2)), "xy"), text(4, 0, None, "z")]);
        let meta = parse_update_meta(&u.encode(Version::V1), Version::V1).unwrap();
        assert_eq!(meta.from.get(1), 3);
        assert_eq!(meta.to.get(1), 5);
        assert_eq!(meta.to.get(4), 1);
        assert_eq!(UpdateMeta::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn split_policies() {
        let mut every = SplitEvery(3);
        assert_eq!(every.next(1, 0, 10), 3);
        assert_eq!(SplitEvery(0).next(1, 4, 10), 10);

        let mut at = SplitAt(vec![4, 2, 9]);
        assert_eq!(at.next(1, 0, 10), 2);
        assert_eq!(at.next(1, 2, 10), 4);
        assert_eq!(at.next(1, 9, 10), 10);

        let mut closure = |_client: ClientId, clock: Clock, _max: Clock| clock + 5;
        assert_eq!(closure.next(1, 1, 10), 6);
    }

    #[test]
    fn slice_column_cuts_exactly() {
        let blocks = vec![text(1, 0, None, "abc"), text(1, 3, Some(Id::new(1, 2)), "def")];
        let out = slice_column(&blocks, 2, 4);
        let spans: Vec<_> = out.iter().map(|b| (b.clock(), b.len())).collect();
        assert_eq!(spans, vec![(2, 1), (3, 1)]);
        assert_eq!(
            out[0].as_item().unwrap().content,
            Content::String("c".to_string())
        );
    }
}
