//! The document handle.
//!
//! A `Doc` owns one struct store, its pending queue and its configuration.
//! There is no global registry: callers hold documents explicitly and share
//! them however they like. All mutation goes through `&mut self`, which is
//! the single-writer rule in Rust terms.
//!
//! Besides the sync surface (`apply_update`, `encode_state_as_update`, ...)
//! the document offers a small struct-level editing interface for the
//! shared-type layer (`insert`, `delete`) and positional helpers on top of
//! it for sequences and maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::block::{Block, ContainerRef, Item};
use super::content::{Content, TypeRef};
use super::delete_set::DeleteSet;
use super::id::{ClientId, Clock, Id, StateVector};
use super::pending::{self, Pending};
use super::store::StructStore;
use crate::codec::{Version, encode_state_vector};
use crate::error::{Error, Result};
use crate::update::Update;

/// Document configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// The id local edits are authored under. Must be unique among replicas.
    pub client_id: ClientId,
    /// Drop the payload of deleted items.
    pub gc: bool,
}

impl Default for Options {
    fn default() -> Self {
        return Options {
            client_id: rand::random::<u32>() as ClientId,
            gc: true,
        };
    }
}

/// How much of the known history a document holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing applied yet.
    Empty,
    /// Blocks or deletions wait for missing history.
    Partial,
    /// Everything received has been integrated.
    Converged,
}

/// Structs still waiting for their dependencies, encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingUpdate {
    /// The waiting blocks and unapplied deletions as an update.
    pub update: Vec<u8>,
    /// For each blocked client, the lowest clock that is missing.
    pub missing: StateVector,
}

type ClockObserver = Box<dyn FnMut(ClientId, Clock) + Send>;

/// A replicated document.
pub struct Doc {
    options: Options,
    store: StructStore,
    pending: Option<Pending>,
    pending_ds: DeleteSet,
    observers: Vec<ClockObserver>,
}

impl Default for Doc {
    fn default() -> Self {
        return Doc::new();
    }
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        return f
            .debug_struct("Doc")
            .field("options", &self.options)
            .field("state", &self.store.state_vector())
            .field("pending", &self.pending.is_some())
            .finish();
    }
}

impl Doc {
    /// A document with a random client id and gc enabled.
    pub fn new() -> Doc {
        return Doc::with_options(Options::default());
    }

    pub fn with_options(options: Options) -> Doc {
        return Doc {
            options,
            store: StructStore::new(),
            pending: None,
            pending_ds: DeleteSet::new(),
            observers: Vec::new(),
        };
    }

    pub fn with_client_id(client_id: ClientId) -> Doc {
        return Doc::with_options(Options {
            client_id,
            ..Options::default()
        });
    }

    pub fn client_id(&self) -> ClientId {
        return self.options.client_id;
    }

    pub fn options(&self) -> &Options {
        return &self.options;
    }

    pub(crate) fn store(&self) -> &StructStore {
        return &self.store;
    }

    /// The state vector of integrated history. Pending blocks are not
    /// included.
    pub fn state_vector(&self) -> StateVector {
        return self.store.state_vector();
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        return encode_state_vector(&self.store.state_vector());
    }

    /// Call `observer` with the client id and new clock after every local
    /// insert.
    pub fn observe_clock<F>(&mut self, observer: F)
    where
        F: FnMut(ClientId, Clock) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn sync_state(&self) -> SyncState {
        if self.pending.is_some() || !self.pending_ds.is_empty() {
            return SyncState::Partial;
        }
        if self.store.is_empty() {
            return SyncState::Empty;
        }
        return SyncState::Converged;
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Decode and apply an update.
    ///
    /// Malformed input fails with `Error::Codec` and leaves the document
    /// untouched. Blocks whose dependencies are missing are kept and retried
    /// with the next update.
    pub fn apply_update(&mut self, bytes: &[u8], version: Version) -> Result<()> {
        let update = Update::decode(bytes, version)?;
        return self.apply(update);
    }

    /// Apply a decoded update.
    pub fn apply(&mut self, update: Update) -> Result<()> {
        let Update { blocks, delete_set } = update;
        debug!(
            clients = blocks.len(),
            blocks = blocks.values().map(|b| b.len()).sum::<usize>(),
            "applying update"
        );
        let mut deleted = DeleteSet::new();

        let previous = self.pending.take();
        let blocks = match &previous {
            Some(pending) => {
                let incoming = Update {
                    blocks,
                    delete_set: DeleteSet::new(),
                };
                Update::merge([pending.update.clone(), incoming]).blocks
            }
            None => blocks,
        };
        self.pending = match pending::integrate_blocks(&mut self.store, blocks, &mut deleted) {
            Ok(pending) => pending,
            Err(err) => {
                self.pending = previous;
                return Err(err);
            }
        };

        let mut ds = std::mem::take(&mut self.pending_ds);
        ds.merge(&delete_set);
        self.pending_ds = ds.apply(&mut self.store, &mut deleted)?;
        if !self.pending_ds.is_empty() {
            trace!("deletions parked until their structs arrive");
        }

        if self.options.gc {
            self.store.gc(&deleted);
        }
        return Ok(());
    }

    /// Encode everything not covered by `sv`, or the whole document.
    ///
    /// Blocks and deletions still waiting in the pending queue are included
    /// so a peer can forward history it cannot integrate itself.
    pub fn encode_state_as_update(&self, sv: Option<&StateVector>, version: Version) -> Vec<u8> {
        let empty = StateVector::new();
        let sv = sv.unwrap_or(&empty);
        let mut update = Update::from_store(&self.store, sv);
        if let Some(pending) = &self.pending {
            update = Update::merge([update, pending.update.diff(sv)]);
        }
        update.delete_set.merge(&self.pending_ds);
        return update.encode(version);
    }

    /// Blocks and deletions that are waiting for missing history.
    pub fn pending_update(&self, version: Version) -> Option<PendingUpdate> {
        if self.pending.is_none() && self.pending_ds.is_empty() {
            return None;
        }
        let mut update = Update::new();
        let mut missing = StateVector::new();
        if let Some(pending) = &self.pending {
            update = pending.update.clone();
            missing = pending.missing.clone();
        }
        update.delete_set.merge(&self.pending_ds);
        return Some(PendingUpdate {
            update: update.encode(version),
            missing,
        });
    }

    // ========================================================================
    // Struct-level edits
    // ========================================================================

    /// Insert `content` between the units `left` and `right` of `parent`.
    ///
    /// `None` for `left` means the start of the container (or of the map
    /// key's list), `None` for `right` the end. Returns the id of the first
    /// inserted unit.
    ///
    /// Fails with `NotFound` if a neighbour is unknown or garbage collected,
    /// or if a nested parent is not a type that still holds its content.
    pub fn insert(
        &mut self,
        parent: impl Into<ContainerRef>,
        parent_sub: Option<&str>,
        left: Option<Id>,
        right: Option<Id>,
        content: Content,
    ) -> Result<Id> {
        if content.is_empty() {
            return Err(Error::EmptyContent);
        }
        for dep in [left, right].into_iter().flatten() {
            if let Block::Deleted(_) = self.store.get(dep)? {
                return Err(Error::NotFound(dep));
            }
        }
        let parent = parent.into();
        if let ContainerRef::Nested(pid) = parent {
            match self.store.get(pid)? {
                Block::Item(Item { content: Content::Type(_), .. }) => {}
                _ => return Err(Error::NotFound(pid)),
            }
        }

        let client = self.options.client_id;
        let id = Id::new(client, self.store.get_state(client));
        let item = Item::new(
            id,
            left,
            right,
            parent,
            parent_sub.map(|s| s.to_string()),
            content,
        );
        let mut deleted = DeleteSet::new();
        self.store.integrate(item, 0, &mut deleted)?;
        if self.options.gc {
            self.store.gc(&deleted);
        }

        let clock = self.store.get_state(client);
        trace!(id = %id, clock, "local insert");
        for observer in &mut self.observers {
            observer(client, clock);
        }
        return Ok(id);
    }

    /// Delete `len` units starting at `id`. Units already deleted are
    /// skipped.
    pub fn delete(&mut self, id: Id, len: u32) -> Result<()> {
        let end = id.clock.checked_add(len).ok_or(Error::NotFound(id))?;
        let state = self.store.get_state(id.client);
        if end > state {
            return Err(Error::NotFound(Id::new(id.client, state)));
        }
        let mut ds = DeleteSet::new();
        ds.add(id.client, id.clock, len);
        let mut deleted = DeleteSet::new();
        ds.apply(&mut self.store, &mut deleted)?;
        if self.options.gc {
            self.store.gc(&deleted);
        }
        return Ok(());
    }

    // ========================================================================
    // Sequence helpers
    // ========================================================================

    /// The neighbours of the gap after `index` visible units.
    fn position(&self, parent: &ContainerRef, index: u32) -> Result<(Option<Id>, Option<Id>)> {
        if index == 0 {
            return Ok((None, self.store.first_in(parent, None)));
        }
        let mut remaining = index;
        for item in self.store.sequence(parent) {
            if !item.is_visible() {
                continue;
            }
            if remaining < item.len {
                return Ok((
                    Some(item.id.offset(remaining - 1)),
                    Some(item.id.offset(remaining)),
                ));
            }
            if remaining == item.len {
                return Ok((Some(item.last_id()), item.right));
            }
            remaining -= item.len;
        }
        return Err(Error::OutOfBounds {
            index,
            len: self.len(parent.clone()),
        });
    }

    fn insert_at(&mut self, parent: ContainerRef, index: u32, content: Content) -> Result<Id> {
        let (left, right) = self.position(&parent, index)?;
        return self.insert(parent, None, left, right, content);
    }

    /// Insert text at a visible index.
    pub fn insert_text(&mut self, parent: impl Into<ContainerRef>, index: u32, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.insert_at(parent.into(), index, Content::String(text.to_string()))?;
        return Ok(());
    }

    /// Insert JSON values at a visible index.
    pub fn insert_values(
        &mut self,
        parent: impl Into<ContainerRef>,
        index: u32,
        values: Vec<Value>,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.insert_at(parent.into(), index, Content::Any(values))?;
        return Ok(());
    }

    /// Insert a nested container at a visible index. The returned id names
    /// the new container.
    pub fn insert_type(&mut self, parent: impl Into<ContainerRef>, index: u32, kind: TypeRef) -> Result<Id> {
        return self.insert_at(parent.into(), index, Content::Type(kind));
    }

    /// Delete `len` visible units starting at `index`.
    pub fn remove_range(&mut self, parent: impl Into<ContainerRef>, index: u32, len: u32) -> Result<()> {
        let parent = parent.into();
        let total = self.len(parent.clone());
        if index.checked_add(len).is_none_or(|end| end > total) {
            return Err(Error::OutOfBounds {
                index: index.saturating_add(len),
                len: total,
            });
        }

        let mut ranges: Vec<(Id, u32)> = Vec::new();
        let mut skip = index;
        let mut remaining = len;
        for item in self.store.sequence(&parent) {
            if remaining == 0 {
                break;
            }
            if !item.is_visible() {
                continue;
            }
            if skip >= item.len {
                skip -= item.len;
                continue;
            }
            let take = (item.len - skip).min(remaining);
            ranges.push((item.id.offset(skip), take));
            remaining -= take;
            skip = 0;
        }
        for (id, n) in ranges {
            self.delete(id, n)?;
        }
        return Ok(());
    }

    /// Number of visible units in a sequence.
    pub fn len(&self, parent: impl Into<ContainerRef>) -> u32 {
        let parent = parent.into();
        return self
            .store
            .sequence(&parent)
            .iter()
            .filter(|item| item.is_visible())
            .map(|item| item.len)
            .sum();
    }

    /// The visible text of a sequence.
    pub fn get_text(&self, parent: impl Into<ContainerRef>) -> String {
        let parent = parent.into();
        let mut text = String::new();
        for item in self.store.sequence(&parent) {
            if let (Content::String(s), true) = (&item.content, item.is_visible()) {
                text.push_str(s);
            }
        }
        return text;
    }

    /// The visible JSON values of a sequence.
    pub fn get_values(&self, parent: impl Into<ContainerRef>) -> Vec<Value> {
        let parent = parent.into();
        let mut values = Vec::new();
        for item in self.store.sequence(&parent) {
            if let (Content::Any(v), true) = (&item.content, item.is_visible()) {
                values.extend(v.iter().cloned());
            }
        }
        return values;
    }

    // ========================================================================
    // Map helpers
    // ========================================================================

    fn map_write(&mut self, parent: ContainerRef, key: &str, content: Content) -> Result<Id> {
        let left = self.store.map_entry(&parent, key).map(|item| item.last_id());
        return self.insert(parent, Some(key), left, None, content);
    }

    /// Set a map key to a JSON value.
    pub fn map_set(&mut self, parent: impl Into<ContainerRef>, key: &str, value: Value) -> Result<()> {
        self.map_write(parent.into(), key, Content::Any(vec![value]))?;
        return Ok(());
    }

    /// Set a map key to a new nested container and return its id.
    pub fn map_set_type(&mut self, parent: impl Into<ContainerRef>, key: &str, kind: TypeRef) -> Result<Id> {
        return self.map_write(parent.into(), key, Content::Type(kind));
    }

    /// Remove a map key. Removing an absent key does nothing.
    pub fn map_remove(&mut self, parent: impl Into<ContainerRef>, key: &str) -> Result<()> {
        let parent = parent.into();
        let entry = match self.store.map_entry(&parent, key) {
            Some(item) if !item.deleted => (item.id, item.len),
            _ => return Ok(()),
        };
        return self.delete(entry.0, entry.1);
    }

    /// The live entries of a map.
    pub fn get_map(&self, parent: impl Into<ContainerRef>) -> BTreeMap<String, Content> {
        let parent = parent.into();
        let mut map = BTreeMap::new();
        let keys: Vec<String> = match self.store.branches.get(&parent) {
            Some(branch) => branch.map.keys().cloned().collect(),
            None => return map,
        };
        for key in keys {
            if let Some(item) = self.store.map_entry(&parent, &key) {
                if !item.deleted {
                    map.insert(key, item.content.clone());
                }
            }
        }
        return map;
    }
}
