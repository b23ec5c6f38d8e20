//! YATA integration of items into their container's linked order.
//!
//! An item names the units that were its neighbours when it was created
//! (`origin` and `right_origin`). Integration starts right after `origin`
//! and walks over concurrently inserted items until it finds where the new
//! item belongs. Every replica that has seen the same set of items runs the
//! same walk over the same list and ends up with the same order.
//!
//! The walk only ever moves right of `origin` and never past
//! `right_origin`, so the origins bound the search. Inside that window the
//! tie-break is:
//!
//! - an item with the same origin stays left if its client is smaller,
//!   and ends the walk if it also shares the right origin
//! - an item whose origin lies inside the window (seen earlier in this walk)
//!   stays left unless it belongs to a conflict we already passed
//! - anything else ends the walk
//!
//! Map entries reuse the same machinery: every write to a key is an item in
//! a per-key list, the rightmost item is the current value, and the item it
//! displaces is tombstoned.

use rustc_hash::FxHashSet;
use tracing::trace;

use super::block::{Block, BlockRange, ContainerRef, Item};
use super::content::Content;
use super::delete_set::DeleteSet;
use super::id::Id;
use super::store::StructStore;
use crate::error::Error;

impl StructStore {
    /// Link an item into its container and append it to the store.
    ///
    /// `offset` clocks at the front of the item are already known and are
    /// dropped first. The caller guarantees the remaining clock continues
    /// the client's history and that origins and parent are known. Items
    /// whose context has been garbage collected are stored as `Deleted`
    /// blocks. Tombstones created as a side effect are recorded in `deleted`.
    pub(crate) fn integrate(
        &mut self,
        mut item: Item,
        offset: u32,
        deleted: &mut DeleteSet,
    ) -> Result<(), Error> {
        if offset > 0 {
            item = item.split(offset);
            item.left = None;
            item.right = None;
        }

        if self.is_collected_context(&item) {
            trace!(id = %item.id, len = item.len, "item context collected, storing tombstone");
            return self.append(Block::Deleted(BlockRange::new(item.id, item.len)));
        }

        let mut left = match item.origin {
            Some(origin) => {
                self.split_end(origin)?;
                Some(origin)
            }
            None => None,
        };
        item.right = match item.right_origin {
            Some(right_origin) => {
                self.split_start(right_origin)?;
                Some(right_origin)
            }
            None => None,
        };

        let left_right = left.and_then(|l| self.get_item(l)).and_then(|l| l.right);
        let right_has_left = item
            .right
            .and_then(|r| self.get_item(r))
            .is_some_and(|r| r.left.is_some());
        let conflict = match left {
            None => item.right.is_none() || right_has_left,
            Some(_) => left_right != item.right,
        };

        if conflict {
            let mut cursor = match left {
                Some(_) => left_right,
                None => self.first_in(&item.parent, item.parent_sub.as_deref()),
            };
            let mut conflicting: FxHashSet<Id> = FxHashSet::default();
            let mut before_origin: FxHashSet<Id> = FxHashSet::default();

            while let Some(o_id) = cursor {
                if Some(o_id) == item.right {
                    break;
                }
                let o = match self.get_item(o_id) {
                    Some(o) => o,
                    None => break,
                };
                before_origin.insert(o.id);
                conflicting.insert(o.id);

                if o.origin == item.origin {
                    if o.id.client < item.id.client {
                        left = Some(o.last_id());
                        conflicting.clear();
                    } else if o.right_origin == item.right_origin {
                        break;
                    }
                } else if let Some(o_origin) = o.origin.and_then(|id| self.get(id).ok()) {
                    let o_origin = o_origin.id();
                    if !before_origin.contains(&o_origin) {
                        break;
                    }
                    if !conflicting.contains(&o_origin) {
                        left = Some(o.last_id());
                        conflicting.clear();
                    }
                } else {
                    break;
                }
                cursor = o.right;
            }
        }
        item.left = left;

        // Reconnect neighbours
        match item.left {
            Some(l) => {
                let left_item = self.get_item_mut(l).ok_or(Error::NotFound(l))?;
                item.right = left_item.right;
                left_item.right = Some(item.id);
            }
            None => {
                item.right = self.first_in(&item.parent, item.parent_sub.as_deref());
                if item.parent_sub.is_none() {
                    self.branches.entry(item.parent.clone()).or_default().start = Some(item.id);
                }
            }
        }
        let mut displaced = None;
        match (item.right, &item.parent_sub) {
            (Some(r), _) => {
                let right_item = self.get_item_mut(r).ok_or(Error::NotFound(r))?;
                right_item.left = Some(item.last_id());
            }
            (None, Some(key)) => {
                let branch = self.branches.entry(item.parent.clone()).or_default();
                branch.map.insert(key.clone(), item.last_id());
                displaced = item.left;
            }
            (None, None) => {}
        }

        // Collected payloads arrive already tombstoned
        if let Content::Deleted(len) = item.content {
            item.deleted = true;
            deleted.add(item.id.client, item.id.clock, len);
        }
        let id = item.id;
        let shadowed = item.parent_sub.is_some() && item.right.is_some();
        let parent_deleted = match &item.parent {
            ContainerRef::Nested(pid) => self.get_item(*pid).is_some_and(|p| p.deleted),
            ContainerRef::Root(_) => false,
        };
        trace!(id = %id, left = ?item.left, right = ?item.right, "integrated item");
        self.append(Block::Item(item))?;

        if let Some(displaced) = displaced {
            if let Some(start) = self.get_item(displaced).map(|i| i.id) {
                self.delete_item(start, deleted);
            }
        }
        if parent_deleted || shadowed {
            self.delete_item(id, deleted);
        }
        return Ok(());
    }

    /// True if the item's origins or parent were garbage collected, in which
    /// case its position can no longer be resolved.
    fn is_collected_context(&self, item: &Item) -> bool {
        let collected = |id: Option<Id>| {
            return id.is_some_and(|id| matches!(self.get(id), Ok(Block::Deleted(_))));
        };
        if collected(item.origin) || collected(item.right_origin) {
            return true;
        }
        return match &item.parent {
            ContainerRef::Root(_) => false,
            ContainerRef::Nested(pid) => !matches!(
                self.get_item(*pid).map(|p| &p.content),
                Some(Content::Type(_))
            ),
        };
    }

    /// First item of a container's sequence, or of a map key's list.
    pub(crate) fn first_in(&self, parent: &ContainerRef, key: Option<&str>) -> Option<Id> {
        let branch = self.branches.get(parent)?;
        let key = match key {
            Some(key) => key,
            None => return branch.start,
        };
        let mut cursor = *branch.map.get(key)?;
        loop {
            let item = self.get_item(cursor)?;
            match item.left {
                Some(left) => cursor = left,
                None => return Some(item.id),
            }
        }
    }

    /// Items of a container's sequence part, in order, tombstones included.
    pub(crate) fn sequence(&self, parent: &ContainerRef) -> Vec<&Item> {
        let mut items = Vec::new();
        let mut cursor = self.first_in(parent, None);
        while let Some(id) = cursor {
            match self.get_item(id) {
                Some(item) => {
                    items.push(item);
                    cursor = item.right;
                }
                None => break,
            }
        }
        return items;
    }

    /// The current (rightmost) item of a map key.
    pub(crate) fn map_entry(&self, parent: &ContainerRef, key: &str) -> Option<&Item> {
        let last = *self.branches.get(parent)?.map.get(key)?;
        return self.get_item(last);
    }

    /// Start ids of every item directly inside a container.
    pub(crate) fn children(&self, parent: &ContainerRef) -> Vec<Id> {
        let mut ids: Vec<Id> = self.sequence(parent).iter().map(|i| i.id).collect();
        if let Some(branch) = self.branches.get(parent) {
            for last in branch.map.values() {
                let mut cursor = Some(*last);
                while let Some(id) = cursor {
                    match self.get_item(id) {
                        Some(item) => {
                            ids.push(item.id);
                            cursor = item.left;
                        }
                        None => break,
                    }
                }
            }
        }
        return ids;
    }

    /// Tombstone the item starting at `id`. Deleting a type item tombstones
    /// everything inside it. Returns false if nothing changed.
    pub(crate) fn delete_item(&mut self, id: Id, deleted: &mut DeleteSet) -> bool {
        let mut changed = false;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let item = match self.get_item_mut(id) {
                Some(item) if !item.deleted => item,
                _ => continue,
            };
            item.deleted = true;
            changed = true;
            deleted.add(item.id.client, item.id.clock, item.len);
            if let Content::Type(_) = item.content {
                let container = ContainerRef::Nested(item.id);
                stack.extend(self.children(&container));
            }
        }
        return changed;
    }

    /// Drop the payloads of deleted items covered by `ds`.
    ///
    /// Item payloads become `Content::Deleted`, keeping the item in place so
    /// that its neighbours stay resolvable. Children of a collected type
    /// are replaced by `Deleted` blocks and the container is forgotten.
    /// Returns the number of items collected.
    pub(crate) fn gc(&mut self, ds: &DeleteSet) -> usize {
        let mut collected = 0;
        let mut touched: FxHashSet<u64> = FxHashSet::default();

        for (client, ranges) in ds.iter() {
            for range in ranges {
                let mut index = match self.find_index(Id::new(client, range.clock)) {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                loop {
                    let (id, is_type) = match self.blocks(client).get(index) {
                        Some(Block::Item(item)) if item.id.clock < range.end() => {
                            if !item.deleted || !item.content.is_countable() {
                                index += 1;
                                continue;
                            }
                            (item.id, matches!(item.content, Content::Type(_)))
                        }
                        Some(block) if block.clock() < range.end() => {
                            index += 1;
                            continue;
                        }
                        _ => break,
                    };
                    if is_type {
                        collected += self.gc_children(id, &mut touched);
                    }
                    if let Some(item) = self.get_item_mut(id) {
                        item.content = Content::Deleted(item.len);
                        collected += 1;
                    }
                    index += 1;
                }
            }
        }
        for client in touched {
            self.squash_deleted(client);
        }
        if collected > 0 {
            trace!(collected, "garbage collected items");
        }
        return collected;
    }

    fn gc_children(&mut self, type_id: Id, touched: &mut FxHashSet<u64>) -> usize {
        let mut containers = vec![ContainerRef::Nested(type_id)];
        let mut doomed: Vec<(Id, u32)> = Vec::new();
        while let Some(container) = containers.pop() {
            for child in self.children(&container) {
                if let Some(item) = self.get_item(child) {
                    if let Content::Type(_) = item.content {
                        containers.push(ContainerRef::Nested(item.id));
                    }
                    doomed.push((item.id, item.len));
                }
            }
            self.branches.remove(&container);
        }
        for (id, len) in &doomed {
            if let Ok(block) = self.get_mut(*id) {
                *block = Block::Deleted(BlockRange::new(*id, *len));
                touched.insert(id.client);
            }
        }
        return doomed.len();
    }
}
