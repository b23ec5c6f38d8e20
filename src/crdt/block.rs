//! Structs: the atomic units of replicated history.
//!
//! A block covers a contiguous clock range of one client. Blocks come in
//! three kinds:
//!
//! - `Item`: inserted content, linked into its parent container
//! - `Deleted`: a garbage-collected tombstone that keeps only id and length
//! - `Skip`: a placeholder for a range an update does not know about
//!
//! Any block can be split at an offset into two blocks with the same total
//! length. Splitting never changes what the document means.

use super::content::Content;
use super::id::{ClientId, Clock, Id};

// =============================================================================
// Containers
// =============================================================================

/// The container an item lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerRef {
    /// A named top-level container.
    Root(String),
    /// A container created by the type item with this id.
    Nested(Id),
}

impl ContainerRef {
    /// Shorthand for a named root container.
    pub fn root(name: &str) -> ContainerRef {
        return ContainerRef::Root(name.to_string());
    }
}

impl From<&str> for ContainerRef {
    fn from(name: &str) -> Self {
        return ContainerRef::root(name);
    }
}

impl From<Id> for ContainerRef {
    fn from(id: Id) -> Self {
        return ContainerRef::Nested(id);
    }
}

impl From<&ContainerRef> for ContainerRef {
    fn from(parent: &ContainerRef) -> Self {
        return parent.clone();
    }
}

/// A contiguous clock range without a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    pub id: Id,
    pub len: u32,
}

impl BlockRange {
    pub fn new(id: Id, len: u32) -> BlockRange {
        return BlockRange { id, len };
    }

    fn split(&mut self, offset: u32) -> BlockRange {
        debug_assert!(offset > 0 && offset < self.len);
        let right = BlockRange::new(self.id.offset(offset), self.len - offset);
        self.len = offset;
        return right;
    }
}

// =============================================================================
// Items
// =============================================================================

/// An inserted struct.
///
/// The origins are immutable and capture the insertion context:
/// - `origin`: the unit that was immediately to the left when this was inserted
/// - `right_origin`: the unit that was immediately to the right
///
/// `left` and `right` are the live neighbours in the parent's order. They are
/// stored as ids and resolved through the store: `left` names the last clock
/// of the left neighbour and `right` names the first clock of the right
/// neighbour, so splitting either neighbour keeps the link valid.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub id: Id,
    pub len: u32,
    pub origin: Option<Id>,
    pub right_origin: Option<Id>,
    pub parent: ContainerRef,
    /// Map key, for items that hold the value of a map entry.
    pub parent_sub: Option<String>,
    pub content: Content,
    pub deleted: bool,
    pub left: Option<Id>,
    pub right: Option<Id>,
}

impl Item {
    /// Create a new, not yet integrated item.
    pub fn new(
        id: Id,
        origin: Option<Id>,
        right_origin: Option<Id>,
        parent: ContainerRef,
        parent_sub: Option<String>,
        content: Content,
    ) -> Item {
        let len = content.len();
        return Item {
            id,
            len,
            origin,
            right_origin,
            parent,
            parent_sub,
            content,
            deleted: false,
            left: None,
            right: None,
        };
    }

    /// The id of the last unit in this item.
    pub fn last_id(&self) -> Id {
        return self.id.offset(self.len - 1);
    }

    /// Whether this item contributes to its parent's visible length.
    pub fn is_visible(&self) -> bool {
        return !self.deleted && self.content.is_countable();
    }

    /// Split this item at the given offset, returning the right part.
    ///
    /// After split:
    /// - self contains [0, offset)
    /// - returned item contains [offset, len)
    ///
    /// The right part's origin becomes the last unit of the left part and it
    /// keeps the original right origin. The two parts are linked to each
    /// other and the right part inherits the old right neighbour.
    pub fn split(&mut self, offset: u32) -> Item {
        debug_assert!(offset > 0 && offset < self.len);

        let content = self.content.splice(offset);
        let right = Item {
            id: self.id.offset(offset),
            len: self.len - offset,
            origin: Some(self.id.offset(offset - 1)),
            right_origin: self.right_origin,
            parent: self.parent.clone(),
            parent_sub: self.parent_sub.clone(),
            content,
            deleted: self.deleted,
            left: Some(self.id.offset(offset - 1)),
            right: self.right,
        };

        self.len = offset;
        self.right = Some(right.id);

        return right;
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// A struct of any kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Block {
    Item(Item),
    Deleted(BlockRange),
    Skip(BlockRange),
}

impl Block {
    pub fn id(&self) -> Id {
        return match self {
            Block::Item(item) => item.id,
            Block::Deleted(range) | Block::Skip(range) => range.id,
        };
    }

    pub fn client(&self) -> ClientId {
        return self.id().client;
    }

    pub fn clock(&self) -> Clock {
        return self.id().clock;
    }

    pub fn len(&self) -> u32 {
        return match self {
            Block::Item(item) => item.len,
            Block::Deleted(range) | Block::Skip(range) => range.len,
        };
    }

    /// True if the block covers no clocks. Never the case for valid blocks.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    /// Exclusive end clock.
    pub fn end(&self) -> Clock {
        return self.clock() + self.len();
    }

    pub fn last_id(&self) -> Id {
        return self.id().offset(self.len() - 1);
    }

    /// Whether this block covers `clock` of its own client.
    pub fn contains(&self, clock: Clock) -> bool {
        return clock >= self.clock() && clock < self.end();
    }

    pub fn is_skip(&self) -> bool {
        return matches!(self, Block::Skip(_));
    }

    /// Deleted blocks and tombstoned items both count as deleted.
    pub fn is_deleted(&self) -> bool {
        return match self {
            Block::Item(item) => item.deleted,
            Block::Deleted(_) => true,
            Block::Skip(_) => false,
        };
    }

    pub fn as_item(&self) -> Option<&Item> {
        return match self {
            Block::Item(item) => Some(item),
            _ => None,
        };
    }

    pub fn as_item_mut(&mut self) -> Option<&mut Item> {
        return match self {
            Block::Item(item) => Some(item),
            _ => None,
        };
    }

    /// Split this block at `offset`, keeping the left part and returning the
    /// right part.
    pub fn split(&mut self, offset: u32) -> Block {
        return match self {
            Block::Item(item) => Block::Item(item.split(offset)),
            Block::Deleted(range) => Block::Deleted(range.split(offset)),
            Block::Skip(range) => Block::Skip(range.split(offset)),
        };
    }

    /// Drop the first `offset` clocks and return what remains. Used when part
    /// of a block is already known.
    pub fn slice_front(mut self, offset: u32) -> Block {
        if offset == 0 {
            return self;
        }
        let mut right = self.split(offset);
        // The remainder of an update struct is not linked to anything yet.
        if let Block::Item(item) = &mut right {
            item.left = None;
            item.right = None;
        }
        return right;
    }

    /// Merge `other` into this block if both are payload-free ranges of the
    /// same kind that touch. Returns false if nothing was merged.
    pub fn try_squash(&mut self, other: &Block) -> bool {
        if self.client() != other.client() || self.end() != other.clock() {
            return false;
        }
        return match (self, other) {
            (Block::Deleted(a), Block::Deleted(b)) | (Block::Skip(a), Block::Skip(b)) => {
                a.len += b.len;
                true
            }
            _ => false,
        };
    }
}
