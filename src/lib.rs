//! Tandem - a replicated struct store and update protocol for
//! collaboratively edited documents.
//!
//! Replicas edit independently, exchange compact binary updates and
//! converge to the same document whatever order updates arrive in,
//! including duplicates and gaps.
//!
//! # Quick Start
//!
//! ```
//! use tandem::{Doc, Version};
//!
//! let mut alice = Doc::with_client_id(1);
//! alice.insert_text("text", 0, "Hello").unwrap();
//!
//! let mut bob = Doc::with_client_id(2);
//! let update = alice.encode_state_as_update(None, Version::V1);
//! bob.apply_update(&update, Version::V1).unwrap();
//! bob.insert_text("text", 5, ", World!").unwrap();
//!
//! let diff = bob.encode_state_as_update(Some(&alice.state_vector()), Version::V1);
//! alice.apply_update(&diff, Version::V1).unwrap();
//! assert_eq!(alice.get_text("text"), "Hello, World!");
//! ```
//!
//! Updates can also be combined without a document:
//!
//! ```
//! use tandem::{Doc, Version, merge_updates, state_vector_from_update};
//!
//! let mut a = Doc::with_client_id(1);
//! a.insert_text("text", 0, "a").unwrap();
//! let mut b = Doc::with_client_id(2);
//! b.insert_text("text", 0, "b").unwrap();
//!
//! let ua = a.encode_state_as_update(None, Version::V2);
//! let ub = b.encode_state_as_update(None, Version::V2);
//! let merged = merge_updates(&[ua, ub], Version::V2).unwrap();
//! let sv = state_vector_from_update(&merged, Version::V2).unwrap();
//! assert_eq!(sv.get(1), 1);
//! assert_eq!(sv.get(2), 1);
//! ```

pub mod codec;
pub mod crdt;
pub mod error;
pub mod update;

pub use codec::{Version, decode_state_vector, encode_state_vector};
pub use crdt::Crdt;
pub use crdt::block::{Block, BlockRange, ContainerRef, Item};
pub use crdt::content::{Content, TypeRef};
pub use crdt::delete_set::{DeleteRange, DeleteSet};
pub use crdt::doc::{Doc, Options, PendingUpdate, SyncState};
pub use crdt::id::{ClientId, Clock, Id, MAX_CLIENT_ID, StateVector};
pub use crdt::store::StructStore;
pub use error::{CodecError, Error, Result};
pub use update::{
    RegistrationOrder, SortPolicy, SplitAt, SplitEvery, SplitPolicy, Update, UpdateMeta,
    diff_update, encode_state_as_updates, encode_state_vector_from_update, merge_updates,
    parse_update_meta, state_vector_from_update,
};
