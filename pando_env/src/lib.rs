//! Pando Environment Abstraction Layer
//!
//! This crate holds everything the engine shares with its external
//! collaborators:
//! - The composite [`Key`] and its domain codec ([`ChainInfo`])
//! - Stored [`Entry`] records and their [`TagSet`]
//! - The [`EntryStore`] contract every store implementation honors
//! - The [`PandoContext`] source of time and randomness
//!
//! Engines only ever talk to a store through [`EntryStore`], so the same
//! unit code runs against an in-memory map, a sled database, or a seeded
//! simulation.
//!
//! # Example
//!
//! ```ignore
//! use pando_env::{ChainInfo, EntryStore, Key, StoreError, TagSet};
//!
//! fn seed_distance<S: EntryStore>(store: &S, vertex: i64) -> Result<(), StoreError> {
//!     let domain = ChainInfo::pack(6, 6, 0);
//!     let tags: TagSet = ["SEED"].into_iter().collect();
//!     store.create(tags, b"0".to_vec(), Key::new(domain, vertex, 0))?;
//!     Ok(())
//! }
//! ```

mod context;
mod error;
mod key;
mod store;
mod system_impl;
mod types;

pub use context::PandoContext;
pub use error::StoreError;
pub use key::{ChainInfo, Key, RANDOM_DOMAIN_BIT};
pub use store::EntryStore;
pub use system_impl::SystemContext;
pub use types::{Entry, TagSet, FORCE_MERGE_TAG, MERGED_TAG};
