//! Storage Index Module
//!
//! The index structure the key/value layer keeps its entries in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         HMap<T>                             │
//! │  ┌───────────────────────┐      ┌───────────────────────┐   │
//! │  │ newer (2N slots)      │ ◄─── │ older (N slots)       │   │
//! │  │ receives every insert │      │ drained a little on   │   │
//! │  │                       │      │ each insert           │   │
//! │  └───────────────────────┘      └───────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Incremental Resize**: no single operation pays for a full rehash
//! - **Caller-Supplied Hashing**: entries carry their own 64-bit hash code
//! - **Predicate Equality**: lookups take a closure that recognises the key
//! - **Single-Threaded**: owned by the reactor thread, no locking
//!
//! ## Example
//!
//! ```
//! use pollkv::storage::{hash_bytes, HMap};
//! use bytes::Bytes;
//!
//! struct Entry {
//!     key: Bytes,
//!     value: Bytes,
//! }
//!
//! let mut index = HMap::new();
//! let key = Bytes::from("name");
//! index.insert(
//!     hash_bytes(&key),
//!     Entry { key: key.clone(), value: Bytes::from("Ariz") },
//! );
//!
//! let found = index.lookup(hash_bytes(&key), |e: &Entry| e.key == key);
//! assert_eq!(found.map(|e| e.value.clone()), Some(Bytes::from("Ariz")));
//! ```

pub mod hash;
pub mod hashmap;

// Re-export commonly used types
pub use hash::hash_bytes;
pub use hashmap::HMap;
