//! kvtree: move configuration between a flat slash-delimited key-value store
//! (Consul KV) and nested JSON trees.
//!
//! Keys listed under a prefix are folded into a [`Tree`] by splitting on `/`.
//! A tree is written back with one put per leaf, every value coerced to bytes
//! by [`Scalar::coerce`].
//!
//! ```
//! use kvtree::{migrate, MemoryStore, StoreWriter};
//!
//! let store = MemoryStore::new();
//! store.put("cfg/db/host", b"db1").unwrap();
//! store.put("cfg/db/port", b"5432").unwrap();
//!
//! let tree = migrate::read_prefix(&store, "cfg").unwrap();
//! assert_eq!(tree.to_json(), serde_json::json!({"db": {"host": "db1", "port": "5432"}}));
//!
//! migrate::write_tree(&store, &tree, "cfg-copy").unwrap();
//! assert_eq!(store.get("cfg-copy/db/port"), Some(b"5432".to_vec()));
//! ```

pub mod async_wrapper;
pub mod consul;
pub mod errors;
pub mod migrate;
pub mod store;
pub mod tree;

pub use async_wrapper::AsyncKvTree;
pub use consul::{ConsulConfig, ConsulStore};
pub use errors::{KvTreeError, Result};
pub use store::{FileStore, FlatRecord, MemoryStore, Store, StoreReader, StoreWriter};
pub use tree::{Node, Scalar, Tree};
