//! Persistent state: the append-only block files and the RocksDB store
//! holding every derived projection.

pub mod block_store;
pub mod keys;
pub mod kv;
pub mod records;

pub use block_store::{BlockStore, BlockStoreError};
pub use kv::{Batch, KvError, KvStore};
