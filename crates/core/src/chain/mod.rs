//! In-memory chain structures: the hash->header index with topological
//! numbering and the timeline pairing main blocks with their sign blocks.

pub mod blockchain;
pub mod timeline;

pub use blockchain::{BlockChain, ChainError};
pub use timeline::{Timeline, TimelineError};
