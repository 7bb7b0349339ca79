//! Replicated key-value cache client.

pub mod command;
pub mod connection;
pub mod local_cache;
pub mod node;
mod ops;
pub mod redis;
pub mod replica_set;
pub mod scan;
pub mod topology;
pub mod traits;

pub use command::{CacheableCommand, Command, Encoding, ZAddMode};
pub use redis::RedisBackend;
pub use replica_set::ReplicaSet;
pub use scan::{ScanOutcome, ScanPage};
pub use traits::{Backend, BatchReplies, CacheError, Node};
