//! Entity store implementations

mod memory;

pub use memory::{FileStore, MemoryStore};
