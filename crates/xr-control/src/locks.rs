//! Per-node operation serialization

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use xr_core::ServerId;

/// One async mutex per node
///
/// Holding a node's guard makes synthesis, the agent call and the status
/// write a single critical section. Different nodes never contend.
#[derive(Default)]
pub struct NodeLocks {
    locks: DashMap<ServerId, Arc<Mutex<()>>>,
}

impl NodeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a node
    pub async fn lock(&self, id: ServerId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self.locks.entry(id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted node
    pub fn forget(&self, id: ServerId) {
        self.locks.remove(&id);
    }
}
