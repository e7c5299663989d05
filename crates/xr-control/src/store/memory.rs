//! In-memory entity store with optional JSON file persistence

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use xr_core::error::StoreError;
use xr_core::time::current_time_secs;
use xr_core::traits::EntityStore;
use xr_core::{
    AuditEntry, Connectivity, EntityRef, Inbound, InboundDetails, InboundId, Outbound,
    OutboundDetails, OutboundId, Server, ServerDetails, ServerId,
};

use crate::synth::write_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    next_id: i64,
    servers: BTreeMap<ServerId, Server>,
    inbounds: BTreeMap<InboundId, Inbound>,
    outbounds: BTreeMap<OutboundId, Outbound>,
    audit: Vec<AuditEntry>,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn server_mut(&mut self, id: ServerId) -> Result<&mut Server, StoreError> {
        self.servers
            .get_mut(&id)
            .ok_or(StoreError::NotFound(EntityRef::Server(id)))
    }

    fn ensure_server(&self, id: ServerId) -> Result<(), StoreError> {
        if self.servers.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(EntityRef::Server(id)))
        }
    }

    /// Reject `port` if another enabled inbound of the node already uses it
    fn check_port(
        &self,
        server_id: ServerId,
        port: u16,
        exclude: Option<InboundId>,
    ) -> Result<(), StoreError> {
        let taken = self.inbounds.values().any(|i| {
            i.server_id == server_id && i.enabled && i.port == port && Some(i.id) != exclude
        });
        if taken {
            Err(StoreError::PortInUse { server_id, port })
        } else {
            Ok(())
        }
    }
}

/// Entity store kept in memory, serializable to a single JSON file
///
/// Ids are allocated from one counter shared by all tables, so an id is
/// never reused after deletion.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from `path`, or start empty if the file does not exist
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "Store file absent, starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("Failed to read {}: {}", path.display(), e)))?;
        let tables: Tables = serde_json::from_str(&content).map_err(|e| {
            StoreError::Backend(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Write the whole store to `path` atomically
    pub async fn persist(&self, path: &Path) -> Result<(), StoreError> {
        let tables = self.tables.read().await;
        let content = serde_json::to_vec_pretty(&*tables)
            .map_err(|e| StoreError::Backend(format!("Failed to serialize store: {}", e)))?;
        write_atomic(path, &content).map_err(|e| StoreError::Backend(e.to_string()))?;
        debug!(path = %path.display(), servers = tables.servers.len(), "Store persisted");
        Ok(())
    }
}

/// A [`MemoryStore`] bound to the file it was loaded from
///
/// The handle holds an exclusive advisory lock on a `.lock` file next to the
/// store from `open` until it is dropped, so two processes never load and
/// write back the same store concurrently. A second `open` blocks until the
/// first handle is gone.
pub struct FileStore {
    inner: Arc<MemoryStore>,
    path: PathBuf,
    _lock: File,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let lock = acquire_lock(&path)?;
        Ok(Self {
            inner: Arc::new(MemoryStore::open(&path)?),
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the current state to disk
    pub async fn save(&self) -> Result<(), StoreError> {
        self.inner.persist(&self.path).await
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner
    }

    /// A shared handle to the underlying store, for handing to a reconciler
    pub fn shared(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.inner)
    }
}

/// Path of the lock file guarding the store at `path`
fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Backend(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| {
            StoreError::Backend(format!("Failed to open {}: {}", lock_path.display(), e))
        })?;
    file.lock_exclusive().map_err(|e| {
        StoreError::Backend(format!("Failed to lock {}: {}", lock_path.display(), e))
    })?;
    debug!(path = %lock_path.display(), "Store lock acquired");
    Ok(file)
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_server(&self, id: ServerId) -> Result<Server, StoreError> {
        self.tables
            .read()
            .await
            .servers
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Server(id)))
    }

    async fn list_servers(&self) -> Result<Vec<Server>, StoreError> {
        Ok(self.tables.read().await.servers.values().cloned().collect())
    }

    async fn insert_server(&self, details: ServerDetails) -> Result<Server, StoreError> {
        let mut tables = self.tables.write().await;
        let id = ServerId(tables.allocate());
        let server = Server::new(id, details);
        tables.servers.insert(id, server.clone());
        Ok(server)
    }

    async fn update_server(
        &self,
        id: ServerId,
        details: ServerDetails,
    ) -> Result<Server, StoreError> {
        let mut tables = self.tables.write().await;
        let server = tables.server_mut(id)?;
        server.apply_details(details);
        server.updated_at = current_time_secs();
        Ok(server.clone())
    }

    async fn save_connectivity(
        &self,
        id: ServerId,
        connectivity: &Connectivity,
    ) -> Result<Server, StoreError> {
        let mut tables = self.tables.write().await;
        let server = tables.server_mut(id)?;
        server.connectivity = connectivity.clone();
        server.updated_at = current_time_secs();
        Ok(server.clone())
    }

    async fn set_config_stale(&self, id: ServerId, stale: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.server_mut(id)?.config_stale = stale;
        Ok(())
    }

    async fn delete_server(&self, id: ServerId) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.servers.remove(&id).is_none() {
            return Err(StoreError::NotFound(EntityRef::Server(id)));
        }
        tables.inbounds.retain(|_, i| i.server_id != id);
        tables.outbounds.retain(|_, o| o.server_id != id);
        Ok(())
    }

    async fn list_inbounds(&self, server_id: ServerId) -> Result<Vec<Inbound>, StoreError> {
        let tables = self.tables.read().await;
        tables.ensure_server(server_id)?;
        Ok(tables
            .inbounds
            .values()
            .filter(|i| i.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn get_inbound(&self, id: InboundId) -> Result<Inbound, StoreError> {
        self.tables
            .read()
            .await
            .inbounds
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Inbound(id)))
    }

    async fn insert_inbound(
        &self,
        server_id: ServerId,
        details: InboundDetails,
    ) -> Result<Inbound, StoreError> {
        let mut tables = self.tables.write().await;
        tables.ensure_server(server_id)?;
        if details.enabled {
            tables.check_port(server_id, details.port, None)?;
        }
        let id = InboundId(tables.allocate());
        let inbound = Inbound::new(id, server_id, details);
        tables.inbounds.insert(id, inbound.clone());
        Ok(inbound)
    }

    async fn update_inbound(
        &self,
        id: InboundId,
        details: InboundDetails,
    ) -> Result<Inbound, StoreError> {
        let mut tables = self.tables.write().await;
        let server_id = tables
            .inbounds
            .get(&id)
            .map(|i| i.server_id)
            .ok_or(StoreError::NotFound(EntityRef::Inbound(id)))?;
        if details.enabled {
            tables.check_port(server_id, details.port, Some(id))?;
        }
        let inbound = Inbound::new(id, server_id, details);
        tables.inbounds.insert(id, inbound.clone());
        Ok(inbound)
    }

    async fn delete_inbound(&self, id: InboundId) -> Result<Inbound, StoreError> {
        self.tables
            .write()
            .await
            .inbounds
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityRef::Inbound(id)))
    }

    async fn list_outbounds(&self, server_id: ServerId) -> Result<Vec<Outbound>, StoreError> {
        let tables = self.tables.read().await;
        tables.ensure_server(server_id)?;
        Ok(tables
            .outbounds
            .values()
            .filter(|o| o.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn get_outbound(&self, id: OutboundId) -> Result<Outbound, StoreError> {
        self.tables
            .read()
            .await
            .outbounds
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(EntityRef::Outbound(id)))
    }

    async fn insert_outbound(
        &self,
        server_id: ServerId,
        details: OutboundDetails,
    ) -> Result<Outbound, StoreError> {
        let mut tables = self.tables.write().await;
        tables.ensure_server(server_id)?;
        let id = OutboundId(tables.allocate());
        let outbound = Outbound::new(id, server_id, details);
        tables.outbounds.insert(id, outbound.clone());
        Ok(outbound)
    }

    async fn update_outbound(
        &self,
        id: OutboundId,
        details: OutboundDetails,
    ) -> Result<Outbound, StoreError> {
        let mut tables = self.tables.write().await;
        let server_id = tables
            .outbounds
            .get(&id)
            .map(|o| o.server_id)
            .ok_or(StoreError::NotFound(EntityRef::Outbound(id)))?;
        let outbound = Outbound::new(id, server_id, details);
        tables.outbounds.insert(id, outbound.clone());
        Ok(outbound)
    }

    async fn delete_outbound(&self, id: OutboundId) -> Result<Outbound, StoreError> {
        self.tables
            .write()
            .await
            .outbounds
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityRef::Outbound(id)))
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<(), StoreError> {
        self.tables.write().await.audit.push(entry);
        Ok(())
    }

    async fn list_audit(&self, server_id: Option<ServerId>) -> Result<Vec<AuditEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|e| server_id.is_none() || e.server_id == server_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xr_core::{Actor, DaemonSessionId, NodeStatus};

    fn server_details(name: &str) -> ServerDetails {
        ServerDetails {
            name: name.to_string(),
            location: "Paris".to_string(),
            ip_address: "10.1.1.1".to_string(),
            port: 443,
            protocol: "tcp".to_string(),
            config_path: PathBuf::from("/etc/xray/config.json"),
        }
    }

    fn inbound(port: u16, enabled: bool) -> InboundDetails {
        InboundDetails {
            name: format!("in-{}", port),
            protocol: "vless".to_string(),
            port,
            settings: "{}".to_string(),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_port_unique_per_node_among_enabled() {
        let store = MemoryStore::new();
        let a = store.insert_server(server_details("a")).await.unwrap();
        let b = store.insert_server(server_details("b")).await.unwrap();

        store.insert_inbound(a.id, inbound(443, true)).await.unwrap();
        let err = store.insert_inbound(a.id, inbound(443, true)).await.unwrap_err();
        assert!(matches!(err, StoreError::PortInUse { port: 443, .. }));

        // Other nodes and disabled inbounds do not conflict
        store.insert_inbound(b.id, inbound(443, true)).await.unwrap();
        let disabled = store.insert_inbound(a.id, inbound(443, false)).await.unwrap();

        // Enabling the disabled one collides
        let err = store
            .update_inbound(disabled.id, inbound(443, true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PortInUse { .. }));
    }

    #[tokio::test]
    async fn test_update_keeps_own_port() {
        let store = MemoryStore::new();
        let a = store.insert_server(server_details("a")).await.unwrap();
        let i = store.insert_inbound(a.id, inbound(443, true)).await.unwrap();
        let mut details = inbound(443, true);
        details.name = "renamed".to_string();
        let updated = store.update_inbound(i.id, details).await.unwrap();
        assert_eq!(updated.name, "renamed");
    }

    #[tokio::test]
    async fn test_delete_server_cascades() {
        let store = MemoryStore::new();
        let a = store.insert_server(server_details("a")).await.unwrap();
        let i = store.insert_inbound(a.id, inbound(443, true)).await.unwrap();
        let o = store
            .insert_outbound(
                a.id,
                OutboundDetails {
                    name: "direct".to_string(),
                    protocol: "freedom".to_string(),
                    settings: "{}".to_string(),
                    enabled: true,
                },
            )
            .await
            .unwrap();

        store.delete_server(a.id).await.unwrap();
        assert!(store.get_server(a.id).await.is_err());
        assert!(store.get_inbound(i.id).await.is_err());
        assert!(store.get_outbound(o.id).await.is_err());
        assert!(matches!(
            store.list_inbounds(a.id).await,
            Err(StoreError::NotFound(EntityRef::Server(_)))
        ));
    }

    #[tokio::test]
    async fn test_list_returns_id_order() {
        let store = MemoryStore::new();
        let a = store.insert_server(server_details("a")).await.unwrap();
        for port in [8080, 443, 2053] {
            store.insert_inbound(a.id, inbound(port, true)).await.unwrap();
        }
        let ports: Vec<u16> = store
            .list_inbounds(a.id)
            .await
            .unwrap()
            .iter()
            .map(|i| i.port)
            .collect();
        assert_eq!(ports, vec![8080, 443, 2053]);
    }

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");

        let store = FileStore::open(&path).unwrap();
        let a = store.store().insert_server(server_details("a")).await.unwrap();
        let connectivity =
            Connectivity::restore(NodeStatus::Connected, Some(DaemonSessionId::new("d1"))).unwrap();
        store.store().save_connectivity(a.id, &connectivity).await.unwrap();
        store
            .store()
            .append_audit(AuditEntry::new("add_server", "Added a", Some(a.id), &Actor::system()))
            .await
            .unwrap();
        store.save().await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        let server = reopened.store().get_server(a.id).await.unwrap();
        assert_eq!(server.session(), Some(&DaemonSessionId::new("d1")));
        assert_eq!(reopened.store().list_audit(Some(a.id)).await.unwrap().len(), 1);

        // Ids keep counting after a reload
        let b = reopened.store().insert_server(server_details("b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_handle_waits_for_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");

        let first = FileStore::open(&path).unwrap();
        let second_path = path.clone();
        let second = tokio::task::spawn_blocking(move || FileStore::open(second_path));

        first.store().insert_server(server_details("a")).await.unwrap();
        first.save().await.unwrap();
        drop(first);

        // Loaded only after the first handle released the lock, so it sees "a"
        let second = second.await.unwrap().unwrap();
        second.store().insert_server(server_details("b")).await.unwrap();
        second.save().await.unwrap();
        drop(second);

        let reopened = FileStore::open(&path).unwrap();
        let names: Vec<String> = reopened
            .store()
            .list_servers()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(dir.path().join("fleet.json.lock").exists());
    }
}
