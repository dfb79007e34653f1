//! JSON file-backed repository adapters (spec §4.3, §6).
//!
//! [`JsonStore`] is a generic key-value snapshot store that keeps a
//! domain's records in memory and rewrites one JSON file on every write.
//! [`JsonRequestRepository`] and [`JsonMachineRepository`] build the
//! `RequestRepository`/`MachineRepository` ports on top of it. This is
//! the one storage strategy this workspace ships; the port is the
//! contract (spec §6 `storage.strategy` is opaque to the core).

#![forbid(unsafe_code)]

use async_trait::async_trait;
use brk_domain::repository::{PageRequest, RequestFilter};
use brk_domain::{BrokerError, BrokerResult, MachineRepository, RequestRepository};
use brk_proto::{Machine, MachineId, Request, RequestId, RequestStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A simple JSON file-backed store for a single domain of records.
///
/// Keeps data in memory and snapshots to `{state_path}/state/{domain}.json`
/// on every write.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(state_path: &Path, domain: &str) -> Self {
        let path = state_path.join("state").join(format!("{domain}.json"));
        Self { path }
    }

    /// Load data from disk. Returns an empty map if the file doesn't exist
    /// or is corrupt — a corrupt snapshot must never prevent startup.
    pub fn load<T: for<'de> Deserialize<'de>>(&self) -> HashMap<String, T> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, starting fresh");
                HashMap::new()
            }),
            Err(_) => {
                debug!(path = %self.path.display(), "no state file, starting fresh");
                HashMap::new()
            }
        }
    }

    pub fn save<T: Serialize>(&self, data: &HashMap<String, T>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(data).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, content)
    }
}

// ─── Request repository ────────────────────────────────────────────────────

pub struct JsonRequestRepository {
    store: JsonStore,
    cache: RwLock<HashMap<String, Request>>,
}

impl JsonRequestRepository {
    pub fn new(state_path: &Path) -> Self {
        let store = JsonStore::new(state_path, "requests");
        let cache = RwLock::new(store.load());
        Self { store, cache }
    }

    fn snapshot(&self) -> BrokerResult<()> {
        self.store
            .save(&self.cache.read())
            .map_err(|e| BrokerError::Internal(format!("failed to persist requests: {e}")))
    }
}

#[async_trait]
impl RequestRepository for JsonRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> BrokerResult<Option<Request>> {
        Ok(self.cache.read().get(id).cloned())
    }

    async fn save(&self, request: &Request, expected_version: Option<u64>) -> BrokerResult<()> {
        {
            let cache = self.cache.read();
            if let (Some(existing), Some(expected)) = (cache.get(&request.request_id), expected_version)
                && existing.version != expected
            {
                return Err(BrokerError::Conflict(format!(
                    "request '{}' was modified concurrently (expected version {}, found {})",
                    request.request_id, expected, existing.version
                )));
            }
        }
        self.cache
            .write()
            .insert(request.request_id.clone(), request.clone());
        self.snapshot()
    }

    async fn delete(&self, id: &RequestId) -> BrokerResult<()> {
        self.cache.write().remove(id);
        self.snapshot()
    }

    async fn find_all(&self, filter: &RequestFilter, page: &PageRequest) -> BrokerResult<Vec<Request>> {
        let cache = self.cache.read();
        let mut matches: Vec<Request> = cache
            .values()
            .filter(|r| {
                filter
                    .request_type
                    .map(|t| t == r.request_type)
                    .unwrap_or(true)
                    && filter
                        .provider_name
                        .as_ref()
                        .map(|name| r.provider_name.as_deref() == Some(name.as_str()))
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let start = page.page.saturating_mul(page.limit.max(1)).min(matches.len());
        let end = start.saturating_add(page.limit).min(matches.len());
        Ok(matches[start..end].to_vec())
    }

    async fn find_by_status(&self, status: RequestStatus) -> BrokerResult<Vec<Request>> {
        Ok(self
            .cache
            .read()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}

// ─── Machine repository ────────────────────────────────────────────────────

pub struct JsonMachineRepository {
    store: JsonStore,
    cache: RwLock<HashMap<String, Machine>>,
}

impl JsonMachineRepository {
    pub fn new(state_path: &Path) -> Self {
        let store = JsonStore::new(state_path, "machines");
        let cache = RwLock::new(store.load());
        Self { store, cache }
    }

    fn snapshot(&self) -> BrokerResult<()> {
        self.store
            .save(&self.cache.read())
            .map_err(|e| BrokerError::Internal(format!("failed to persist machines: {e}")))
    }
}

#[async_trait]
impl MachineRepository for JsonMachineRepository {
    async fn find_by_id(&self, id: &MachineId) -> BrokerResult<Option<Machine>> {
        Ok(self.cache.read().get(id).cloned())
    }

    async fn save(&self, machine: &Machine, expected_version: Option<u64>) -> BrokerResult<()> {
        {
            let cache = self.cache.read();
            if let (Some(existing), Some(expected)) = (cache.get(&machine.machine_id), expected_version)
                && existing.version != expected
            {
                return Err(BrokerError::Conflict(format!(
                    "machine '{}' was modified concurrently (expected version {}, found {})",
                    machine.machine_id, expected, existing.version
                )));
            }
        }
        self.cache
            .write()
            .insert(machine.machine_id.clone(), machine.clone());
        self.snapshot()
    }

    async fn find_by_request(&self, request_id: &RequestId) -> BrokerResult<Vec<Machine>> {
        Ok(self
            .cache
            .read()
            .values()
            .filter(|m| &m.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn find_all(&self, page: &PageRequest) -> BrokerResult<Vec<Machine>> {
        let cache = self.cache.read();
        let mut all: Vec<Machine> = cache.values().cloned().collect();
        all.sort_by(|a, b| a.launch_time.cmp(&b.launch_time));
        let start = page.page.saturating_mul(page.limit.max(1)).min(all.len());
        let end = start.saturating_add(page.limit).min(all.len());
        Ok(all[start..end].to_vec())
    }

    async fn delete_for_request(&self, request_id: &RequestId) -> BrokerResult<()> {
        self.cache.write().retain(|_, m| &m.request_id != request_id);
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brk_proto::{MachineStatus, RequestType};

    #[test]
    fn json_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonStore::new(dir.path(), "test");
        let mut data = HashMap::new();
        data.insert("key1".to_string(), "value1".to_string());
        store.save(&data).expect("save");
        let loaded: HashMap<String, String> = store.load();
        assert_eq!(loaded.get("key1").unwrap(), "value1");
    }

    #[test]
    fn json_store_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("corrupt.json"), "not json").unwrap();
        let store = JsonStore::new(dir.path(), "corrupt");
        let loaded: HashMap<String, String> = store.load();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn request_repository_save_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonRequestRepository::new(dir.path());
        let request = Request::new_acquire("t1".into(), 2);
        repo.save(&request, None).await.unwrap();

        let found = repo.find_by_id(&request.request_id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().request_type, RequestType::Acquire);
    }

    #[tokio::test]
    async fn request_repository_rejects_stale_write() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonRequestRepository::new(dir.path());
        let mut request = Request::new_acquire("t1".into(), 2);
        repo.save(&request, None).await.unwrap();

        request.version = 5; // stale caller thinks it's at version 5
        let err = repo.save(&request, Some(5)).await;
        // first save stored version 0, so expecting 5 is a conflict
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn request_repository_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::new_acquire("t1".into(), 1);
        {
            let repo = JsonRequestRepository::new(dir.path());
            repo.save(&request, None).await.unwrap();
        }
        let repo = JsonRequestRepository::new(dir.path());
        let found = repo.find_by_id(&request.request_id).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn machine_repository_cascade_delete_for_request() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonMachineRepository::new(dir.path());
        let m1 = Machine {
            machine_id: "m1".into(),
            request_id: "req-1".into(),
            template_id: "t1".into(),
            provider_name: "p1".into(),
            instance_id: "i-1".into(),
            instance_type: "m5.large".into(),
            private_ip: None,
            public_ip: None,
            status: MachineStatus::Running,
            launch_time: chrono::Utc::now(),
            last_status_check: None,
            version: 0,
        };
        repo.save(&m1, None).await.unwrap();
        assert_eq!(repo.find_by_request(&"req-1".to_string()).await.unwrap().len(), 1);

        repo.delete_for_request(&"req-1".to_string()).await.unwrap();
        assert!(repo.find_by_request(&"req-1".to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_status_filters_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonRequestRepository::new(dir.path());
        let mut r1 = Request::new_acquire("t1".into(), 1);
        r1.status = RequestStatus::Completed;
        let r2 = Request::new_acquire("t1".into(), 1);
        repo.save(&r1, None).await.unwrap();
        repo.save(&r2, None).await.unwrap();

        let completed = repo.find_by_status(RequestStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].request_id, r1.request_id);
    }
}
