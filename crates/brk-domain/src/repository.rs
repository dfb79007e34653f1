//! Repository ports (spec §4.3, §6).
//!
//! Persistence is a port: `brk-persist` ships the one concrete adapter
//! (JSON file snapshots), but nothing in this crate or `brk-bus` depends
//! on that choice. Every call crosses an I/O boundary and may suspend —
//! callers must not hold locks across a repository call.

use crate::error::BrokerResult;
use async_trait::async_trait;
use brk_proto::{Machine, MachineId, Request, RequestId, RequestStatus};

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn all() -> Self {
        Self { page: 0, limit: usize::MAX }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub request_type: Option<brk_proto::RequestType>,
    pub provider_name: Option<String>,
}

/// Persistence port for the Request aggregate.
///
/// `save` is transactional per-aggregate and uses the aggregate's
/// `version` field for optimistic concurrency: a caller must pass back
/// the version it read, and a stale write fails with
/// [`crate::error::BrokerError::Conflict`] rather than being silently
/// retried (spec §4.3).
#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> BrokerResult<Option<Request>>;
    async fn save(&self, request: &Request, expected_version: Option<u64>) -> BrokerResult<()>;
    async fn delete(&self, id: &RequestId) -> BrokerResult<()>;
    async fn find_all(&self, filter: &RequestFilter, page: &PageRequest) -> BrokerResult<Vec<Request>>;
    async fn find_by_status(&self, status: RequestStatus) -> BrokerResult<Vec<Request>>;
}

/// Persistence port for the Machine aggregate.
///
/// Machines are owned exclusively by their Request (spec §3): deleting a
/// Request without cascading its machines is rejected, enforced here via
/// `delete_for_request` as the only sanctioned bulk-delete path.
#[async_trait]
pub trait MachineRepository: Send + Sync {
    async fn find_by_id(&self, id: &MachineId) -> BrokerResult<Option<Machine>>;
    async fn save(&self, machine: &Machine, expected_version: Option<u64>) -> BrokerResult<()>;
    async fn find_by_request(&self, request_id: &RequestId) -> BrokerResult<Vec<Machine>>;
    async fn find_all(&self, page: &PageRequest) -> BrokerResult<Vec<Machine>>;
    async fn delete_for_request(&self, request_id: &RequestId) -> BrokerResult<()>;
}
