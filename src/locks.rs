//! Lock manager for the two-phase locking path.
//!
//! Each resource gets its own reader/writer lock, keyed directly by its
//! [`ResourceKey`]. Acquisition blocks the calling task until no other
//! transaction holds a conflicting lock. Every attempt is written to an audit
//! log as a [`LockRecord`] that moves WAITING -> HELD -> RELEASED (or
//! WAITING -> TIMED_OUT when a wait deadline expires).
//!
//! Release is tied to [`LockHandle`]'s lifetime: dropping the handle releases
//! the lock, so every exit path of the caller gives it back.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::context::{ResourceKey, TxContext, TxId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    Waiting,
    Held,
    Released,
    TimedOut,
}

/// Audit entry for one acquisition attempt. Never reused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockRecord {
    pub id: u64,
    pub resource: ResourceKey,
    pub resource_hash: u64,
    pub owner: TxId,
    pub mode: LockMode,
    pub state: LockState,
    pub requested_at: DateTime<Utc>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out waiting for lock on {0}")]
pub struct LockWaitTimeout(pub ResourceKey);

#[derive(Default)]
struct AuditLog {
    records: Vec<LockRecord>,
}

impl AuditLog {
    fn open(&mut self, ctx: &TxContext, resource: ResourceKey, mode: LockMode) -> u64 {
        let id = self.records.len() as u64 + 1;
        self.records.push(LockRecord {
            id,
            resource,
            resource_hash: resource.hash64(),
            owner: ctx.id(),
            mode,
            state: LockState::Waiting,
            requested_at: Utc::now(),
            acquired_at: None,
            released_at: None,
        });
        id
    }

    /// Moves a record forward. Each transition happens at most once.
    fn transition(&mut self, id: u64, to: LockState) {
        let Some(record) = self.records.get_mut(id as usize - 1) else {
            return;
        };
        let now = Utc::now();
        match (record.state, to) {
            (LockState::Waiting, LockState::Held) => record.acquired_at = Some(now),
            (LockState::Held, LockState::Released) => record.released_at = Some(now),
            (LockState::Waiting, LockState::TimedOut) => {}
            (from, to) => {
                warn!(record = id, ?from, ?to, "ignoring invalid lock state transition");
                return;
            }
        }
        record.state = to;
    }
}

enum Guard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// A held lock. Dropping it releases the lock and closes its audit record.
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct LockHandle {
    record_id: u64,
    resource: ResourceKey,
    owner: TxId,
    audit: Arc<Mutex<AuditLog>>,
    _guard: Guard,
}

impl LockHandle {
    pub fn resource(&self) -> ResourceKey {
        self.resource
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.audit
            .lock()
            .transition(self.record_id, LockState::Released);
        debug!(tx = self.owner, resource = %self.resource, "lock released");
    }
}

pub struct LockManager {
    table: Mutex<HashMap<ResourceKey, Arc<RwLock<()>>>>,
    audit: Arc<Mutex<AuditLog>>,
    timeout: Option<Duration>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Lock manager whose waits never time out.
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            audit: Arc::new(Mutex::new(AuditLog::default())),
            timeout,
        }
    }

    fn slot(&self, resource: ResourceKey) -> Arc<RwLock<()>> {
        self.table
            .lock()
            .entry(resource)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Blocks until `resource` can be locked in `mode` on behalf of `ctx`.
    pub async fn acquire(
        &self,
        ctx: &TxContext,
        resource: ResourceKey,
        mode: LockMode,
    ) -> Result<LockHandle, LockWaitTimeout> {
        let slot = self.slot(resource);
        let record_id = self.audit.lock().open(ctx, resource, mode);
        debug!(tx = ctx.id(), %resource, ?mode, "waiting for lock");

        let wait = async move {
            match mode {
                LockMode::Shared => Guard::Shared(slot.read_owned().await),
                LockMode::Exclusive => Guard::Exclusive(slot.write_owned().await),
            }
        };
        let guard = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(guard) => guard,
                Err(_) => {
                    self.audit.lock().transition(record_id, LockState::TimedOut);
                    warn!(tx = ctx.id(), %resource, "lock wait timed out");
                    return Err(LockWaitTimeout(resource));
                }
            },
            None => wait.await,
        };

        self.audit.lock().transition(record_id, LockState::Held);
        debug!(tx = ctx.id(), %resource, "lock held");
        Ok(LockHandle {
            record_id,
            resource,
            owner: ctx.id(),
            audit: Arc::clone(&self.audit),
            _guard: guard,
        })
    }

    /// Acquires every resource in ascending key order, whatever order the
    /// caller lists them in. All transactions going through here share one
    /// global order, so no cycle of waits can form.
    ///
    /// On a timeout the locks already taken are dropped before returning.
    pub async fn acquire_ordered(
        &self,
        ctx: &TxContext,
        resources: &[ResourceKey],
        mode: LockMode,
    ) -> Result<Vec<LockHandle>, LockWaitTimeout> {
        let mut ordered = resources.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut handles = Vec::with_capacity(ordered.len());
        for resource in ordered {
            handles.push(self.acquire(ctx, resource, mode).await?);
        }
        Ok(handles)
    }

    pub fn release(&self, handle: LockHandle) {
        drop(handle);
    }

    /// Every recorded acquisition attempt, oldest first.
    pub fn history(&self) -> Vec<LockRecord> {
        self.audit.lock().records.clone()
    }

    pub fn history_for(&self, resource: ResourceKey) -> Vec<LockRecord> {
        let hash = resource.hash64();
        self.audit
            .lock()
            .records
            .iter()
            .filter(|record| record.resource_hash == hash && record.resource == resource)
            .cloned()
            .collect()
    }

    /// Attempts requested within `[from, to]`.
    pub fn history_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<LockRecord> {
        self.audit
            .lock()
            .records
            .iter()
            .filter(|record| record.requested_at >= from && record.requested_at <= to)
            .cloned()
            .collect()
    }

    /// Locks currently held by a transaction.
    pub fn held_by(&self, tx: TxId) -> Vec<LockRecord> {
        self.audit
            .lock()
            .records
            .iter()
            .filter(|record| record.owner == tx && record.state == LockState::Held)
            .cloned()
            .collect()
    }
}
