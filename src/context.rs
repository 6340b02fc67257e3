//! Transaction context and resource identity.
//!
//! Every transfer runs under an explicit [`TxContext`] which is passed to the
//! lock and timestamp managers. Lock ownership is scoped by the context's
//! [`TxId`], never by ambient process or session state.

use serde::{Serialize, Serializer};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dto::Protocol;
use crate::stores::AccountId;

pub type TxId = u64;

/// Canonical identifier of a lockable / timestamped entity.
///
/// Ordering is the global lock-acquisition order used for deadlock avoidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKey {
    Account(AccountId),
}

impl ResourceKey {
    pub fn account(id: AccountId) -> Self {
        ResourceKey::Account(id)
    }

    /// Hash of the canonical key. Kept on audit records for quick matching;
    /// lock tables are keyed by the resource itself so two keys never share
    /// a lock.
    pub fn hash64(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.to_string().hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Account(id) => write!(f, "account:{}", id),
        }
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Per-transaction context threaded through every manager call.
#[derive(Debug, Clone)]
pub struct TxContext {
    id: TxId,
    protocol: Protocol,
}

impl TxContext {
    pub fn new(id: TxId, protocol: Protocol) -> Self {
        Self { id, protocol }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

/// Hands out process-unique transaction ids, starting at 1.
#[derive(Debug, Default)]
pub struct TxIdGenerator {
    last: AtomicU64,
}

impl TxIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, protocol: Protocol) -> TxContext {
        let id = self.last.fetch_add(1, Ordering::Relaxed) + 1;
        TxContext::new(id, protocol)
    }
}
