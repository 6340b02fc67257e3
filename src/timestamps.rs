//! Timestamp manager for the timestamp-ordering path.
//!
//! Transactions get a logical timestamp from a monotonically increasing
//! counter, one per transaction. Each resource keeps a read and a write
//! watermark, created lazily on first access and advanced in place.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::context::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Watermark of a resource nobody has touched yet.
    pub const ZERO: Timestamp = Timestamp(0);

    #[cfg(test)]
    pub(crate) fn at(value: u64) -> Self {
        Timestamp(value)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampRecord {
    pub resource: ResourceKey,
    pub last_read_ts: Timestamp,
    pub last_write_ts: Timestamp,
}

#[derive(Default)]
pub struct TimestampManager {
    clock: AtomicU64,
    table: Mutex<HashMap<ResourceKey, TimestampRecord>>,
}

impl TimestampManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next logical timestamp. Strictly greater than every
    /// timestamp handed out before it.
    pub fn begin(&self) -> Timestamp {
        Timestamp(self.clock.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns false if the resource was written by a younger transaction.
    /// Otherwise advances the read watermark to `ts`.
    pub fn check_before_read(&self, resource: ResourceKey, ts: Timestamp) -> bool {
        let mut table = self.table.lock();
        let record = Self::entry(&mut table, resource);
        if record.last_write_ts > ts {
            debug!(%resource, %ts, last_write = %record.last_write_ts, "stale read");
            return false;
        }
        record.last_read_ts = record.last_read_ts.max(ts);
        true
    }

    /// Returns false if the resource was read or written by a younger
    /// transaction. Otherwise advances the write watermark to `ts`.
    pub fn check_before_write(&self, resource: ResourceKey, ts: Timestamp) -> bool {
        let mut table = self.table.lock();
        let record = Self::entry(&mut table, resource);
        if record.last_read_ts > ts || record.last_write_ts > ts {
            debug!(
                %resource,
                %ts,
                last_read = %record.last_read_ts,
                last_write = %record.last_write_ts,
                "stale write"
            );
            return false;
        }
        record.last_write_ts = record.last_write_ts.max(ts);
        true
    }

    fn entry(
        table: &mut HashMap<ResourceKey, TimestampRecord>,
        resource: ResourceKey,
    ) -> &mut TimestampRecord {
        table.entry(resource).or_insert_with(|| TimestampRecord {
            resource,
            last_read_ts: Timestamp::ZERO,
            last_write_ts: Timestamp::ZERO,
        })
    }

    pub fn record(&self, resource: ResourceKey) -> Option<TimestampRecord> {
        self.table.lock().get(&resource).cloned()
    }

    /// All watermarks, sorted by resource.
    pub fn records(&self) -> Vec<TimestampRecord> {
        let mut records: Vec<_> = self.table.lock().values().cloned().collect();
        records.sort_by_key(|record| record.resource);
        records
    }
}
