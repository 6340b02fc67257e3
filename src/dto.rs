use chrono::{DateTime, Utc};
use clap::ValueEnum;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stores::AccountId;

/// Concurrency-control protocol used for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Protocol {
    /// Two-phase locking
    #[serde(rename = "2PL", alias = "2pl")]
    #[value(name = "2pl")]
    TwoPhaseLocking,
    /// Timestamp ordering
    #[serde(rename = "TS", alias = "ts")]
    #[value(name = "ts")]
    TimestampOrdering,
    /// Optimistic concurrency control
    #[serde(rename = "OCC", alias = "occ", alias = "opt")]
    #[value(name = "occ", alias = "opt")]
    Optimistic,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [
        Protocol::TwoPhaseLocking,
        Protocol::TimestampOrdering,
        Protocol::Optimistic,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Protocol::TwoPhaseLocking => "2PL",
            Protocol::TimestampOrdering => "TS",
            Protocol::Optimistic => "OCC",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Completed,
    Aborted,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Completed => write!(f, "COMPLETED"),
            TransferStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// A transfer request, e.g. one row of a replay file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    #[serde(deserialize_with = "deserialize_decimal_2dp")]
    pub amount: Decimal,
    pub protocol: Protocol,
}

fn deserialize_decimal_2dp<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    <Decimal as Deserialize>::deserialize(deserializer)
        .map(|dec| dec.round_dp_with_strategy(2, RoundingStrategy::ToZero))
}

/// How a single attempt ended from the runner's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SampleStatus {
    Completed,
    Aborted,
    /// The coordinator returned an error instead of a result.
    Failed,
}

/// Per-attempt detail row written by the runners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSample {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub protocol: Protocol,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub status: SampleStatus,
    pub reason: String,
    pub latency_s: f64,
    pub error: Option<String>,
}

/// Aggregate row for one load run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: u32,
    pub protocol: Protocol,
    pub concurrency: usize,
    pub total_ops: usize,
    pub completed: usize,
    /// Business aborts plus failed attempts
    pub aborted: usize,
    pub failed: usize,
    pub abort_rate_pct: f64,
    pub avg_latency_s: f64,
    pub p50_latency_s: f64,
    pub throughput_ops_per_s: f64,
    pub timestamp: DateTime<Utc>,
}
