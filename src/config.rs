//! Configuration for the coordinator and the command-line runners.
//!
//! Load runs default to 50 concurrent workers, 50 transfers per run and
//! 10 runs over accounts 1-4, with amounts between 1 and 100.

use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

use crate::dto::Protocol;
use crate::stores::AccountId;

/// Upper bound on how long a 2PL transfer waits for a lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(DEFAULT_LOCK_TIMEOUT),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Accounts the in-memory ledger is seeded with.
#[derive(Debug, Clone, Args)]
pub struct LedgerArgs {
    /// Comma-separated account ids to open
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4", global = true)]
    pub accounts: Vec<AccountId>,

    /// Opening balance of every account
    #[arg(long, default_value = "10000.00", global = true)]
    pub initial_balance: Decimal,

    /// Currency code of every account
    #[arg(long, default_value = "USD", global = true)]
    pub currency: String,

    /// Seconds a 2PL transfer may wait for a lock (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_LOCK_TIMEOUT.as_secs(), global = true)]
    pub lock_timeout_secs: u64,
}

impl LedgerArgs {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let timeout = match self.lock_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        CoordinatorConfig::default().with_lock_timeout(timeout)
    }
}

/// Parameters of a randomized load run.
#[derive(Debug, Clone, Args)]
pub struct LoadConfig {
    /// Maximum number of transfers in flight
    #[arg(long, default_value_t = 50)]
    pub concurrency: usize,

    /// Transfers per run
    #[arg(long, default_value_t = 50)]
    pub total: usize,

    /// Number of runs
    #[arg(long, default_value_t = 10)]
    pub runs: u32,

    /// Concurrency-control protocol
    #[arg(long, value_enum, default_value_t = Protocol::TwoPhaseLocking)]
    pub protocol: Protocol,

    /// Smallest transfer amount
    #[arg(long, default_value = "1.00")]
    pub amount_min: Decimal,

    /// Largest transfer amount
    #[arg(long, default_value = "100.00")]
    pub amount_max: Decimal,

    /// Per-attempt CSV, appended to
    #[arg(long, default_value = "transfers_detail.csv")]
    pub out_detail: PathBuf,

    /// Per-run summary CSV, appended to
    #[arg(long, default_value = "transfers_summary.csv")]
    pub out_summary: PathBuf,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: 50,
            total: 50,
            runs: 10,
            protocol: Protocol::TwoPhaseLocking,
            amount_min: Decimal::new(100, 2),
            amount_max: Decimal::new(10000, 2),
            out_detail: PathBuf::from("transfers_detail.csv"),
            out_summary: PathBuf::from("transfers_summary.csv"),
        }
    }
}

/// Parameters of a CSV replay.
#[derive(Debug, Clone, Args)]
pub struct ReplayArgs {
    /// CSV file with `from,to,amount,protocol` rows
    pub input: PathBuf,

    /// Maximum number of transfers in flight
    #[arg(long, default_value_t = 50)]
    pub concurrency: usize,

    /// Per-attempt CSV, appended to
    #[arg(long)]
    pub out_detail: Option<PathBuf>,
}
