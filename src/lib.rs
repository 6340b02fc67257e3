pub mod config;
pub mod context;
mod coordinator;
pub mod csv_utils;
pub mod dto;
mod error;
pub mod locks;
pub mod optimistic;
pub mod runner;
pub mod stores;
pub mod timestamps;

pub use config::{CoordinatorConfig, LedgerArgs, LoadConfig, ReplayArgs};
pub use context::{ResourceKey, TxContext, TxId};
pub use coordinator::{TransferCoordinator, TransferResult};
pub use dto::{
    Protocol, RunSummary, SampleStatus, TransferRequest, TransferSample, TransferStatus,
};
pub use error::{AbortReason, Error, Side, StoreError};
pub use runner::{replay, run_experiment};
pub use stores::{InMemoryLedger, LedgerStore};
