//! Error taxonomy for the transfer ledger.
//!
//! Two families of failures live here:
//! - [`AbortReason`] is a business-level abort (missing account, insufficient
//!   funds, stale timestamps, version conflicts). Aborts are never returned as
//!   `Err`; the coordinator records them on the transfer and hands them back
//!   inside a [`TransferResult`](crate::TransferResult).
//! - [`Error`] and [`StoreError`] cover caller mistakes and infrastructure
//!   failures. These propagate with `?`.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::context::ResourceKey;
use crate::stores::AccountId;

/// Failures reported by a [`LedgerStore`](crate::LedgerStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),
    #[error("balance of account {account} ({balance}) cannot absorb a change of {delta}")]
    NegativeBalance {
        account: AccountId,
        balance: Decimal,
        delta: Decimal,
    },
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to the caller of [`TransferCoordinator::transfer`](crate::TransferCoordinator::transfer).
#[derive(Debug, Error)]
pub enum Error {
    #[error("transfer amount must be positive, got {0}")]
    AmountMustBePositive(Decimal),
    #[error("source and destination are the same account ({0})")]
    SameAccount(AccountId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which leg of a transfer an optimistic commit was attempted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Why a transfer was aborted. The `Display` output is the human-readable
/// reason stored on the transfer record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("lock wait timed out on {0}")]
    LockConflict(ResourceKey),
    #[error("stale read on {0}")]
    StaleRead(ResourceKey),
    #[error("stale write on {0}")]
    StaleWrite(ResourceKey),
    #[error("version conflict on {0}")]
    VersionConflict(Side),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_abort_reasons_are_human_readable() {
        assert_eq!(
            AbortReason::AccountNotFound(42).to_string(),
            "account 42 not found"
        );
        assert_eq!(
            AbortReason::InsufficientFunds {
                account: 1,
                balance: dec!(10.00),
                requested: dec!(999999.00),
            }
            .to_string(),
            "insufficient funds in account 1: balance 10.00, requested 999999.00"
        );
        assert_eq!(
            AbortReason::StaleWrite(ResourceKey::account(7)).to_string(),
            "stale write on account:7"
        );
        assert_eq!(
            AbortReason::VersionConflict(Side::Source).to_string(),
            "version conflict on source"
        );
    }

    #[test]
    fn test_store_error_converts_into_error() {
        let err: Error = StoreError::AccountNotFound(3).into();
        assert!(matches!(err, Error::Store(StoreError::AccountNotFound(3))));
        assert_eq!(err.to_string(), "account 3 not found");
    }
}
