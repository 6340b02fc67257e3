//! Version-stamped validation for the optimistic path.
//!
//! Stateless: all state lives on the account rows. A commit applies a balance
//! change only if the row still carries the version the transaction read.

use rust_decimal::Decimal;
use tracing::debug;

use crate::stores::{AccountId, LedgerStore};
use crate::StoreError;

/// Balance and version of an account as read, without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub account: AccountId,
    pub balance: Decimal,
    pub version: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OptimisticValidator;

impl OptimisticValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn snapshot<S>(&self, store: &S, account: AccountId) -> Result<Option<Snapshot>, StoreError>
    where
        S: LedgerStore + ?Sized,
    {
        Ok(store.get_account(account)?.map(|row| Snapshot {
            account: row.id,
            balance: row.balance,
            version: row.version,
        }))
    }

    /// `balance += delta; version += 1` if the stored version still equals
    /// `expected_version`. Returns false on a version conflict.
    pub fn commit<S>(
        &self,
        store: &S,
        account: AccountId,
        expected_version: u64,
        delta: Decimal,
    ) -> Result<bool, StoreError>
    where
        S: LedgerStore + ?Sized,
    {
        let applied = store.conditional_update(account, expected_version, delta)?;
        debug!(account, expected_version, %delta, applied, "optimistic commit");
        Ok(applied)
    }

    /// Reverses an applied commit without re-validating the version.
    pub fn compensate<S>(
        &self,
        store: &S,
        account: AccountId,
        applied_delta: Decimal,
    ) -> Result<Decimal, StoreError>
    where
        S: LedgerStore + ?Sized,
    {
        store.apply_delta(account, -applied_delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryLedger;
    use rust_decimal_macros::dec;

    fn ledger() -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.open_account(1, "Alice", dec!(100.00), "USD").unwrap();
        ledger
    }

    #[test]
    fn test_snapshot() {
        let ledger = ledger();
        let validator = OptimisticValidator::new();
        assert_eq!(
            validator.snapshot(&ledger, 1).unwrap(),
            Some(Snapshot {
                account: 1,
                balance: dec!(100.00),
                version: 1,
            })
        );
        assert_eq!(validator.snapshot(&ledger, 2).unwrap(), None);
    }

    #[test]
    fn test_only_one_commit_wins_per_snapshot() {
        let ledger = ledger();
        let validator = OptimisticValidator::new();
        let seen = validator.snapshot(&ledger, 1).unwrap().unwrap();

        assert!(validator.commit(&ledger, 1, seen.version, dec!(-30)).unwrap());
        assert!(!validator.commit(&ledger, 1, seen.version, dec!(-50)).unwrap());

        let now = validator.snapshot(&ledger, 1).unwrap().unwrap();
        assert_eq!(now.balance, dec!(70.00));
        assert_eq!(now.version, seen.version + 1);
    }

    #[test]
    fn test_compensate_ignores_version() {
        let ledger = ledger();
        let validator = OptimisticValidator::new();

        assert!(validator.commit(&ledger, 1, 1, dec!(-30)).unwrap());
        // Someone else bumps the version in between
        assert!(validator.commit(&ledger, 1, 2, dec!(5)).unwrap());

        assert_eq!(validator.compensate(&ledger, 1, dec!(-30)).unwrap(), dec!(105.00));
        assert_eq!(validator.snapshot(&ledger, 1).unwrap().unwrap().version, 4);
    }

    #[test]
    fn test_commit_on_missing_account_is_an_error() {
        let ledger = ledger();
        let validator = OptimisticValidator::new();
        assert_eq!(
            validator.commit(&ledger, 9, 1, dec!(1)),
            Err(StoreError::AccountNotFound(9))
        );
    }
}
