//! Storage layer for the ledger. Provides:
//! - Account balances and versions ([`AccountsStore`])
//! - Append-only transfer history ([`TransfersStore`])
//! - The [`LedgerStore`] contract the transfer protocols are written against,
//!   and an in-memory implementation ([`InMemoryLedger`])
//!
//! Every operation is a short, row-atomic critical section. Concurrency
//! control across rows is the job of the protocols, not the store.

mod accounts;
mod transfers;

pub use accounts::{Account, AccountId, AccountsStore};
pub use transfers::{NewTransfer, TransferId, TransferRecord, TransfersStore};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::StoreError;

/// Operations the transfer protocols consume from the ledger.
pub trait LedgerStore: Send + Sync {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Row-exclusive read. Callers must already hold the account's lock.
    fn get_account_for_update(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.get_account(id)
    }

    /// Overwrites the balance. Only safe under an already-held lock.
    fn update_balance(&self, id: AccountId, new_balance: Decimal) -> Result<(), StoreError>;

    /// Adds `delta` to the balance in one row-atomic step. Returns the new balance.
    fn apply_delta(&self, id: AccountId, delta: Decimal) -> Result<Decimal, StoreError>;

    /// Adds `delta` and bumps the version only if the stored version equals
    /// `expected_version`. Returns whether the update was applied.
    fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        delta: Decimal,
    ) -> Result<bool, StoreError>;

    fn append_transfer(&self, transfer: NewTransfer) -> Result<TransferId, StoreError>;
}

#[derive(Default)]
pub struct InMemoryLedger {
    accounts: Mutex<AccountsStore>,
    transfers: Mutex<TransfersStore>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(
        &self,
        id: AccountId,
        owner: &str,
        balance: Decimal,
        currency: &str,
    ) -> Result<(), StoreError> {
        self.accounts.lock().open(id, owner, balance, currency)
    }

    /// All accounts, sorted by id.
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<_> = self.accounts.lock().iter().cloned().collect();
        accounts.sort_by_key(|account| account.id);
        accounts
    }

    /// Sum of all balances. Invariant under any sequence of transfers.
    pub fn total_balance(&self) -> Decimal {
        self.accounts.lock().iter().map(|account| account.balance).sum()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.transfers.lock().iter().cloned().collect()
    }

    pub fn transfers_for(&self, account: AccountId) -> Vec<TransferRecord> {
        self.transfers.lock().for_account(account).cloned().collect()
    }
}

impl LedgerStore for InMemoryLedger {
    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.lock().get(id).cloned())
    }

    fn update_balance(&self, id: AccountId, new_balance: Decimal) -> Result<(), StoreError> {
        self.accounts.lock().set_balance(id, new_balance)
    }

    fn apply_delta(&self, id: AccountId, delta: Decimal) -> Result<Decimal, StoreError> {
        self.accounts.lock().apply_delta(id, delta)
    }

    fn conditional_update(
        &self,
        id: AccountId,
        expected_version: u64,
        delta: Decimal,
    ) -> Result<bool, StoreError> {
        self.accounts
            .lock()
            .apply_if_version(id, expected_version, delta)
    }

    fn append_transfer(&self, transfer: NewTransfer) -> Result<TransferId, StoreError> {
        Ok(self.transfers.lock().append(transfer))
    }
}
