use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

use crate::StoreError;

pub type AccountId = u32;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: Decimal,
    pub currency: String,
    /// Bumped on every balance change, starts at 1.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Applies a balance change and bumps the version.
    /// Refuses any change that would leave the balance below zero.
    fn apply(&mut self, delta: Decimal) -> Result<Decimal, StoreError> {
        let new_balance = self.balance + delta;
        if new_balance < Decimal::ZERO {
            return Err(StoreError::NegativeBalance {
                account: self.id,
                balance: self.balance,
                delta,
            });
        }
        self.balance = new_balance;
        self.version += 1;
        Ok(new_balance)
    }
}

#[derive(Default)]
pub struct AccountsStore {
    accounts: HashMap<AccountId, Account>,
}

impl AccountsStore {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    /// Opens a new account with the given id and opening balance.
    pub fn open(
        &mut self,
        id: AccountId,
        owner: &str,
        balance: Decimal,
        currency: &str,
    ) -> Result<(), StoreError> {
        if self.accounts.contains_key(&id) {
            return Err(StoreError::DuplicateAccount(id));
        }
        if balance < Decimal::ZERO {
            return Err(StoreError::NegativeBalance {
                account: id,
                balance: Decimal::ZERO,
                delta: balance,
            });
        }
        self.accounts.insert(
            id,
            Account {
                id,
                owner: owner.to_owned(),
                balance,
                currency: currency.to_owned(),
                version: 1,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    /// Gets an account entry, or returns an error if it doesn't exist.
    pub fn get_mut(&mut self, id: AccountId) -> Result<&mut Account, StoreError> {
        self.accounts
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))
    }

    /// Overwrites the balance of an account.
    pub fn set_balance(&mut self, id: AccountId, new_balance: Decimal) -> Result<(), StoreError> {
        let account = self.get_mut(id)?;
        let delta = new_balance - account.balance;
        account.apply(delta).map(|_| ())
    }

    /// Adds `delta` to the balance unconditionally. Returns the new balance.
    pub fn apply_delta(&mut self, id: AccountId, delta: Decimal) -> Result<Decimal, StoreError> {
        self.get_mut(id)?.apply(delta)
    }

    /// Adds `delta` only if the stored version still equals `expected_version`.
    pub fn apply_if_version(
        &mut self,
        id: AccountId,
        expected_version: u64,
        delta: Decimal,
    ) -> Result<bool, StoreError> {
        let account = self.get_mut(id)?;
        if account.version != expected_version {
            return Ok(false);
        }
        account.apply(delta)?;
        Ok(true)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }
}
