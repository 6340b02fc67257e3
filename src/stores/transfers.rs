//! Append-only transfer history.
//!
//! One record per attempted transfer, including aborted ones. Records are
//! never updated or removed once appended.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::dto::{Protocol, TransferStatus};
use crate::stores::AccountId;

pub type TransferId = u64;

/// A transfer outcome ready to be appended. The store assigns id and time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub protocol: Protocol,
    pub status: TransferStatus,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub protocol: Protocol,
    pub status: TransferStatus,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

#[derive(Default)]
pub struct TransfersStore {
    records: Vec<TransferRecord>,
}

impl TransfersStore {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn append(&mut self, transfer: NewTransfer) -> TransferId {
        let id = self.records.len() as TransferId + 1;
        self.records.push(TransferRecord {
            id,
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
            protocol: transfer.protocol,
            status: transfer.status,
            timestamp: Utc::now(),
            note: transfer.note,
        });
        id
    }

    pub fn get(&self, id: TransferId) -> Option<&TransferRecord> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.records.get(index)
    }

    /// Transfers where the account was either source or destination.
    pub fn for_account(&self, account: AccountId) -> impl Iterator<Item = &TransferRecord> {
        self.records
            .iter()
            .filter(move |record| record.from == account || record.to == account)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
