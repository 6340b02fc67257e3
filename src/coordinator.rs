//! Transfer coordinator.
//!
//! Runs one fund transfer end to end under the requested protocol:
//! - **2PL**: locks both accounts in ascending id order, reads them under the
//!   locks, validates, applies the debit and credit, releases by scope.
//! - **TS**: one logical timestamp per transfer; read checks on both accounts,
//!   validation, then write checks on both, aborting on the first failing
//!   check before anything is written.
//! - **OCC**: unlocked snapshots, validation, then version-conditioned commits
//!   on source and destination. A failed destination commit is compensated by
//!   reversing the source debit.
//!
//! Business aborts come back as a [`TransferResult`] with status `ABORTED`.
//! Every attempt that reaches a protocol path appends exactly one transfer
//! record, successful or not.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::context::{ResourceKey, TxContext, TxIdGenerator};
use crate::dto::{Protocol, TransferStatus};
use crate::error::{AbortReason, Side};
use crate::locks::{LockHandle, LockManager, LockMode, LockWaitTimeout};
use crate::optimistic::OptimisticValidator;
use crate::stores::{AccountId, LedgerStore, NewTransfer, TransferId};
use crate::timestamps::TimestampManager;
use crate::{Error, StoreError};

/// Outcome of a protocol path: `Ok` on commit, `Err` on a business abort.
type Verdict = Result<(), AbortReason>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub transfer_id: TransferId,
    pub protocol: Protocol,
    pub status: TransferStatus,
    /// Human-readable reason, as stored on the transfer record.
    pub reason: String,
    pub abort: Option<AbortReason>,
}

impl TransferResult {
    pub fn is_completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }
}

pub struct TransferCoordinator<S> {
    store: Arc<S>,
    tx_ids: TxIdGenerator,
    locks: LockManager,
    timestamps: TimestampManager,
    validator: OptimisticValidator,
}

impl<S: LedgerStore> TransferCoordinator<S> {
    pub fn new(store: Arc<S>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            tx_ids: TxIdGenerator::new(),
            locks: LockManager::with_timeout(config.lock_timeout),
            timestamps: TimestampManager::new(),
            validator: OptimisticValidator::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn timestamps(&self) -> &TimestampManager {
        &self.timestamps
    }

    /// Moves `amount` from `from` to `to` under `protocol`.
    ///
    /// # Errors
    /// Returns an error if:
    /// * `amount` is not positive, or `from == to` (nothing is recorded)
    /// * The ledger store fails. Locks are released and an `ABORTED` record
    ///   is appended on a best-effort basis before the error propagates.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        protocol: Protocol,
    ) -> Result<TransferResult, Error> {
        if amount <= Decimal::ZERO {
            return Err(Error::AmountMustBePositive(amount));
        }
        if from == to {
            return Err(Error::SameAccount(from));
        }

        let ctx = self.tx_ids.begin(protocol);
        debug!(tx = ctx.id(), from, to, %amount, %protocol, "transfer started");

        let outcome = match protocol {
            Protocol::TwoPhaseLocking => self.transfer_2pl(&ctx, from, to, amount).await,
            Protocol::TimestampOrdering => self.transfer_ts(&ctx, from, to, amount),
            Protocol::Optimistic => self.transfer_occ(&ctx, from, to, amount),
        };

        match outcome {
            Ok(verdict) => self.finish(&ctx, from, to, amount, verdict),
            Err(err) => {
                self.record_failure(&ctx, from, to, amount, &err);
                Err(err)
            }
        }
    }

    async fn transfer_2pl(
        &self,
        ctx: &TxContext,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<Verdict, Error> {
        let resources = [ResourceKey::account(from), ResourceKey::account(to)];
        let held = match self
            .locks
            .acquire_ordered(ctx, &resources, LockMode::Exclusive)
            .await
        {
            Ok(handles) => handles,
            Err(LockWaitTimeout(resource)) => return Ok(Err(AbortReason::LockConflict(resource))),
        };
        let order: Vec<_> = held.iter().map(LockHandle::resource).collect();
        debug!(tx = ctx.id(), ?order, "locks held");

        let Some(source) = self.store.get_account_for_update(from)? else {
            return Ok(Err(AbortReason::AccountNotFound(from)));
        };
        if self.store.get_account_for_update(to)?.is_none() {
            return Ok(Err(AbortReason::AccountNotFound(to)));
        }
        if source.balance < amount {
            return Ok(Err(AbortReason::InsufficientFunds {
                account: from,
                balance: source.balance,
                requested: amount,
            }));
        }

        // TS and OCC writers bypass these locks: write deltas, not snapshots
        match self.store.apply_delta(from, -amount) {
            Ok(_) => {}
            Err(StoreError::NegativeBalance { balance, .. }) => {
                return Ok(Err(AbortReason::InsufficientFunds {
                    account: from,
                    balance,
                    requested: amount,
                }))
            }
            Err(err) => return Err(err.into()),
        }
        if let Err(err) = self.store.apply_delta(to, amount) {
            self.store.apply_delta(from, amount)?;
            return Err(err.into());
        }
        Ok(Ok(()))
    }

    fn transfer_ts(
        &self,
        ctx: &TxContext,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<Verdict, Error> {
        let ts = self.timestamps.begin();
        let (source_key, destination_key) = (ResourceKey::account(from), ResourceKey::account(to));
        debug!(tx = ctx.id(), %ts, "timestamp assigned");

        if !self.timestamps.check_before_read(source_key, ts) {
            return Ok(Err(AbortReason::StaleRead(source_key)));
        }
        if !self.timestamps.check_before_read(destination_key, ts) {
            return Ok(Err(AbortReason::StaleRead(destination_key)));
        }

        let Some(source) = self.store.get_account(from)? else {
            return Ok(Err(AbortReason::AccountNotFound(from)));
        };
        if self.store.get_account(to)?.is_none() {
            return Ok(Err(AbortReason::AccountNotFound(to)));
        }
        if source.balance < amount {
            return Ok(Err(AbortReason::InsufficientFunds {
                account: from,
                balance: source.balance,
                requested: amount,
            }));
        }

        if !self.timestamps.check_before_write(source_key, ts) {
            return Ok(Err(AbortReason::StaleWrite(source_key)));
        }
        if !self.timestamps.check_before_write(destination_key, ts) {
            return Ok(Err(AbortReason::StaleWrite(destination_key)));
        }

        // Relative, row-atomic writes: a concurrent debit that landed after
        // our read can only turn this into an insufficient-funds abort.
        match self.store.apply_delta(from, -amount) {
            Ok(_) => {}
            Err(StoreError::NegativeBalance { balance, .. }) => {
                return Ok(Err(AbortReason::InsufficientFunds {
                    account: from,
                    balance,
                    requested: amount,
                }))
            }
            Err(err) => return Err(err.into()),
        }
        if let Err(err) = self.store.apply_delta(to, amount) {
            self.store.apply_delta(from, amount)?;
            return Err(err.into());
        }
        Ok(Ok(()))
    }

    fn transfer_occ(
        &self,
        ctx: &TxContext,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<Verdict, Error> {
        let store = self.store.as_ref();

        let Some(source) = self.validator.snapshot(store, from)? else {
            return Ok(Err(AbortReason::AccountNotFound(from)));
        };
        let Some(destination) = self.validator.snapshot(store, to)? else {
            return Ok(Err(AbortReason::AccountNotFound(to)));
        };
        if source.balance < amount {
            return Ok(Err(AbortReason::InsufficientFunds {
                account: from,
                balance: source.balance,
                requested: amount,
            }));
        }

        if !self.validator.commit(store, from, source.version, -amount)? {
            return Ok(Err(AbortReason::VersionConflict(Side::Source)));
        }

        // The source is debited from here on. Until compensation lands, other
        // readers can observe the debit without the matching credit.
        let credited = self.validator.commit(store, to, destination.version, amount);
        match credited {
            Ok(true) => Ok(Ok(())),
            Ok(false) => {
                warn!(tx = ctx.id(), account = from, %amount, "destination conflict, compensating source debit");
                self.validator.compensate(store, from, -amount)?;
                Ok(Err(AbortReason::VersionConflict(Side::Destination)))
            }
            Err(err) => {
                self.validator.compensate(store, from, -amount)?;
                Err(err.into())
            }
        }
    }

    /// Appends the transfer record for a decided outcome.
    fn finish(
        &self,
        ctx: &TxContext,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        verdict: Verdict,
    ) -> Result<TransferResult, Error> {
        let protocol = ctx.protocol();
        let (status, reason, abort) = match verdict {
            Ok(()) => (
                TransferStatus::Completed,
                format!("completed under {}", protocol),
                None,
            ),
            Err(abort) => (TransferStatus::Aborted, abort.to_string(), Some(abort)),
        };

        let transfer_id = self.store.append_transfer(NewTransfer {
            from,
            to,
            amount,
            protocol,
            status,
            note: reason.clone(),
        })?;
        info!(tx = ctx.id(), transfer_id, %protocol, %status, %reason, "transfer finished");

        Ok(TransferResult {
            transfer_id,
            protocol,
            status,
            reason,
            abort,
        })
    }

    fn record_failure(
        &self,
        ctx: &TxContext,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        err: &Error,
    ) {
        error!(tx = ctx.id(), from, to, %amount, error = %err, "transfer failed");
        let appended = self.store.append_transfer(NewTransfer {
            from,
            to,
            amount,
            protocol: ctx.protocol(),
            status: TransferStatus::Aborted,
            note: format!("internal error: {}", err),
        });
        if let Err(append_err) = appended {
            warn!(tx = ctx.id(), error = %append_err, "could not record failed transfer");
        }
    }
}
