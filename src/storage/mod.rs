//! Persistence layer.
//!
//! The engine only ever talks to the store through the narrow traits in
//! this module. Expected alternatives (a lost compare-and-set, a duplicate
//! insert) come back as outcome enums; `Err` means the backend itself failed.
//!
//! Two backends are provided: [`memory::MemoryStore`] for tests and
//! ephemeral runs, and [`sqlite::SqliteStore`] for durable deployments.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::types::{
    Bet, BetId, BetStatus, DepositRecord, Digit, LedgerRef, Period, PeriodStatus, RoundResult,
};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of trying to claim a period for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Open (or unseen) period moved to Settling by this claimant.
    Claimed,
    /// Period was already Settling and is taken over: either this claimant's
    /// own earlier attempt or another claimant whose lease ran out.
    Resumed,
    /// Another claimant holds a live lease.
    Busy,
    AlreadySettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetInsert {
    Created,
    InsufficientBalance { available: Decimal },
    /// The balance moved since the caller read it.
    BalanceChanged { current: Decimal },
    /// The target period has been claimed for settlement.
    PeriodClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyTransitioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultInsert {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaApply {
    Applied { balance: Decimal },
    /// The balance differs from `expected_prior`; re-read and retry.
    Conflict { current: Decimal },
    /// This ledger reference was applied before.
    Duplicate,
    /// The delta would take the balance below zero.
    Overdraw { current: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositInsert {
    Recorded,
    /// A claim with this UTR is already on file.
    AlreadyRecorded,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PeriodStore: Send + Sync {
    /// Record the period as Open if it has never been seen.
    async fn ensure_open(&self, period: &Period) -> Result<()>;

    /// Atomically move the period to Settling on behalf of `claimant`.
    ///
    /// A Settling period may be re-claimed by the same claimant, or by any
    /// claimant once `lease` has elapsed since the last claim.
    async fn claim(
        &self,
        period: &Period,
        claimant: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Claim>;

    /// Settling → Settled.
    async fn mark_settled(&self, period_id: &str) -> Result<()>;

    async fn status(&self, period_id: &str) -> Result<Option<PeriodStatus>>;

    /// Periods that started before `before` and never reached Settled.
    async fn unsettled_before(&self, before: DateTime<Utc>) -> Result<Vec<Period>>;
}

#[async_trait]
pub trait BetStore: Send + Sync {
    /// Debit the stake and insert the bet in one atomic step.
    ///
    /// The debit is conditioned on the owner's balance still equalling
    /// `expected_prior`, and the insert on `period` still being Open.
    async fn create(&self, bet: &Bet, period: &Period, expected_prior: Decimal) -> Result<BetInsert>;

    async fn list_pending(&self, period_id: &str) -> Result<Vec<Bet>>;

    /// Won bets of the period, used to re-drive payout credits.
    async fn list_won(&self, period_id: &str) -> Result<Vec<Bet>>;

    async fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<Bet>>;

    /// Compare-and-set on status: applies only while the bet is in `from`.
    async fn transition_status(
        &self,
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
        payout: Decimal,
    ) -> Result<Transition>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_once(&self, result: &RoundResult) -> Result<ResultInsert>;

    async fn get(&self, period_id: &str) -> Result<Option<RoundResult>>;

    /// Most recent results, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<RoundResult>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Unknown owners read as zero.
    async fn get_balance(&self, owner: &str) -> Result<Decimal>;

    /// Apply `delta` if the balance still equals `expected_prior` and
    /// `reference` has not been applied before.
    async fn apply_delta(
        &self,
        owner: &str,
        delta: Decimal,
        expected_prior: Decimal,
        reference: &LedgerRef,
    ) -> Result<DeltaApply>;
}

#[async_trait]
pub trait AdminOverrideStore: Send + Sync {
    async fn peek(&self) -> Result<Option<Digit>>;

    /// Read and clear in one step.
    async fn consume(&self) -> Result<Option<Digit>>;

    async fn set(&self, number: Digit) -> Result<()>;
}

/// Deposit claims awaiting or past review.
#[async_trait]
pub trait DepositStore: Send + Sync {
    /// Insert the claim unless its UTR is already on file.
    async fn record_deposit(&self, record: &DepositRecord) -> Result<DepositInsert>;

    async fn find_deposit(&self, utr: &str) -> Result<Option<DepositRecord>>;

    /// Pending claims, oldest first.
    async fn pending_deposits(&self) -> Result<Vec<DepositRecord>>;

    /// Pending → Approved. Returns false if the claim was not pending.
    async fn mark_deposit_approved(&self, utr: &str) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Handles to every store the engine needs.
#[derive(Clone)]
pub struct Stores {
    pub periods: Arc<dyn PeriodStore>,
    pub bets: Arc<dyn BetStore>,
    pub results: Arc<dyn ResultStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub overrides: Arc<dyn AdminOverrideStore>,
    pub deposits: Arc<dyn DepositStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: PeriodStore
            + BetStore
            + ResultStore
            + AccountStore
            + AdminOverrideStore
            + DepositStore
            + 'static,
    {
        Self {
            periods: backend.clone(),
            bets: backend.clone(),
            results: backend.clone(),
            accounts: backend.clone(),
            overrides: backend.clone(),
            deposits: backend,
        }
    }
}
