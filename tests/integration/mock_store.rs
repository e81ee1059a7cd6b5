//! Fault-injecting store for integration testing.
//!
//! Wraps a `MemoryStore` and fails chosen operations on demand, so tests
//! can stop a settlement at any step and check that the next attempt
//! finishes the job without paying anyone twice.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wingo::storage::memory::MemoryStore;
use wingo::storage::*;
use wingo::types::*;

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListPending,
    Transition,
    ApplyDelta,
    MarkSettled,
    InsertResult,
}

/// A store whose operations fail a configurable number of times.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    failures: Mutex<HashMap<Op, usize>>,
    credits: Mutex<Vec<(String, Decimal, String)>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            credits: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail(&self, op: Op, times: usize) {
        self.failures.lock().unwrap().insert(op, times);
    }

    /// Every successfully applied balance delta: (owner, delta, ledger key).
    pub fn applied_deltas(&self) -> Vec<(String, Decimal, String)> {
        self.credits.lock().unwrap().clone()
    }

    fn check(&self, op: Op) -> Result<()> {
        let mut failures = self.failures.lock().unwrap();
        if let Some(n) = failures.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                bail!("injected failure in {op:?}");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodStore for FaultyStore {
    async fn ensure_open(&self, period: &Period) -> Result<()> {
        self.inner.ensure_open(period).await
    }

    async fn claim(&self, period: &Period, claimant: &str, now: DateTime<Utc>, lease: Duration) -> Result<Claim> {
        self.inner.claim(period, claimant, now, lease).await
    }

    async fn mark_settled(&self, period_id: &str) -> Result<()> {
        self.check(Op::MarkSettled)?;
        self.inner.mark_settled(period_id).await
    }

    async fn status(&self, period_id: &str) -> Result<Option<PeriodStatus>> {
        self.inner.status(period_id).await
    }

    async fn unsettled_before(&self, before: DateTime<Utc>) -> Result<Vec<Period>> {
        self.inner.unsettled_before(before).await
    }
}

#[async_trait]
impl BetStore for FaultyStore {
    async fn create(&self, bet: &Bet, period: &Period, expected_prior: Decimal) -> Result<BetInsert> {
        self.inner.create(bet, period, expected_prior).await
    }

    async fn list_pending(&self, period_id: &str) -> Result<Vec<Bet>> {
        self.check(Op::ListPending)?;
        self.inner.list_pending(period_id).await
    }

    async fn list_won(&self, period_id: &str) -> Result<Vec<Bet>> {
        self.inner.list_won(period_id).await
    }

    async fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<Bet>> {
        self.inner.list_for_owner(owner, limit).await
    }

    async fn transition_status(
        &self,
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
        payout: Decimal,
    ) -> Result<Transition> {
        self.check(Op::Transition)?;
        self.inner.transition_status(bet_id, from, to, payout).await
    }
}

#[async_trait]
impl ResultStore for FaultyStore {
    async fn insert_once(&self, result: &RoundResult) -> Result<ResultInsert> {
        self.check(Op::InsertResult)?;
        self.inner.insert_once(result).await
    }

    async fn get(&self, period_id: &str) -> Result<Option<RoundResult>> {
        self.inner.get(period_id).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RoundResult>> {
        self.inner.recent(limit).await
    }
}

#[async_trait]
impl AccountStore for FaultyStore {
    async fn get_balance(&self, owner: &str) -> Result<Decimal> {
        self.inner.get_balance(owner).await
    }

    async fn apply_delta(
        &self,
        owner: &str,
        delta: Decimal,
        expected_prior: Decimal,
        reference: &LedgerRef,
    ) -> Result<DeltaApply> {
        self.check(Op::ApplyDelta)?;
        let outcome = self.inner.apply_delta(owner, delta, expected_prior, reference).await?;
        if let DeltaApply::Applied { .. } = outcome {
            self.credits
                .lock()
                .unwrap()
                .push((owner.to_string(), delta, reference.key()));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl AdminOverrideStore for FaultyStore {
    async fn peek(&self) -> Result<Option<Digit>> {
        self.inner.peek().await
    }

    async fn consume(&self) -> Result<Option<Digit>> {
        self.inner.consume().await
    }

    async fn set(&self, number: Digit) -> Result<()> {
        self.inner.set(number).await
    }
}

#[async_trait]
impl DepositStore for FaultyStore {
    async fn record_deposit(&self, record: &DepositRecord) -> Result<DepositInsert> {
        self.inner.record_deposit(record).await
    }

    async fn find_deposit(&self, utr: &str) -> Result<Option<DepositRecord>> {
        self.inner.find_deposit(utr).await
    }

    async fn pending_deposits(&self) -> Result<Vec<DepositRecord>> {
        self.inner.pending_deposits().await
    }

    async fn mark_deposit_approved(&self, utr: &str) -> Result<bool> {
        self.inner.mark_deposit_approved(utr).await
    }
}
