//! In-memory store.
//!
//! Implements every store trait over a single mutex-guarded state so each
//! trait call is atomic, the same guarantee a database transaction gives.
//! Callers still go through the compare-and-set contracts; the mutex is
//! never held across an await.
//!
//! Failure injection hooks let tests exercise conflict and outage paths.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    AccountStore, AdminOverrideStore, BetInsert, BetStore, Claim, DeltaApply, DepositInsert,
    DepositStore, PeriodStore, ResultInsert, ResultStore, Transition,
};
use crate::types::{
    Bet, BetId, BetStatus, DepositRecord, DepositStatus, Digit, LedgerRef, Period, PeriodStatus,
    RoundResult,
};

struct PeriodRow {
    period: Period,
    status: PeriodStatus,
    claimant: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    periods: HashMap<String, PeriodRow>,
    bets: Vec<Bet>,
    results: HashMap<String, RoundResult>,
    balances: HashMap<String, Decimal>,
    ledger: HashSet<String>,
    forced: Option<Digit>,
    deposits: Vec<DepositRecord>,
    // failure injection
    forced_conflicts: usize,
    results_unavailable: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Seed or overwrite an owner's balance.
    pub fn set_balance(&self, owner: &str, balance: Decimal) -> Result<()> {
        self.lock()?.balances.insert(owner.to_string(), balance);
        Ok(())
    }

    /// Make the next `n` balance updates report a conflict.
    pub fn force_conflicts(&self, n: usize) -> Result<()> {
        self.lock()?.forced_conflicts = n;
        Ok(())
    }

    /// Make result insertion fail as if the backend were down.
    pub fn set_results_unavailable(&self, unavailable: bool) -> Result<()> {
        self.lock()?.results_unavailable = unavailable;
        Ok(())
    }

    /// Snapshot of every bet, in placement order.
    pub fn all_bets(&self) -> Result<Vec<Bet>> {
        Ok(self.lock()?.bets.clone())
    }
}

fn open_row(period: &Period) -> PeriodRow {
    PeriodRow {
        period: period.clone(),
        status: PeriodStatus::Open,
        claimant: None,
        claimed_at: None,
    }
}

#[async_trait]
impl PeriodStore for MemoryStore {
    async fn ensure_open(&self, period: &Period) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .periods
            .entry(period.id.clone())
            .or_insert_with(|| open_row(period));
        Ok(())
    }

    async fn claim(
        &self,
        period: &Period,
        claimant: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Claim> {
        let mut inner = self.lock()?;
        let row = inner
            .periods
            .entry(period.id.clone())
            .or_insert_with(|| open_row(period));

        let outcome = match row.status {
            PeriodStatus::Settled => return Ok(Claim::AlreadySettled),
            PeriodStatus::Open => Claim::Claimed,
            PeriodStatus::Settling => {
                let own = row.claimant.as_deref() == Some(claimant);
                let expired = row.claimed_at.map_or(true, |at| at + lease <= now);
                if !own && !expired {
                    return Ok(Claim::Busy);
                }
                Claim::Resumed
            }
        };

        row.status = PeriodStatus::Settling;
        row.claimant = Some(claimant.to_string());
        row.claimed_at = Some(now);
        Ok(outcome)
    }

    async fn mark_settled(&self, period_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.periods.get_mut(period_id) {
            Some(row) if row.status != PeriodStatus::Open => {
                row.status = PeriodStatus::Settled;
                Ok(())
            }
            Some(_) => bail!("period {period_id} was never claimed"),
            None => bail!("period {period_id} not found"),
        }
    }

    async fn status(&self, period_id: &str) -> Result<Option<PeriodStatus>> {
        Ok(self.lock()?.periods.get(period_id).map(|r| r.status))
    }

    async fn unsettled_before(&self, before: DateTime<Utc>) -> Result<Vec<Period>> {
        let inner = self.lock()?;
        let mut out: Vec<Period> = inner
            .periods
            .values()
            .filter(|r| r.status != PeriodStatus::Settled && r.period.start < before)
            .map(|r| r.period.clone())
            .collect();
        out.sort_by_key(|p| p.start);
        Ok(out)
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn create(&self, bet: &Bet, period: &Period, expected_prior: Decimal) -> Result<BetInsert> {
        let mut inner = self.lock()?;

        let status = inner
            .periods
            .entry(period.id.clone())
            .or_insert_with(|| open_row(period))
            .status;
        if status != PeriodStatus::Open {
            return Ok(BetInsert::PeriodClosed);
        }

        let current = inner.balances.get(&bet.owner).copied().unwrap_or(Decimal::ZERO);
        if current != expected_prior {
            return Ok(BetInsert::BalanceChanged { current });
        }
        if current < bet.stake {
            return Ok(BetInsert::InsufficientBalance { available: current });
        }

        let key = LedgerRef::Stake(bet.id).key();
        if !inner.ledger.insert(key) {
            bail!("bet {} already placed", bet.id);
        }
        inner.balances.insert(bet.owner.clone(), current - bet.stake);
        inner.bets.push(bet.clone());
        Ok(BetInsert::Created)
    }

    async fn list_pending(&self, period_id: &str) -> Result<Vec<Bet>> {
        Ok(self
            .lock()?
            .bets
            .iter()
            .filter(|b| b.period == period_id && b.status == BetStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_won(&self, period_id: &str) -> Result<Vec<Bet>> {
        Ok(self
            .lock()?
            .bets
            .iter()
            .filter(|b| b.period == period_id && b.status == BetStatus::Won)
            .cloned()
            .collect())
    }

    async fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<Bet>> {
        Ok(self
            .lock()?
            .bets
            .iter()
            .rev()
            .filter(|b| b.owner == owner)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
        payout: Decimal,
    ) -> Result<Transition> {
        let mut inner = self.lock()?;
        let bet = inner
            .bets
            .iter_mut()
            .find(|b| b.id == bet_id)
            .ok_or_else(|| anyhow!("bet {bet_id} not found"))?;
        if bet.status != from {
            return Ok(Transition::AlreadyTransitioned);
        }
        bet.status = to;
        bet.payout = payout;
        Ok(Transition::Applied)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_once(&self, result: &RoundResult) -> Result<ResultInsert> {
        let mut inner = self.lock()?;
        if inner.results_unavailable {
            bail!("result store unavailable");
        }
        if inner.results.contains_key(&result.period) {
            return Ok(ResultInsert::AlreadyExists);
        }
        inner.results.insert(result.period.clone(), result.clone());
        Ok(ResultInsert::Inserted)
    }

    async fn get(&self, period_id: &str) -> Result<Option<RoundResult>> {
        Ok(self.lock()?.results.get(period_id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RoundResult>> {
        let inner = self.lock()?;
        let mut all: Vec<RoundResult> = inner.results.values().cloned().collect();
        all.sort_by(|a, b| b.drawn_at.cmp(&a.drawn_at).then_with(|| b.period.cmp(&a.period)));
        all.truncate(limit);
        Ok(all)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_balance(&self, owner: &str) -> Result<Decimal> {
        Ok(self.lock()?.balances.get(owner).copied().unwrap_or(Decimal::ZERO))
    }

    async fn apply_delta(
        &self,
        owner: &str,
        delta: Decimal,
        expected_prior: Decimal,
        reference: &LedgerRef,
    ) -> Result<DeltaApply> {
        let mut inner = self.lock()?;
        let key = reference.key();
        if inner.ledger.contains(&key) {
            return Ok(DeltaApply::Duplicate);
        }

        let current = inner.balances.get(owner).copied().unwrap_or(Decimal::ZERO);
        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Ok(DeltaApply::Conflict { current });
        }
        if current != expected_prior {
            return Ok(DeltaApply::Conflict { current });
        }
        let balance = current + delta;
        if balance < Decimal::ZERO {
            return Ok(DeltaApply::Overdraw { current });
        }

        inner.ledger.insert(key);
        inner.balances.insert(owner.to_string(), balance);
        Ok(DeltaApply::Applied { balance })
    }
}

#[async_trait]
impl AdminOverrideStore for MemoryStore {
    async fn peek(&self) -> Result<Option<Digit>> {
        Ok(self.lock()?.forced)
    }

    async fn consume(&self) -> Result<Option<Digit>> {
        Ok(self.lock()?.forced.take())
    }

    async fn set(&self, number: Digit) -> Result<()> {
        self.lock()?.forced = Some(number);
        Ok(())
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn record_deposit(&self, record: &DepositRecord) -> Result<DepositInsert> {
        let mut inner = self.lock()?;
        if inner.deposits.iter().any(|d| d.utr == record.utr) {
            return Ok(DepositInsert::AlreadyRecorded);
        }
        inner.deposits.push(record.clone());
        Ok(DepositInsert::Recorded)
    }

    async fn find_deposit(&self, utr: &str) -> Result<Option<DepositRecord>> {
        Ok(self.lock()?.deposits.iter().find(|d| d.utr == utr).cloned())
    }

    async fn pending_deposits(&self) -> Result<Vec<DepositRecord>> {
        Ok(self
            .lock()?
            .deposits
            .iter()
            .filter(|d| d.status == DepositStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark_deposit_approved(&self, utr: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.deposits.iter_mut().find(|d| d.utr == utr) {
            Some(d) if d.status == DepositStatus::Pending => {
                d.status = DepositStatus::Approved;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => bail!("no deposit with UTR {utr}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
