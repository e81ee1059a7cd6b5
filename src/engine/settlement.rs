//! Settlement engine — resolves a closed period exactly once.
//!
//! 1. Claim the period (Open → Settling). Losing the claim is a no-op.
//! 2. Snapshot the pending bets. The claim closes the period to new bets.
//! 3. Draw the winning number (override or minimum liability), classify it,
//!    and persist the result under the per-period uniqueness constraint.
//! 4. Move each snapshotted bet Pending → Won/Lost with a compare-and-set.
//! 5. Credit every Won bet of the period. Credits are keyed by bet id in the
//!    ledger, so a resumed run re-drives missing credits without paying twice.
//! 6. Settling → Settled, then tell observers.
//!
//! Any failure before step 6 leaves the period Settling; the next attempt
//! (same claimant, or anyone after the lease) resumes from step 1.

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::ledger::{apply_with_retry, Credit, RetryPolicy};
use crate::game::{classify, payout_multiplier, OutcomeSelector};
use crate::notify::Notifier;
use crate::storage::{Claim, ResultInsert, Stores, Transition};
use crate::types::{Bet, BetOutcome, BetStatus, Digit, LedgerRef, Period, RoundResult, WingoError};

// ---------------------------------------------------------------------------
// Configuration & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Identifies this engine instance in period claims.
    pub claimant: String,
    /// How long a Settling claim protects against takeover.
    pub claim_lease: Duration,
    pub credit_retry: RetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            claimant: format!("settler-{}", Uuid::new_v4()),
            claim_lease: Duration::seconds(30),
            credit_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// This call ran the settlement to completion.
    Settled,
    /// The period was already Settled; nothing happened.
    AlreadySettled,
    /// Another instance holds a live claim; nothing happened.
    Busy,
}

#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub period: String,
    pub disposition: Disposition,
    /// True when this run took over an earlier, unfinished settlement.
    pub resumed: bool,
    pub result: Option<RoundResult>,
    pub bets_resolved: usize,
    pub bets_won: usize,
    pub bets_lost: usize,
    pub total_staked: Decimal,
    /// Sum of credits applied by this run.
    pub total_paid: Decimal,
}

impl SettlementReport {
    fn skipped(period: &Period, disposition: Disposition) -> Self {
        Self {
            period: period.id.clone(),
            disposition,
            resumed: false,
            result: None,
            bets_resolved: 0,
            bets_won: 0,
            bets_lost: 0,
            total_staked: Decimal::ZERO,
            total_paid: Decimal::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    stores: Stores,
    notifier: Arc<dyn Notifier>,
    selector: OutcomeSelector,
    clock: Arc<dyn Clock>,
    config: SettlementConfig,
}

impl SettlementEngine {
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        selector: OutcomeSelector,
        clock: Arc<dyn Clock>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            stores,
            notifier,
            selector,
            clock,
            config,
        }
    }

    pub fn claimant(&self) -> &str {
        &self.config.claimant
    }

    /// Settle `period`. Idempotent: settled periods return `AlreadySettled`.
    pub async fn settle_period(&self, period: &Period) -> Result<SettlementReport, WingoError> {
        let now = self.clock.now();
        let claim = self
            .stores
            .periods
            .claim(period, &self.config.claimant, now, self.config.claim_lease)
            .await?;

        let resumed = match claim {
            Claim::AlreadySettled => {
                return Ok(SettlementReport::skipped(period, Disposition::AlreadySettled))
            }
            Claim::Busy => return Ok(SettlementReport::skipped(period, Disposition::Busy)),
            Claim::Claimed => false,
            Claim::Resumed => {
                warn!(period = %period.id, claimant = %self.config.claimant, "Resuming unfinished settlement");
                true
            }
        };

        let snapshot = self.stores.bets.list_pending(&period.id).await?;
        let result = match self.stores.results.get(&period.id).await? {
            Some(existing) => existing,
            None => self.draw(period, &snapshot).await?,
        };

        let mut report = SettlementReport {
            resumed,
            result: Some(result.clone()),
            ..SettlementReport::skipped(period, Disposition::Settled)
        };

        let mut outcomes = Vec::with_capacity(snapshot.len());
        for bet in &snapshot {
            let multiplier = payout_multiplier(&bet.selection, result.number);
            let (status, payout) = if multiplier > Decimal::ZERO {
                (BetStatus::Won, bet.stake * multiplier)
            } else {
                (BetStatus::Lost, Decimal::ZERO)
            };

            match self
                .stores
                .bets
                .transition_status(bet.id, BetStatus::Pending, status, payout)
                .await?
            {
                Transition::Applied => {}
                // Someone else resolved it; its own run reports it.
                Transition::AlreadyTransitioned => continue,
            }

            report.bets_resolved += 1;
            report.total_staked += bet.stake;
            match status {
                BetStatus::Won => report.bets_won += 1,
                _ => report.bets_lost += 1,
            }
            outcomes.push(outcome_for(bet, &result, status, payout));
        }

        // All Won bets, not only this run's: a previous attempt may have died
        // between transition and credit.
        let winners = self.stores.bets.list_won(&period.id).await?;
        let mut unpaid = 0usize;
        for bet in &winners {
            match self.credit(bet).await {
                Ok(Credit::Applied { .. }) => report.total_paid += bet.payout,
                Ok(Credit::AlreadyApplied) => {}
                Err(e) => {
                    error!(
                        period = %period.id,
                        bet_id = %bet.id,
                        owner = %bet.owner,
                        payout = %bet.payout,
                        error = %e,
                        "Payout credit failed; reconciliation required"
                    );
                    unpaid += 1;
                }
            }
        }
        if unpaid > 0 {
            return Err(WingoError::Reconciliation {
                period: period.id.clone(),
                unpaid,
            });
        }

        self.stores.periods.mark_settled(&period.id).await?;

        info!(
            period = %period.id,
            number = %result.number,
            resolved = report.bets_resolved,
            won = report.bets_won,
            lost = report.bets_lost,
            staked = %report.total_staked,
            paid = %report.total_paid,
            resumed,
            "Period settled"
        );

        self.publish(&result, &outcomes).await;
        Ok(report)
    }

    /// Pick, classify, and persist the result for a period with none yet.
    async fn draw(&self, period: &Period, snapshot: &[Bet]) -> Result<RoundResult, WingoError> {
        let forced = self.stores.overrides.consume().await?;
        let selected = self.selector.select(snapshot, forced);
        let class = classify(selected.number);
        let result = RoundResult {
            period: period.id.clone(),
            number: selected.number,
            colors: class.colors,
            size: class.size,
            drawn_at: self.clock.now(),
        };

        match self.stores.results.insert_once(&result).await {
            Ok(ResultInsert::Inserted) => {
                info!(
                    period = %period.id,
                    number = %result.number,
                    source = ?selected.source,
                    liability = %selected.liability,
                    bets = snapshot.len(),
                    "Result drawn"
                );
                Ok(result)
            }
            Ok(ResultInsert::AlreadyExists) => {
                self.restore_override(forced).await;
                let existing = self.stores.results.get(&period.id).await?;
                existing.ok_or_else(|| {
                    WingoError::Store(anyhow::anyhow!(
                        "result for {} reported present but not found",
                        period.id
                    ))
                })
            }
            Err(e) => {
                self.restore_override(forced).await;
                Err(e.into())
            }
        }
    }

    /// Put back an override that was consumed but did not produce a result,
    /// unless a newer one has been set meanwhile.
    async fn restore_override(&self, forced: Option<Digit>) {
        let Some(number) = forced else { return };
        match self.stores.overrides.peek().await {
            Ok(None) => {
                if let Err(e) = self.stores.overrides.set(number).await {
                    warn!(number = %number, error = %e, "Failed to restore forced outcome");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => warn!(number = %number, error = %e, "Failed to restore forced outcome"),
        }
    }

    async fn credit(&self, bet: &Bet) -> Result<Credit, WingoError> {
        apply_with_retry(
            self.stores.accounts.as_ref(),
            &bet.owner,
            bet.payout,
            &LedgerRef::Payout(bet.id),
            self.config.credit_retry,
        )
        .await
    }

    async fn publish(&self, result: &RoundResult, outcomes: &[BetOutcome]) {
        if let Err(e) = self.notifier.announce(result).await {
            warn!(period = %result.period, error = %e, "Result announcement failed");
        }
        for outcome in outcomes {
            if let Err(e) = self.notifier.notify_user(outcome).await {
                warn!(owner = %outcome.owner, bet_id = %outcome.bet_id, error = %e, "User notification failed");
            }
        }
    }
}

fn outcome_for(bet: &Bet, result: &RoundResult, status: BetStatus, payout: Decimal) -> BetOutcome {
    BetOutcome {
        bet_id: bet.id,
        owner: bet.owner.clone(),
        period: bet.period.clone(),
        selection: bet.selection,
        winning_number: result.number,
        status,
        stake: bet.stake,
        payout,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
