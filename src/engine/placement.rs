//! Bet placement — validates a request, assigns it to the current period,
//! and debits the stake atomically with the bet insert.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::clock::{Clock, PeriodSchedule};
use crate::storage::{AccountStore, BetInsert, BetStore};
use crate::types::{Bet, OwnerId, Selection, WingoError};

/// Inbound bet as the outer surface hands it over.
#[derive(Debug, Clone, Deserialize)]
pub struct BetRequest {
    pub owner: OwnerId,
    pub selection: String,
    pub stake: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct BetLimits {
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    /// Bets are refused this many seconds (or fewer) before the boundary.
    pub lockout_secs: u32,
    /// Attempts when the balance moves between read and debit.
    pub retries: u32,
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min_stake: dec!(1),
            max_stake: dec!(100000),
            lockout_secs: 5,
            retries: 3,
        }
    }
}

impl BetRequest {
    pub fn validate(&self, limits: &BetLimits) -> Result<Selection, WingoError> {
        if self.owner.trim().is_empty() {
            return Err(WingoError::InvalidStake("missing owner".into()));
        }
        let selection: Selection = self.selection.parse()?;
        if self.stake <= Decimal::ZERO {
            return Err(WingoError::InvalidStake(format!(
                "stake must be positive, got {}",
                self.stake
            )));
        }
        if self.stake < limits.min_stake || self.stake > limits.max_stake {
            return Err(WingoError::InvalidStake(format!(
                "stake {} outside [{}, {}]",
                self.stake, limits.min_stake, limits.max_stake
            )));
        }
        Ok(selection)
    }
}

pub struct BetDesk {
    bets: Arc<dyn BetStore>,
    accounts: Arc<dyn AccountStore>,
    schedule: PeriodSchedule,
    clock: Arc<dyn Clock>,
    limits: BetLimits,
}

impl BetDesk {
    pub fn new(
        bets: Arc<dyn BetStore>,
        accounts: Arc<dyn AccountStore>,
        schedule: PeriodSchedule,
        clock: Arc<dyn Clock>,
        limits: BetLimits,
    ) -> Self {
        Self {
            bets,
            accounts,
            schedule,
            clock,
            limits,
        }
    }

    /// Accept a bet into the period current at the time of the call.
    pub async fn place(&self, req: &BetRequest) -> Result<Bet, WingoError> {
        let selection = req.validate(&self.limits)?;

        let now = self.clock.now();
        let period = self.schedule.period_at(now);
        let seconds_left = self.schedule.seconds_remaining(now);
        if seconds_left <= self.limits.lockout_secs {
            return Err(WingoError::PeriodClosing {
                period: period.id,
                seconds_left,
            });
        }

        let bet = Bet::new(&req.owner, &period.id, selection, req.stake, now);
        let attempts = self.limits.retries.max(1);
        for attempt in 1..=attempts {
            let prior = self.accounts.get_balance(&req.owner).await?;
            if prior < req.stake {
                return Err(WingoError::InsufficientBalance {
                    needed: req.stake,
                    available: prior,
                });
            }

            match self.bets.create(&bet, &period, prior).await? {
                BetInsert::Created => {
                    info!(
                        bet_id = %bet.id,
                        owner = %bet.owner,
                        period = %period.id,
                        selection = %bet.selection,
                        stake = %bet.stake,
                        balance = %(prior - bet.stake),
                        "Bet placed"
                    );
                    return Ok(bet);
                }
                BetInsert::InsufficientBalance { available } => {
                    return Err(WingoError::InsufficientBalance {
                        needed: req.stake,
                        available,
                    })
                }
                BetInsert::PeriodClosed => return Err(WingoError::PeriodClosed(period.id)),
                BetInsert::BalanceChanged { current } => {
                    debug!(owner = %req.owner, attempt, %prior, %current, "Balance moved during placement");
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(WingoError::BalanceConflict {
            owner: req.owner.clone(),
            attempts,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
