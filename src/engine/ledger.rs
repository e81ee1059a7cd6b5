//! Optimistic balance updates.
//!
//! Read the balance, apply the delta conditioned on it being unchanged,
//! retry with a fresh read on conflict. The retry budget is bounded and
//! running out of it is an error the caller must surface.

use std::time::Duration;
use tracing::{debug, warn};

use crate::storage::{AccountStore, DeltaApply};
use crate::types::{LedgerRef, WingoError};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Linear backoff: attempt `n` waits `n × backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credit {
    Applied { balance: Decimal },
    /// The ledger already holds this reference; nothing moved.
    AlreadyApplied,
}

pub async fn apply_with_retry(
    accounts: &dyn AccountStore,
    owner: &str,
    delta: Decimal,
    reference: &LedgerRef,
    policy: RetryPolicy,
) -> Result<Credit, WingoError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        let prior = accounts.get_balance(owner).await?;
        match accounts.apply_delta(owner, delta, prior, reference).await? {
            DeltaApply::Applied { balance } => return Ok(Credit::Applied { balance }),
            DeltaApply::Duplicate => return Ok(Credit::AlreadyApplied),
            DeltaApply::Overdraw { current } => {
                return Err(WingoError::InsufficientBalance {
                    needed: -delta,
                    available: current,
                })
            }
            DeltaApply::Conflict { current } => {
                debug!(owner, %reference, attempt, %prior, %current, "Balance moved, retrying");
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff * attempt).await;
                }
            }
        }
    }

    warn!(owner, %reference, attempts, "Balance update gave up after repeated conflicts");
    Err(WingoError::BalanceConflict {
        owner: owner.to_string(),
        attempts,
    })
}
