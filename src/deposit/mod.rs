//! Deposit intake.
//!
//! A deposit claim (UTR, amount, payment screenshot) is recorded and then
//! checked by an external [`PaymentVerifier`]. A confirmed match is credited
//! at once; any other answer, an error, or a timeout leaves the claim
//! pending in the review queue until an operator approves it. Failure never
//! approves. Credits are keyed by UTR in the ledger, so a replayed claim is
//! not credited twice.

pub mod http;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::ledger::{apply_with_retry, Credit, RetryPolicy};
use crate::engine::Clock;
use crate::storage::{AccountStore, DepositInsert, DepositStore};
use crate::types::{DepositRecord, DepositStatus, LedgerRef, OwnerId, WingoError};

pub use http::HttpVerifier;

/// Length of a bank transfer reference (UTR).
const UTR_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositClaim {
    pub owner: OwnerId,
    pub amount: Decimal,
    pub utr: String,
    /// Raw bytes of the payment proof image.
    #[serde(skip)]
    pub proof: Vec<u8>,
    pub mime_type: String,
}

impl DepositClaim {
    pub fn validate(&self) -> Result<(), WingoError> {
        if self.owner.trim().is_empty() {
            return Err(WingoError::InvalidDeposit("missing owner".into()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(WingoError::InvalidDeposit(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.utr.len() != UTR_LEN || !self.utr.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WingoError::InvalidDeposit(format!(
                "UTR must be {UTR_LEN} digits, got '{}'",
                self.utr
            )));
        }
        if self.proof.is_empty() {
            return Err(WingoError::InvalidDeposit("missing payment proof".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    NoMatch,
}

/// Checks a payment proof against the claimed UTR and amount.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, claim: &DepositClaim) -> anyhow::Result<Verdict>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepositDecision {
    Approved { balance: Decimal },
    /// This UTR was credited before.
    AlreadyCredited,
    ManualReview { reason: String },
}

pub struct DepositDesk {
    verifier: Option<Arc<dyn PaymentVerifier>>,
    deposits: Arc<dyn DepositStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl DepositDesk {
    /// With no verifier every claim goes to manual review.
    pub fn new(
        verifier: Option<Arc<dyn PaymentVerifier>>,
        deposits: Arc<dyn DepositStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            verifier,
            deposits,
            accounts,
            clock,
            timeout,
            retry,
        }
    }

    pub async fn submit(&self, claim: &DepositClaim) -> Result<DepositDecision, WingoError> {
        claim.validate()?;
        if let Some(existing) = self.deposits.find_deposit(&claim.utr).await? {
            return Ok(resubmitted(&existing));
        }

        let note = match &self.verifier {
            None => Some("automatic verification disabled".to_string()),
            Some(verifier) => match tokio::time::timeout(self.timeout, verifier.verify(claim)).await {
                Ok(Ok(Verdict::Match)) => None,
                Ok(Ok(Verdict::NoMatch)) => Some("proof did not match claim".to_string()),
                Ok(Err(e)) => {
                    warn!(utr = %claim.utr, error = %e, "Payment verifier failed");
                    Some(format!("verifier error: {e}"))
                }
                Err(_) => {
                    warn!(utr = %claim.utr, timeout_ms = self.timeout.as_millis() as u64, "Payment verifier timed out");
                    Some("verifier timed out".to_string())
                }
            },
        };

        // Recorded as pending before any credit, so a failed credit stays queued.
        let record = DepositRecord {
            utr: claim.utr.clone(),
            owner: claim.owner.clone(),
            amount: claim.amount,
            proof: claim.proof.clone(),
            mime_type: claim.mime_type.clone(),
            status: DepositStatus::Pending,
            note: note.clone(),
            submitted_at: self.clock.now(),
        };
        if self.deposits.record_deposit(&record).await? == DepositInsert::AlreadyRecorded {
            return match self.deposits.find_deposit(&claim.utr).await? {
                Some(existing) => Ok(resubmitted(&existing)),
                None => Err(WingoError::UnknownDeposit(claim.utr.clone())),
            };
        }

        match note {
            Some(reason) => {
                info!(owner = %claim.owner, utr = %claim.utr, amount = %claim.amount, %reason, "Deposit queued for manual review");
                Ok(DepositDecision::ManualReview { reason })
            }
            None => match self.credit(&record).await {
                Ok(decision) => Ok(decision),
                Err(e) => {
                    error!(utr = %claim.utr, error = %e, "Verified deposit could not be credited, left for review");
                    Ok(DepositDecision::ManualReview {
                        reason: format!("credit failed: {e}"),
                    })
                }
            },
        }
    }

    /// Claims waiting for an operator, oldest first.
    pub async fn pending(&self) -> Result<Vec<DepositRecord>, WingoError> {
        Ok(self.deposits.pending_deposits().await?)
    }

    /// Credit a queued claim an operator approved after manual review.
    pub async fn approve(&self, utr: &str) -> Result<DepositDecision, WingoError> {
        let record = self
            .deposits
            .find_deposit(utr)
            .await?
            .ok_or_else(|| WingoError::UnknownDeposit(utr.to_string()))?;
        if record.status == DepositStatus::Approved {
            return Ok(DepositDecision::AlreadyCredited);
        }
        info!(owner = %record.owner, utr, "Deposit approved by operator");
        self.credit(&record).await
    }

    async fn credit(&self, record: &DepositRecord) -> Result<DepositDecision, WingoError> {
        let reference = LedgerRef::Deposit(record.utr.clone());
        let credit =
            apply_with_retry(self.accounts.as_ref(), &record.owner, record.amount, &reference, self.retry)
                .await?;
        self.deposits.mark_deposit_approved(&record.utr).await?;

        match credit {
            Credit::Applied { balance } => {
                info!(owner = %record.owner, utr = %record.utr, amount = %record.amount, %balance, "Deposit credited");
                Ok(DepositDecision::Approved { balance })
            }
            Credit::AlreadyApplied => {
                warn!(owner = %record.owner, utr = %record.utr, "Deposit UTR already credited");
                Ok(DepositDecision::AlreadyCredited)
            }
        }
    }
}

fn resubmitted(existing: &DepositRecord) -> DepositDecision {
    warn!(utr = %existing.utr, status = %existing.status, "Deposit UTR submitted again");
    match existing.status {
        DepositStatus::Approved => DepositDecision::AlreadyCredited,
        DepositStatus::Pending => DepositDecision::ManualReview {
            reason: existing
                .note
                .clone()
                .unwrap_or_else(|| "awaiting credit".to_string()),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
