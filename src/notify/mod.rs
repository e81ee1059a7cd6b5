//! Observers of settled rounds.
//!
//! Delivery is best effort: the engine logs a failed notification and moves
//! on, it never rolls back a settlement because an observer was unreachable.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::types::{BetOutcome, BetStatus, RoundResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A period's result is final.
    async fn announce(&self, result: &RoundResult) -> Result<()>;

    /// One of the owner's bets has been resolved.
    async fn notify_user(&self, outcome: &BetOutcome) -> Result<()>;
}

/// Writes every event to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn announce(&self, result: &RoundResult) -> Result<()> {
        info!(
            period = %result.period,
            number = %result.number,
            size = %result.size,
            colors = ?result.colors,
            "Round result"
        );
        Ok(())
    }

    async fn notify_user(&self, outcome: &BetOutcome) -> Result<()> {
        let verdict = match outcome.status {
            BetStatus::Won => "WIN",
            _ => "LOSS",
        };
        info!(
            owner = %outcome.owner,
            period = %outcome.period,
            selection = %outcome.selection,
            winning = %outcome.winning_number,
            amount = %outcome.headline_amount(),
            verdict,
            "Bet resolved"
        );
        Ok(())
    }
}

/// Event pushed to in-process subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    RoundSettled(RoundResult),
    BetSettled(BetOutcome),
}

/// Fans events out over a `tokio::sync::broadcast` channel. Clones share the channel.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<GameEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: GameEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn announce(&self, result: &RoundResult) -> Result<()> {
        self.publish(GameEvent::RoundSettled(result.clone()));
        Ok(())
    }

    async fn notify_user(&self, outcome: &BetOutcome) -> Result<()> {
        self.publish(GameEvent::BetSettled(outcome.clone()));
        Ok(())
    }
}

/// Delivers to every inner notifier; the first failure is reported after all ran.
pub struct FanoutNotifier {
    targets: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Box<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn announce(&self, result: &RoundResult) -> Result<()> {
        let outcomes = futures::future::join_all(self.targets.iter().map(|t| t.announce(result))).await;
        outcomes.into_iter().collect::<Result<Vec<_>>>().map(|_| ())
    }

    async fn notify_user(&self, outcome: &BetOutcome) -> Result<()> {
        let outcomes =
            futures::future::join_all(self.targets.iter().map(|t| t.notify_user(outcome))).await;
        outcomes.into_iter().collect::<Result<Vec<_>>>().map(|_| ())
    }
}
