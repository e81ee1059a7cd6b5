//! Wiring — builds every game component from an [`AppConfig`] and a set
//! of stores.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dashboard::{AppState, DashboardState};
use crate::deposit::{DepositDesk, HttpVerifier, PaymentVerifier};
use crate::engine::{
    force_outcome, BetDesk, Clock, PeriodClock, PeriodSchedule, SettlementConfig, SettlementEngine,
};
use crate::game::OutcomeSelector;
use crate::notify::{BroadcastNotifier, FanoutNotifier, LogNotifier, Notifier};
use crate::storage::Stores;
use crate::types::{Digit, WingoError};

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_BUFFER: usize = 256;

pub struct Wingo {
    pub bets: BetDesk,
    pub deposits: DepositDesk,
    pub settlement: Arc<SettlementEngine>,
    pub events: BroadcastNotifier,
    stores: Stores,
    schedule: PeriodSchedule,
    clock: Arc<dyn Clock>,
    config: AppConfig,
}

impl Wingo {
    pub fn build(config: AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let schedule = PeriodSchedule::new(config.game.period_secs)?;

        let events = BroadcastNotifier::new(EVENT_BUFFER);
        let notifier: Arc<dyn Notifier> = Arc::new(FanoutNotifier::new(vec![
            Box::new(LogNotifier),
            Box::new(events.clone()),
        ]));

        let settlement = Arc::new(SettlementEngine::new(
            stores.clone(),
            notifier,
            OutcomeSelector::new(config.game.empty_book),
            clock.clone(),
            SettlementConfig {
                claimant: format!("settler-{}", Uuid::new_v4()),
                claim_lease: config.settlement.claim_lease(),
                credit_retry: config.settlement.credit_retry(),
            },
        ));

        let bets = BetDesk::new(
            stores.bets.clone(),
            stores.accounts.clone(),
            schedule,
            clock.clone(),
            config.game.bet_limits(config.settlement.placement_retries),
        );

        let verifier: Option<Arc<dyn PaymentVerifier>> = if config.verifier.enabled {
            info!(endpoint = %config.verifier.endpoint, "Deposit verification enabled");
            Some(Arc::new(HttpVerifier::from_config(&config.verifier)?))
        } else {
            None
        };
        let deposits = DepositDesk::new(
            verifier,
            stores.deposits.clone(),
            stores.accounts.clone(),
            clock.clone(),
            Duration::from_secs(config.verifier.timeout_secs),
            config.settlement.credit_retry(),
        );

        Ok(Self {
            bets,
            deposits,
            settlement,
            events,
            stores,
            schedule,
            clock,
            config,
        })
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn schedule(&self) -> PeriodSchedule {
        self.schedule
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.config.game.tick_millis)
    }

    pub async fn force_outcome(&self, number: u8) -> Result<Digit, WingoError> {
        force_outcome(self.stores.overrides.as_ref(), number).await
    }

    pub fn period_clock(&self) -> PeriodClock {
        PeriodClock::new(self.schedule, self.clock.clone())
    }

    pub fn dashboard_state(&self) -> AppState {
        Arc::new(DashboardState {
            clock: self.clock.clone(),
            schedule: self.schedule,
            lockout_secs: self.config.game.lockout_secs,
            results: self.stores.results.clone(),
            bets: self.stores.bets.clone(),
            accounts: self.stores.accounts.clone(),
            history_limit: self.config.game.history_limit,
        })
    }
}
