//! Period clock — time source, period schedule, and boundary detection.
//!
//! Period ids are `YYYYMMDD` + `100` + the unpadded bucket index within the
//! UTC day, e.g. `20261016100645` for the 645th one-minute bucket. This is
//! the layout existing clients already compute. Every instance derives the
//! same id from the same instant, so independent clocks agree on where a
//! period starts and ends.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::settlement::{Disposition, SettlementEngine};
use crate::storage::PeriodStore;
use crate::types::Period;

const SECONDS_PER_DAY: u32 = 86_400;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now". Injected so boundary logic can be driven in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Fixed-width periods aligned to UTC midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodSchedule {
    period_secs: u32,
}

impl PeriodSchedule {
    /// `period_secs` must divide a day evenly so buckets never straddle midnight.
    pub fn new(period_secs: u32) -> Result<Self> {
        if period_secs == 0 || SECONDS_PER_DAY % period_secs != 0 {
            bail!("period length {period_secs}s does not divide a day");
        }
        Ok(Self { period_secs })
    }

    pub fn period_secs(&self) -> u32 {
        self.period_secs
    }

    pub fn period_at(&self, t: DateTime<Utc>) -> Period {
        let day = t.date_naive();
        let bucket = t.num_seconds_from_midnight() / self.period_secs;
        let midnight = day.and_time(NaiveTime::MIN).and_utc();
        let start = midnight + Duration::seconds(i64::from(bucket * self.period_secs));
        Period {
            id: format!("{}100{}", day.format("%Y%m%d"), bucket),
            start,
            end: start + Duration::seconds(i64::from(self.period_secs)),
        }
    }

    /// Whole seconds until the period containing `t` closes (at least 1).
    pub fn seconds_remaining(&self, t: DateTime<Utc>) -> u32 {
        self.period_secs - t.num_seconds_from_midnight() % self.period_secs
    }
}

// ---------------------------------------------------------------------------
// PeriodClock
// ---------------------------------------------------------------------------

/// Tracks the current period and queues closed periods for settlement.
///
/// Closed periods stay in the backlog until settlement reports them settled
/// (by this or any other instance), so a failed attempt is retried on the
/// next tick instead of being forgotten.
pub struct PeriodClock {
    schedule: PeriodSchedule,
    clock: Arc<dyn Clock>,
    current: Option<Period>,
    backlog: VecDeque<Period>,
}

impl PeriodClock {
    pub fn new(schedule: PeriodSchedule, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule,
            clock,
            current: None,
            backlog: VecDeque::new(),
        }
    }

    pub fn current(&self) -> Option<&Period> {
        self.current.as_ref()
    }

    pub fn backlog(&self) -> impl Iterator<Item = &Period> {
        self.backlog.iter()
    }

    /// Recompute the period. Returns the period that just closed, if any.
    pub fn tick(&mut self) -> Option<Period> {
        let now_period = self.schedule.period_at(self.clock.now());
        match &self.current {
            Some(cur) if cur.id == now_period.id => None,
            _ => {
                let closed = self.current.replace(now_period);
                if let Some(p) = &closed {
                    self.enqueue(p.clone());
                }
                closed
            }
        }
    }

    fn enqueue(&mut self, period: Period) {
        if !self.backlog.iter().any(|p| p.id == period.id) {
            self.backlog.push_back(period);
        }
    }

    /// Queue every earlier period the store never saw settled.
    pub async fn recover(&mut self, periods: &dyn PeriodStore) -> Result<usize> {
        let cutoff = self.schedule.period_at(self.clock.now()).start;
        let stale = periods.unsettled_before(cutoff).await?;
        let count = stale.len();
        for p in stale {
            self.enqueue(p);
        }
        if count > 0 {
            info!(count, "Recovered unsettled periods");
        }
        Ok(count)
    }

    /// One scheduler step: detect a boundary, open the new period, and try
    /// to settle everything in the backlog.
    pub async fn step(&mut self, engine: &SettlementEngine, periods: &dyn PeriodStore) {
        if let Some(closed) = self.tick() {
            debug!(period = %closed.id, "Period boundary crossed");
            // Picks up periods this instance skipped or another instance abandoned.
            if let Err(e) = self.recover(periods).await {
                warn!(error = %e, "Failed to scan for unsettled periods");
            }
        }
        if let Some(cur) = &self.current {
            if let Err(e) = periods.ensure_open(cur).await {
                warn!(period = %cur.id, error = %e, "Failed to record open period");
            }
        }

        let mut remaining = VecDeque::with_capacity(self.backlog.len());
        while let Some(period) = self.backlog.pop_front() {
            match engine.settle_period(&period).await {
                Ok(report) if report.disposition == Disposition::Busy => {
                    debug!(period = %period.id, "Period held by another settler");
                    remaining.push_back(period);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(period = %period.id, error = %e, "Settlement failed, will retry");
                    remaining.push_back(period);
                }
            }
        }
        self.backlog = remaining;
    }

    /// Drive the clock on a fixed interval until `shutdown` resolves.
    pub async fn run<F>(
        mut self,
        engine: Arc<SettlementEngine>,
        periods: Arc<dyn PeriodStore>,
        tick: std::time::Duration,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            period_secs = self.schedule.period_secs(),
            tick_ms = tick.as_millis() as u64,
            "Period clock running"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step(&engine, periods.as_ref()).await;
                }
                _ = &mut shutdown => {
                    info!(pending = self.backlog.len(), "Period clock stopping");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
