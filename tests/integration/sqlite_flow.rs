//! Full period flow against the SQLite store.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

use wingo::deposit::{DepositClaim, DepositDecision, DepositDesk};
use wingo::engine::*;
use wingo::game::{EmptyBookPolicy, OutcomeSelector};
use wingo::notify::LogNotifier;
use wingo::storage::sqlite::SqliteStore;
use wingo::storage::{AccountStore, BetStore, PeriodStore, ResultStore, Stores};
use wingo::types::{BetStatus, PeriodStatus};

use super::harness::t0;

struct SqliteHarness {
    store: Arc<SqliteStore>,
    clock: Arc<ManualClock>,
    schedule: PeriodSchedule,
    desk: BetDesk,
    _dir: Option<TempDir>,
}

impl SqliteHarness {
    async fn new() -> Self {
        Self::with_store(SqliteStore::in_memory().await.unwrap(), None)
    }

    /// A database file shared by a pool of several connections.
    async fn pooled_file() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("wingo.db").display());
        Self::with_store(SqliteStore::connect(&url, 5).await.unwrap(), Some(dir))
    }

    fn with_store(store: SqliteStore, dir: Option<TempDir>) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(t0()));
        let schedule = PeriodSchedule::new(60).unwrap();
        let desk = BetDesk::new(store.clone(), store.clone(), schedule, clock.clone(), BetLimits::default());
        Self {
            store,
            clock,
            schedule,
            desk,
            _dir: dir,
        }
    }

    fn engine(&self, claimant: &str) -> SettlementEngine {
        SettlementEngine::new(
            Stores::from_backend(self.store.clone()),
            Arc::new(LogNotifier),
            OutcomeSelector::new(EmptyBookPolicy::Lowest),
            self.clock.clone(),
            SettlementConfig {
                claimant: claimant.into(),
                claim_lease: Duration::seconds(30),
                credit_retry: RetryPolicy {
                    attempts: 10,
                    backoff: std::time::Duration::from_millis(2),
                },
            },
        )
    }

    async fn bet(&self, owner: &str, selection: &str) {
        self.desk
            .place(&BetRequest {
                owner: owner.into(),
                selection: selection.into(),
                stake: dec!(10),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn sqlite_round_settles_and_pays_once() {
    let h = SqliteHarness::new().await;
    h.store.set_balance("u1", dec!(100)).await.unwrap();
    h.store.set_balance("u2", dec!(100)).await.unwrap();
    h.bet("u1", "Violet").await;
    h.bet("u2", "4").await;
    force_outcome(&*h.store, 5).await.unwrap();

    let period = h.schedule.period_at(h.clock.now());
    h.clock.advance(Duration::seconds(60));

    let engine = h.engine("s1");
    let report = engine.settle_period(&period).await.unwrap();
    assert_eq!(report.disposition, Disposition::Settled);
    assert_eq!(report.result.as_ref().unwrap().number.value(), 5);
    assert_eq!(report.total_paid, dec!(45));

    let again = engine.settle_period(&period).await.unwrap();
    assert_eq!(again.disposition, Disposition::AlreadySettled);

    assert_eq!(h.store.get_balance("u1").await.unwrap(), dec!(135));
    assert_eq!(h.store.get_balance("u2").await.unwrap(), dec!(90));
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));

    let u2 = h.store.list_for_owner("u2", 5).await.unwrap();
    assert_eq!(u2[0].status, BetStatus::Lost);
    assert_eq!(u2[0].payout, dec!(0));

    let history = h.store.recent(15).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].period, period.id);
}

#[tokio::test]
async fn sqlite_recovers_period_left_settling() {
    let h = SqliteHarness::new().await;
    h.store.set_balance("u1", dec!(100)).await.unwrap();
    h.bet("u1", "Green").await;
    let period = h.schedule.period_at(h.clock.now());
    h.clock.advance(Duration::seconds(60));

    h.store
        .claim(&period, "ghost", h.clock.now(), Duration::seconds(30))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(31));

    let engine = h.engine("s1");
    let mut pc = PeriodClock::new(h.schedule, h.clock.clone());
    assert_eq!(pc.recover(&*h.store).await.unwrap(), 1);
    pc.step(&engine, &*h.store).await;

    assert_eq!(pc.backlog().count(), 0);
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));
    assert!(h.store.list_pending(&period.id).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_settlers_with_racing_placements() {
    let h = Arc::new(SqliteHarness::pooled_file().await);
    for i in 0..30 {
        let owner = format!("p{i}");
        h.store.set_balance(&owner, dec!(100)).await.unwrap();
        h.bet(&owner, if i % 2 == 0 { "Big" } else { "Small" }).await;
    }
    force_outcome(&*h.store, 8).await.unwrap();
    let period = h.schedule.period_at(h.clock.now());
    h.clock.advance(Duration::seconds(60));

    // The same owners bet on the next period while the closed one settles.
    let placements: Vec<_> = (0..30)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move { h.bet(&format!("p{i}"), "Red").await })
        })
        .collect();
    let settlers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|claimant| {
            let engine = h.engine(claimant);
            let period = period.clone();
            tokio::spawn(async move { engine.settle_period(&period).await })
        })
        .collect();

    let mut settled = 0;
    let mut total_paid = Decimal::ZERO;
    for handle in futures::future::join_all(settlers).await {
        let report = handle.unwrap().unwrap();
        if report.disposition == Disposition::Settled {
            settled += 1;
            total_paid += report.total_paid;
        }
    }
    for handle in futures::future::join_all(placements).await {
        handle.unwrap();
    }

    assert_eq!(settled, 1);
    assert_eq!(total_paid, dec!(300));
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));
    assert!(h.store.list_pending(&period.id).await.unwrap().is_empty());
    assert_eq!(h.store.list_won(&period.id).await.unwrap().len(), 15);

    for i in 0..30 {
        let expected = if i % 2 == 0 { dec!(100) } else { dec!(80) };
        assert_eq!(h.store.get_balance(&format!("p{i}")).await.unwrap(), expected);
    }
}

#[tokio::test]
async fn sqlite_review_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("wingo.db").display());
    let desk = |store: Arc<SqliteStore>| {
        DepositDesk::new(
            None,
            store.clone(),
            store,
            Arc::new(ManualClock::new(t0())),
            std::time::Duration::from_secs(1),
            RetryPolicy::default(),
        )
    };
    let claim = DepositClaim {
        owner: "u1".into(),
        amount: dec!(400),
        utr: "555566667777".into(),
        proof: vec![0x89, 0x50],
        mime_type: "image/png".into(),
    };

    {
        let store = Arc::new(SqliteStore::connect(&url, 2).await.unwrap());
        let decision = desk(store).submit(&claim).await.unwrap();
        assert!(matches!(decision, DepositDecision::ManualReview { .. }));
    }

    let store = Arc::new(SqliteStore::connect(&url, 2).await.unwrap());
    let desk = desk(store.clone());
    let queue = desk.pending().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].utr, claim.utr);
    assert_eq!(queue[0].proof, claim.proof);

    assert_eq!(
        desk.approve(&claim.utr).await.unwrap(),
        DepositDecision::Approved { balance: dec!(400) }
    );
    assert!(desk.pending().await.unwrap().is_empty());
    assert_eq!(store.get_balance("u1").await.unwrap(), dec!(400));
}
