//! End-to-end period flows: placement, draw, settlement, and recovery from
//! failures injected at each settlement step.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use wingo::engine::*;
use wingo::storage::{AdminOverrideStore, BetStore, PeriodStore, ResultStore};
use wingo::types::{BetStatus, Digit, PeriodStatus, WingoError};

use super::harness::Harness;
use super::mock_store::Op;

fn d(n: u8) -> Digit {
    Digit::new(n).unwrap()
}

// ---------------------------------------------------------------------------
// Outcome scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lone_number_bet_draws_cheapest_number() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "5", dec!(10)).await;
    let period = h.current_period();
    h.close_period();

    let report = h.engine("s1").settle_period(&period).await.unwrap();
    assert_eq!(report.result.unwrap().number, d(0));
    assert_eq!(report.bets_lost, 1);
    assert_eq!(h.balance("u1").await, dec!(90));
}

#[tokio::test]
async fn red_and_green_tie_breaks_to_zero() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.fund("u2", dec!(100));
    h.bet("u1", "Red", dec!(10)).await;
    h.bet("u2", "Green", dec!(10)).await;
    let period = h.current_period();
    h.close_period();

    let report = h.engine("s1").settle_period(&period).await.unwrap();
    let result = report.result.unwrap();
    assert_eq!(result.number, d(0));
    assert_eq!(report.total_paid, dec!(15));
    assert_eq!(h.balance("u1").await, dec!(105));
    assert_eq!(h.balance("u2").await, dec!(90));
}

#[tokio::test]
async fn override_wins_once_then_clears() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "Small", dec!(10)).await;
    force_outcome(&*h.store, 7).await.unwrap();
    let first = h.current_period();
    h.close_period();

    let engine = h.engine("s1");
    let report = engine.settle_period(&first).await.unwrap();
    assert_eq!(report.result.unwrap().number, d(7));
    assert_eq!(h.store.peek().await.unwrap(), None);

    // Next period falls back to the liability computation.
    h.bet("u1", "0", dec!(10)).await;
    let second = h.current_period();
    assert_ne!(second.id, first.id);
    h.close_period();

    let report = engine.settle_period(&second).await.unwrap();
    assert_eq!(report.result.unwrap().number, d(1));
}

#[tokio::test]
async fn forced_number_pays_nine_times() {
    let h = Harness::new();
    h.fund("u1", dec!(10));
    let bet = h.bet("u1", "3", dec!(10)).await;
    force_outcome(&*h.store, 3).await.unwrap();
    let period = h.current_period();
    h.close_period();

    h.engine("s1").settle_period(&period).await.unwrap();

    let won = h.store.list_won(&period.id).await.unwrap();
    assert_eq!(won.len(), 1);
    assert_eq!(won[0].id, bet.id);
    assert_eq!(won[0].payout, dec!(90));
    assert_eq!(h.balance("u1").await, dec!(90));
}

#[tokio::test]
async fn payouts_equal_sum_over_won_bets() {
    let h = Harness::new();
    let picks = ["Big", "Small", "Red", "Green", "Violet", "0", "5", "9"];
    for (i, pick) in picks.iter().enumerate() {
        let owner = format!("p{i}");
        h.fund(&owner, dec!(50));
        h.bet(&owner, pick, dec!(20)).await;
    }
    force_outcome(&*h.store, 5).await.unwrap();
    let period = h.current_period();
    h.close_period();

    let report = h.engine("s1").settle_period(&period).await.unwrap();

    let won = h.store.list_won(&period.id).await.unwrap();
    let owed: Decimal = won.iter().map(|b| b.payout).sum();
    assert_eq!(report.total_paid, owed);
    // Big 40, Green 30, Violet 90, "5" 180
    assert_eq!(owed, dec!(340));
    assert_eq!(report.bets_won + report.bets_lost, picks.len());

    let credited: Decimal = h
        .store
        .applied_deltas()
        .iter()
        .filter(|(_, _, key)| key.starts_with("payout:"))
        .map(|(_, amount, _)| *amount)
        .sum();
    assert_eq!(credited, owed);
}

#[tokio::test]
async fn bets_after_claim_are_refused() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    let period = h.current_period();
    h.store
        .claim(&period, "s1", h.clock.now(), Duration::seconds(30))
        .await
        .unwrap();

    let err = h
        .desk
        .place(&BetRequest {
            owner: "u1".into(),
            selection: "Big".into(),
            stake: dec!(10),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, WingoError::PeriodClosed(_)));
    assert_eq!(h.balance("u1").await, dec!(100));
}

// ---------------------------------------------------------------------------
// Failure at each step, then resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failure_before_snapshot_leaves_period_settling() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "Big", dec!(10)).await;
    let period = h.current_period();
    h.close_period();
    h.store.fail(Op::ListPending, 1);

    let engine = h.engine("s1");
    assert!(engine.settle_period(&period).await.is_err());
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settling));
    assert_eq!(h.store.get(&period.id).await.unwrap(), None);

    let report = engine.settle_period(&period).await.unwrap();
    assert!(report.resumed);
    assert_eq!(report.bets_resolved, 1);
}

#[tokio::test]
async fn failure_mid_transition_keeps_drawn_result() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.fund("u2", dec!(100));
    h.bet("u1", "Green", dec!(10)).await;
    h.bet("u2", "Red", dec!(10)).await;
    force_outcome(&*h.store, 1).await.unwrap();
    let period = h.current_period();
    h.close_period();
    h.store.fail(Op::Transition, 1);

    let engine = h.engine("s1");
    assert!(engine.settle_period(&period).await.is_err());
    let drawn = h.store.get(&period.id).await.unwrap().unwrap();
    assert_eq!(drawn.number, d(1));

    // The override is spent; the stored result is reused.
    let report = engine.settle_period(&period).await.unwrap();
    assert_eq!(report.result.unwrap(), drawn);
    assert_eq!(h.balance("u1").await, dec!(110));
    assert_eq!(h.balance("u2").await, dec!(90));
}

#[tokio::test]
async fn failure_during_credit_requires_reconciliation_then_pays_once() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "Violet", dec!(10)).await;
    force_outcome(&*h.store, 0).await.unwrap();
    let period = h.current_period();
    h.close_period();
    h.store.fail(Op::ApplyDelta, 1);

    let engine = h.engine("s1");
    let err = engine.settle_period(&period).await.unwrap_err();
    assert!(matches!(err, WingoError::Reconciliation { unpaid: 1, .. }));
    assert_eq!(h.balance("u1").await, dec!(90));
    let bets = h.store.list_for_owner("u1", 10).await.unwrap();
    assert_eq!(bets[0].status, BetStatus::Won);

    let report = engine.settle_period(&period).await.unwrap();
    assert_eq!(report.total_paid, dec!(45));
    assert_eq!(h.balance("u1").await, dec!(135));
}

#[tokio::test]
async fn failure_after_credit_does_not_pay_twice() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "9", dec!(10)).await;
    force_outcome(&*h.store, 9).await.unwrap();
    let period = h.current_period();
    h.close_period();
    h.store.fail(Op::MarkSettled, 1);

    let engine = h.engine("s1");
    assert!(engine.settle_period(&period).await.is_err());
    assert_eq!(h.balance("u1").await, dec!(180));

    let report = engine.settle_period(&period).await.unwrap();
    assert_eq!(report.disposition, Disposition::Settled);
    assert_eq!(report.total_paid, Decimal::ZERO);
    assert_eq!(h.balance("u1").await, dec!(180));
    assert_eq!(
        h.store
            .applied_deltas()
            .iter()
            .filter(|(_, _, k)| k.starts_with("payout:"))
            .count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Clock-driven settlement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clock_settles_closed_period_on_boundary() {
    let h = Harness::new();
    let engine = h.engine("s1");
    let mut pc = PeriodClock::new(h.schedule, h.clock.clone());

    pc.step(&engine, &*h.store).await;
    let period = pc.current().unwrap().clone();
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Open));

    h.fund("u1", dec!(100));
    h.bet("u1", "Big", dec!(10)).await;

    h.clock.advance(Duration::seconds(20));
    pc.step(&engine, &*h.store).await;
    assert!(h.store.get(&period.id).await.unwrap().is_none(), "not closed yet");

    h.clock.advance(Duration::seconds(40));
    pc.step(&engine, &*h.store).await;
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));
    assert_eq!(pc.backlog().count(), 0);
    assert_ne!(pc.current().unwrap().id, period.id);
}

#[tokio::test]
async fn clock_retries_failed_settlement_next_tick() {
    let h = Harness::new();
    let engine = h.engine("s1");
    let mut pc = PeriodClock::new(h.schedule, h.clock.clone());
    pc.step(&engine, &*h.store).await;
    let period = pc.current().unwrap().clone();

    h.fund("u1", dec!(100));
    h.bet("u1", "Small", dec!(10)).await;
    h.store.fail(Op::MarkSettled, 1);

    h.clock.advance(Duration::seconds(60));
    pc.step(&engine, &*h.store).await;
    assert_eq!(pc.backlog().map(|p| p.id.clone()).collect::<Vec<_>>(), vec![period.id.clone()]);

    h.clock.advance(Duration::seconds(1));
    pc.step(&engine, &*h.store).await;
    assert_eq!(pc.backlog().count(), 0);
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));
    // A lone bet always loses to the minimum-liability draw.
    assert_eq!(h.balance("u1").await, dec!(90));
}

#[tokio::test]
async fn recovery_takes_over_abandoned_period_after_lease() {
    let h = Harness::new();
    h.fund("u1", dec!(100));
    h.bet("u1", "Red", dec!(10)).await;
    let period = h.current_period();
    h.close_period();

    // A previous instance claimed the period and died.
    h.store
        .claim(&period, "ghost", h.clock.now(), Duration::seconds(30))
        .await
        .unwrap();

    let engine = h.engine("s2");
    let mut pc = PeriodClock::new(h.schedule, h.clock.clone());
    assert_eq!(pc.recover(&*h.store).await.unwrap(), 1);

    pc.step(&engine, &*h.store).await;
    assert_eq!(pc.backlog().count(), 1, "lease still live");

    h.clock.advance(Duration::seconds(31));
    pc.step(&engine, &*h.store).await;
    assert_eq!(pc.backlog().count(), 0);
    assert_eq!(h.store.status(&period.id).await.unwrap(), Some(PeriodStatus::Settled));
}
