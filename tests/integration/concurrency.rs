//! Concurrent settlers and placement racing settlement.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

use wingo::engine::*;
use wingo::storage::{BetStore, PeriodStore};
use wingo::types::{BetStatus, PeriodStatus, WingoError};

use super::harness::Harness;

fn payout_keys(h: &Harness) -> Vec<String> {
    h.store
        .applied_deltas()
        .into_iter()
        .filter(|(_, _, key)| key.starts_with("payout:"))
        .map(|(_, _, key)| key)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_settlers_one_period_settles_once() {
    let h = Harness::new();
    for i in 0..40u32 {
        let owner = format!("p{i}");
        h.fund(&owner, dec!(100));
        h.bet(&owner, &(i % 10).to_string(), dec!(10)).await;
    }
    force_outcome(&*h.store, 3).await.unwrap();
    let period = h.current_period();
    h.close_period();

    let a = h.engine("a");
    let b = h.engine("b");
    let (ra, rb) = tokio::join!(a.settle_period(&period), b.settle_period(&period));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    let settled = [ra.disposition, rb.disposition]
        .iter()
        .filter(|d| **d == Disposition::Settled)
        .count();
    assert_eq!(settled, 1, "got {:?} and {:?}", ra.disposition, rb.disposition);

    let won = h.store.list_won(&period.id).await.unwrap();
    assert_eq!(won.len(), 4);
    let keys = payout_keys(&h);
    assert_eq!(keys.len(), won.len());
    for bet in &won {
        assert_eq!(h.balance(&bet.owner).await, dec!(180));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn settlers_sweeping_same_backlog_pay_each_bet_once() {
    let h = Harness::new();
    let mut periods = Vec::new();
    for round in 0..3 {
        for i in 0..10u32 {
            let owner = format!("r{round}p{i}");
            h.fund(&owner, dec!(100));
            let pick = ["Red", "Green", "Violet", "Big", "Small"][(i % 5) as usize];
            h.bet(&owner, pick, dec!(10)).await;
        }
        periods.push(h.current_period());
        h.close_period();
    }

    let engines: Vec<Arc<SettlementEngine>> =
        (0..4).map(|i| Arc::new(h.engine(&format!("s{i}")))).collect();

    let handles: Vec<_> = engines
        .iter()
        .map(|engine| {
            let engine = engine.clone();
            let periods = periods.clone();
            tokio::spawn(async move {
                let mut dispositions = Vec::new();
                for p in &periods {
                    dispositions.push((p.id.clone(), engine.settle_period(p).await.unwrap().disposition));
                }
                dispositions
            })
        })
        .collect();

    let mut settled_by: HashMap<String, usize> = HashMap::new();
    for handle in futures::future::join_all(handles).await {
        for (period, disposition) in handle.unwrap() {
            if disposition == Disposition::Settled {
                *settled_by.entry(period).or_default() += 1;
            }
        }
    }

    let mut total_won = 0;
    for p in &periods {
        assert_eq!(settled_by.get(&p.id), Some(&1), "period {} settled once", p.id);
        assert_eq!(h.store.status(&p.id).await.unwrap(), Some(PeriodStatus::Settled));
        assert!(h.store.list_pending(&p.id).await.unwrap().is_empty());
        total_won += h.store.list_won(&p.id).await.unwrap().len();
    }
    assert_eq!(payout_keys(&h).len(), total_won);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn placement_racing_claim_never_strands_a_bet() {
    let h = Arc::new(Harness::new());
    for i in 0..30u32 {
        h.fund(&format!("p{i}"), dec!(100));
    }
    let period = h.current_period();
    let engine = Arc::new(h.engine("s1"));

    let placements: Vec<_> = (0..30u32)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                h.desk
                    .place(&BetRequest {
                        owner: format!("p{i}"),
                        selection: "Big".into(),
                        stake: dec!(10),
                    })
                    .await
            })
        })
        .collect();
    let settle = {
        let engine = engine.clone();
        let period = period.clone();
        tokio::spawn(async move { engine.settle_period(&period).await })
    };

    let placed = futures::future::join_all(placements).await;
    settle.await.unwrap().unwrap();

    let mut accepted = 0;
    for r in placed {
        match r.unwrap() {
            Ok(_) => accepted += 1,
            Err(WingoError::PeriodClosed(_)) => {}
            Err(e) => panic!("unexpected placement error: {e}"),
        }
    }

    assert!(h.store.list_pending(&period.id).await.unwrap().is_empty());
    let mut resolved = 0;
    for i in 0..30u32 {
        let owner = format!("p{i}");
        let bets = h.store.list_for_owner(&owner, 10).await.unwrap();
        let expected = bets.iter().fold(dec!(100), |bal, b| {
            assert_ne!(b.status, BetStatus::Pending);
            bal - b.stake + b.payout
        });
        resolved += bets.len();
        assert_eq!(h.balance(&owner).await, expected);
    }
    assert_eq!(resolved, accepted);
    assert!(h.balance("p0").await >= Decimal::ZERO);
}
