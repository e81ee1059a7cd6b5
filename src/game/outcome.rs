//! Outcome selection.
//!
//! For every candidate number the selector totals what the house would owe
//! across the pending bet book (its *liability*) and draws the cheapest one,
//! breaking ties towards the smallest number. An admin override bypasses
//! the computation entirely.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::odds::payout;
use crate::types::{Bet, Digit};

/// What to draw when nobody has bet on the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyBookPolicy {
    /// Every liability is zero, so the tie-break yields 0.
    #[default]
    Lowest,
    /// Uniform draw over 0..=9.
    Random,
}

/// Why a number was drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawSource {
    Forced,
    MinLiability,
    EmptyBook,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedOutcome {
    pub number: Digit,
    pub source: DrawSource,
    /// House exposure at the drawn number.
    pub liability: Decimal,
}

/// Total payout owed across `bets` if `candidate` were drawn.
pub fn liability(bets: &[Bet], candidate: Digit) -> Decimal {
    bets.iter()
        .map(|b| payout(b.stake, &b.selection, candidate))
        .sum()
}

/// Liability for every candidate, indexed by number.
pub fn liabilities(bets: &[Bet]) -> [Decimal; 10] {
    let mut out = [Decimal::ZERO; 10];
    for n in Digit::ALL {
        out[n.value() as usize] = liability(bets, n);
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeSelector {
    empty_book: EmptyBookPolicy,
}

impl OutcomeSelector {
    pub fn new(empty_book: EmptyBookPolicy) -> Self {
        Self { empty_book }
    }

    pub fn select(&self, pending: &[Bet], forced: Option<Digit>) -> SelectedOutcome {
        if let Some(number) = forced {
            return SelectedOutcome {
                number,
                source: DrawSource::Forced,
                liability: liability(pending, number),
            };
        }

        if pending.is_empty() && self.empty_book == EmptyBookPolicy::Random {
            let n = rand::thread_rng().gen_range(0..10u8);
            let number = Digit::ALL[n as usize];
            return SelectedOutcome {
                number,
                source: DrawSource::EmptyBook,
                liability: Decimal::ZERO,
            };
        }

        let table = liabilities(pending);
        // Strict `<` keeps the first (smallest) candidate on ties.
        let mut best = Digit::ALL[0];
        for n in Digit::ALL.into_iter().skip(1) {
            if table[n.value() as usize] < table[best.value() as usize] {
                best = n;
            }
        }

        debug!(
            bets = pending.len(),
            winning = %best,
            liability = %table[best.value() as usize],
            "Outcome selected by minimum liability"
        );

        SelectedOutcome {
            number: best,
            source: if pending.is_empty() {
                DrawSource::EmptyBook
            } else {
                DrawSource::MinLiability
            },
            liability: table[best.value() as usize],
        }
    }
}
