//! Odds table: what a selection pays for a given winning number.
//!
//! | Selection | Pays                                   |
//! |-----------|----------------------------------------|
//! | Number N  | 9× when N is drawn                     |
//! | Big/Small | 2× on the matching size                |
//! | Green     | 2× on green numbers, 1.5× on 5         |
//! | Red       | 2× on red numbers, 1.5× on 0           |
//! | Violet    | 4.5× on 0 and 5                        |
//!
//! A multiplier of zero means the selection lost.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::classify::{colors, size};
use crate::types::{Color, Digit, Selection};

const NUMBER_MULTIPLIER: Decimal = dec!(9);
const EVEN_MONEY: Decimal = dec!(2);
const SPLIT_COLOR: Decimal = dec!(1.5);
const VIOLET_MULTIPLIER: Decimal = dec!(4.5);

pub fn payout_multiplier(selection: &Selection, winning: Digit) -> Decimal {
    match *selection {
        Selection::Number(n) => {
            if n == winning {
                NUMBER_MULTIPLIER
            } else {
                Decimal::ZERO
            }
        }
        Selection::Size(s) => {
            if size(winning) == s {
                EVEN_MONEY
            } else {
                Decimal::ZERO
            }
        }
        Selection::Color(color) => {
            if !colors(winning).contains(&color) {
                return Decimal::ZERO;
            }
            match (color, winning.value()) {
                (Color::Violet, _) => VIOLET_MULTIPLIER,
                (Color::Green, 5) | (Color::Red, 0) => SPLIT_COLOR,
                _ => EVEN_MONEY,
            }
        }
    }
}

/// `stake × multiplier`; zero for a losing selection.
pub fn payout(stake: Decimal, selection: &Selection, winning: Digit) -> Decimal {
    stake * payout_multiplier(selection, winning)
}
