//! Game rules — outcome classification, the odds table, and the
//! liability-minimising outcome selector.
//!
//! Everything here is pure: no stores, no clocks, no I/O.

pub mod classify;
pub mod odds;
pub mod outcome;

pub use classify::{classify, Classification};
pub use odds::{payout, payout_multiplier};
pub use outcome::{liabilities, liability, DrawSource, EmptyBookPolicy, OutcomeSelector, SelectedOutcome};
