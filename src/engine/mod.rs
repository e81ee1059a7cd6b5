//! Core engine — period clock, bet placement, and settlement.

pub mod admin;
pub mod clock;
pub mod ledger;
pub mod placement;
pub mod settlement;

pub use admin::force_outcome;
pub use clock::{Clock, ManualClock, PeriodClock, PeriodSchedule, SystemClock};
pub use ledger::{apply_with_retry, Credit, RetryPolicy};
pub use placement::{BetDesk, BetLimits, BetRequest};
pub use settlement::{Disposition, SettlementConfig, SettlementEngine, SettlementReport};
