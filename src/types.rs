//! Shared types for the WINGO engine.
//!
//! These types form the data model used across all modules: digits and
//! selections, bets, periods, round results, ledger references, and the
//! domain error enum. Game rules live in `game`, persistence in `storage`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Bets are keyed by a random UUID assigned at placement.
pub type BetId = Uuid;

/// Opaque reference to the owning user/profile (a phone number upstream).
pub type OwnerId = String;

// ---------------------------------------------------------------------------
// Digit
// ---------------------------------------------------------------------------

/// A draw number in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Digit(u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("digit {0} is outside 0-9")]
pub struct DigitOutOfRange(pub u8);

impl Digit {
    /// Every drawable number, in ascending order.
    pub const ALL: [Digit; 10] = [
        Digit(0),
        Digit(1),
        Digit(2),
        Digit(3),
        Digit(4),
        Digit(5),
        Digit(6),
        Digit(7),
        Digit(8),
        Digit(9),
    ];

    pub fn new(n: u8) -> Result<Self, DigitOutOfRange> {
        if n <= 9 {
            Ok(Digit(n))
        } else {
            Err(DigitOutOfRange(n))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Digit {
    type Error = DigitOutOfRange;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Digit::new(n)
    }
}

impl From<Digit> for u8 {
    fn from(d: Digit) -> u8 {
        d.0
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Red => write!(f, "Red"),
            Color::Green => write!(f, "Green"),
            Color::Violet => write!(f, "Violet"),
        }
    }
}

/// Size category of a draw: `Small` below 5, `Big` from 5 up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Size {
    Big,
    Small,
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Big => write!(f, "Big"),
            Size::Small => write!(f, "Small"),
        }
    }
}

impl FromStr for Size {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Big" => Ok(Size::Big),
            "Small" => Ok(Size::Small),
            _ => Err(anyhow::anyhow!("Unknown size: {s}")),
        }
    }
}

/// What a bet wagers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selection {
    Number(Digit),
    Color(Color),
    Size(Size),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Number(d) => write!(f, "{d}"),
            Selection::Color(c) => write!(f, "{c}"),
            Selection::Size(s) => write!(f, "{s}"),
        }
    }
}

/// Parses the wire form used by bet requests: `"0"`..`"9"`, a color name,
/// or `Big`/`Small` (case-insensitive).
impl FromStr for Selection {
    type Err = WingoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u8>() {
            return Digit::new(n)
                .map(Selection::Number)
                .map_err(|e| WingoError::InvalidSelection(e.to_string()));
        }
        match trimmed.to_lowercase().as_str() {
            "red" => Ok(Selection::Color(Color::Red)),
            "green" => Ok(Selection::Color(Color::Green)),
            "violet" => Ok(Selection::Color(Color::Violet)),
            "big" => Ok(Selection::Size(Size::Big)),
            "small" => Ok(Selection::Size(Size::Small)),
            _ => Err(WingoError::InvalidSelection(format!("unrecognised selection '{s}'"))),
        }
    }
}

/// Bet lifecycle. `Pending` moves to `Won` or `Lost` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "pending"),
            BetStatus::Won => write!(f, "won"),
            BetStatus::Lost => write!(f, "lost"),
        }
    }
}

impl FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BetStatus::Pending),
            "won" => Ok(BetStatus::Won),
            "lost" => Ok(BetStatus::Lost),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

/// Period lifecycle. Transitions are monotonic: Open → Settling → Settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodStatus {
    Open,
    Settling,
    Settled,
}

impl fmt::Display for PeriodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodStatus::Open => write!(f, "open"),
            PeriodStatus::Settling => write!(f, "settling"),
            PeriodStatus::Settled => write!(f, "settled"),
        }
    }
}

impl FromStr for PeriodStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PeriodStatus::Open),
            "settling" => Ok(PeriodStatus::Settling),
            "settled" => Ok(PeriodStatus::Settled),
            _ => Err(anyhow::anyhow!("Unknown period status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Period
// ---------------------------------------------------------------------------

/// One fixed-duration betting round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} .. {})", self.id, self.start.format("%H:%M:%S"), self.end.format("%H:%M:%S"))
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub owner: OwnerId,
    pub period: String,
    pub selection: Selection,
    pub stake: Decimal,
    pub status: BetStatus,
    /// Zero until settled.
    pub payout: Decimal,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    /// A fresh pending bet with a new id.
    pub fn new(
        owner: &str,
        period: &str,
        selection: Selection,
        stake: Decimal,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            period: period.to_string(),
            selection,
            stake,
            status: BetStatus::Pending,
            payout: Decimal::ZERO,
            placed_at,
        }
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on {} stake={} {} payout={}",
            self.period, self.owner, self.selection, self.stake, self.status, self.payout,
        )
    }
}

// ---------------------------------------------------------------------------
// Round result
// ---------------------------------------------------------------------------

/// The drawn outcome of a period. At most one per period; immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub period: String,
    pub number: Digit,
    pub colors: Vec<Color>,
    pub size: Size,
    pub drawn_at: DateTime<Utc>,
}

impl fmt::Display for RoundResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let colors: Vec<String> = self.colors.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}] {} ({}, {})", self.period, self.number, colors.join("+"), self.size)
    }
}

/// Per-bet settlement detail surfaced to the bet's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetOutcome {
    pub bet_id: BetId,
    pub owner: OwnerId,
    pub period: String,
    pub selection: Selection,
    pub winning_number: Digit,
    pub status: BetStatus,
    pub stake: Decimal,
    pub payout: Decimal,
}

impl BetOutcome {
    /// Amount shown to the player: the payout on a win, the lost stake otherwise.
    pub fn headline_amount(&self) -> Decimal {
        match self.status {
            BetStatus::Won => self.payout,
            _ => self.stake,
        }
    }
}

// ---------------------------------------------------------------------------
// Deposit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Waiting for an operator, or for a credit that has not landed yet.
    Pending,
    Approved,
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositStatus::Pending => write!(f, "pending"),
            DepositStatus::Approved => write!(f, "approved"),
        }
    }
}

impl FromStr for DepositStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "approved" => Ok(DepositStatus::Approved),
            _ => Err(anyhow::anyhow!("Unknown deposit status: {s}")),
        }
    }
}

/// A submitted deposit claim as kept in the review queue. The UTR is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub utr: String,
    pub owner: OwnerId,
    pub amount: Decimal,
    #[serde(skip)]
    pub proof: Vec<u8>,
    pub mime_type: String,
    pub status: DepositStatus,
    /// Why the claim was not credited automatically.
    pub note: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Identifies why a balance moved. Each reference is applied at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerRef {
    Stake(BetId),
    Payout(BetId),
    Deposit(String),
}

impl LedgerRef {
    /// Stable key used for the ledger uniqueness constraint.
    pub fn key(&self) -> String {
        match self {
            LedgerRef::Stake(id) => format!("stake:{id}"),
            LedgerRef::Payout(id) => format!("payout:{id}"),
            LedgerRef::Deposit(utr) => format!("deposit:{utr}"),
        }
    }
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for WINGO.
#[derive(Debug, thiserror::Error)]
pub enum WingoError {
    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Invalid stake: {0}")]
    InvalidStake(String),

    #[error("Invalid deposit: {0}")]
    InvalidDeposit(String),

    #[error("Forced outcome {0} is outside 0-9")]
    OverrideOutOfRange(u8),

    #[error("Period {period} is closing ({seconds_left}s left), bets are locked")]
    PeriodClosing { period: String, seconds_left: u32 },

    #[error("Period {0} is closed for betting")]
    PeriodClosed(String),

    #[error("Balance update for {owner} kept conflicting after {attempts} attempts")]
    BalanceConflict { owner: OwnerId, attempts: u32 },

    #[error("Period {period} needs reconciliation: {unpaid} payout(s) not credited")]
    Reconciliation { period: String, unpaid: usize },

    #[error("No deposit recorded for UTR {0}")]
    UnknownDeposit(String),

    #[error("Storage error: {0}")]
    Store(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
