//! SQLite store via `sqlx`.
//!
//! Every compare-and-set runs inside a transaction and finishes with a
//! conditional `UPDATE` whose `rows_affected` decides the outcome, so two
//! engine instances sharing one database file cannot both win a claim or
//! both apply the same balance change. Money is stored as normalised
//! decimal text; timestamps as RFC 3339 UTC text, which sorts correctly.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use super::{
    AccountStore, AdminOverrideStore, BetInsert, BetStore, Claim, DeltaApply, DepositInsert,
    DepositStore, PeriodStore, ResultInsert, ResultStore, Transition,
};
use crate::types::{
    Bet, BetId, BetStatus, Color, DepositRecord, Digit, LedgerRef, Period, PeriodStatus,
    RoundResult, Selection,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS periods (
        id TEXT PRIMARY KEY,
        start_at TEXT NOT NULL,
        end_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        claimant TEXT,
        claimed_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS bets (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        period TEXT NOT NULL REFERENCES periods(id),
        selection TEXT NOT NULL,
        stake TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        payout TEXT NOT NULL DEFAULT '0',
        placed_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_bets_period ON bets(period, status)",
    "CREATE INDEX IF NOT EXISTS idx_bets_owner ON bets(owner, placed_at)",
    "CREATE TABLE IF NOT EXISTS results (
        period TEXT PRIMARY KEY,
        number INTEGER NOT NULL,
        colors TEXT NOT NULL,
        size TEXT NOT NULL,
        drawn_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS accounts (
        owner TEXT PRIMARY KEY,
        balance TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ledger (
        reference TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        delta TEXT NOT NULL,
        applied_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS admin_override (
        slot INTEGER PRIMARY KEY CHECK (slot = 1),
        number INTEGER NOT NULL CHECK (number BETWEEN 0 AND 9)
    )",
    "CREATE TABLE IF NOT EXISTS deposits (
        utr TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        amount TEXT NOT NULL,
        proof BLOB NOT NULL,
        mime_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        note TEXT,
        submitted_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_deposits_status ON deposits(status, submitted_at)",
];

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp in store: {s}"))?
        .with_timezone(&Utc))
}

fn money(d: Decimal) -> String {
    d.normalize().to_string()
}

fn parse_money(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad amount in store: {s}"))
}

fn bet_from_row(row: &SqliteRow) -> Result<Bet> {
    let selection: String = row.try_get("selection")?;
    let status: String = row.try_get("status")?;
    Ok(Bet {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        owner: row.try_get("owner")?,
        period: row.try_get("period")?,
        selection: selection
            .parse::<Selection>()
            .map_err(|e| anyhow!("bad selection in store: {e}"))?,
        stake: parse_money(&row.try_get::<String, _>("stake")?)?,
        status: status.parse()?,
        payout: parse_money(&row.try_get::<String, _>("payout")?)?,
        placed_at: parse_ts(&row.try_get::<String, _>("placed_at")?)?,
    })
}

fn result_from_row(row: &SqliteRow) -> Result<RoundResult> {
    let number: i64 = row.try_get("number")?;
    let colors: Vec<Color> = serde_json::from_str(&row.try_get::<String, _>("colors")?)?;
    let size: String = row.try_get("size")?;
    Ok(RoundResult {
        period: row.try_get("period")?,
        number: Digit::new(u8::try_from(number)?)?,
        colors,
        size: size.parse()?,
        drawn_at: parse_ts(&row.try_get::<String, _>("drawn_at")?)?,
    })
}

fn deposit_from_row(row: &SqliteRow) -> Result<DepositRecord> {
    Ok(DepositRecord {
        utr: row.try_get("utr")?,
        owner: row.try_get("owner")?,
        amount: parse_money(&row.try_get::<String, _>("amount")?)?,
        proof: row.try_get("proof")?,
        mime_type: row.try_get("mime_type")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        note: row.try_get("note")?,
        submitted_at: parse_ts(&row.try_get::<String, _>("submitted_at")?)?,
    })
}

fn period_from_row(row: &SqliteRow) -> Result<Period> {
    Ok(Period {
        id: row.try_get("id")?,
        start: parse_ts(&row.try_get::<String, _>("start_at")?)?,
        end: parse_ts(&row.try_get::<String, _>("end_at")?)?,
    })
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url: {url}"))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        for stmt in SCHEMA {
            sqlx::query(*stmt)
                .execute(&pool)
                .await
                .context("Failed to apply schema")?;
        }

        info!(url, "SQLite store ready");
        Ok(Self { pool })
    }

    /// A private in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        // One connection: every pooled connection would otherwise get its own database.
        Self::connect("sqlite::memory:", 1).await
    }

    /// Seed or overwrite an owner's balance.
    pub async fn set_balance(&self, owner: &str, balance: Decimal) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (owner, balance) VALUES (?, ?)
             ON CONFLICT(owner) DO UPDATE SET balance = excluded.balance",
        )
        .bind(owner)
        .bind(money(balance))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PeriodStore for SqliteStore {
    async fn ensure_open(&self, period: &Period) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO periods (id, start_at, end_at) VALUES (?, ?, ?)")
            .bind(&period.id)
            .bind(ts(period.start))
            .bind(ts(period.end))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim(
        &self,
        period: &Period,
        claimant: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO periods (id, start_at, end_at) VALUES (?, ?, ?)")
            .bind(&period.id)
            .bind(ts(period.start))
            .bind(ts(period.end))
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT status, claimant, claimed_at FROM periods WHERE id = ?")
            .bind(&period.id)
            .fetch_one(&mut *tx)
            .await?;
        let status: PeriodStatus = row.try_get::<String, _>("status")?.parse()?;
        let prev_claimant: Option<String> = row.try_get("claimant")?;
        let prev_claimed_at: Option<String> = row.try_get("claimed_at")?;

        let outcome = match status {
            PeriodStatus::Settled => return Ok(Claim::AlreadySettled),
            PeriodStatus::Open => Claim::Claimed,
            PeriodStatus::Settling => {
                let own = prev_claimant.as_deref() == Some(claimant);
                let expired = match prev_claimed_at.as_deref() {
                    Some(at) => parse_ts(at)? + lease <= now,
                    None => true,
                };
                if !own && !expired {
                    return Ok(Claim::Busy);
                }
                Claim::Resumed
            }
        };

        // Conditional on exactly what was read; a concurrent claimer makes this a no-op.
        let updated = sqlx::query(
            "UPDATE periods SET status = 'settling', claimant = ?, claimed_at = ?
             WHERE id = ? AND status = ? AND claimant IS ? AND claimed_at IS ?",
        )
        .bind(claimant)
        .bind(ts(now))
        .bind(&period.id)
        .bind(status.to_string())
        .bind(prev_claimant)
        .bind(prev_claimed_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Ok(Claim::Busy);
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn mark_settled(&self, period_id: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE periods SET status = 'settled' WHERE id = ? AND status IN ('settling', 'settled')",
        )
        .bind(period_id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() != 1 {
            anyhow::bail!("period {period_id} was never claimed");
        }
        Ok(())
    }

    async fn status(&self, period_id: &str) -> Result<Option<PeriodStatus>> {
        let row = sqlx::query("SELECT status FROM periods WHERE id = ?")
            .bind(period_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get::<String, _>("status")?.parse()?)),
            None => Ok(None),
        }
    }

    async fn unsettled_before(&self, before: DateTime<Utc>) -> Result<Vec<Period>> {
        let rows = sqlx::query(
            "SELECT id, start_at, end_at FROM periods
             WHERE status != 'settled' AND start_at < ? ORDER BY start_at",
        )
        .bind(ts(before))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(period_from_row).collect()
    }
}

#[async_trait]
impl BetStore for SqliteStore {
    async fn create(&self, bet: &Bet, period: &Period, expected_prior: Decimal) -> Result<BetInsert> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO periods (id, start_at, end_at) VALUES (?, ?, ?)")
            .bind(&period.id)
            .bind(ts(period.start))
            .bind(ts(period.end))
            .execute(&mut *tx)
            .await?;

        let status: String = sqlx::query("SELECT status FROM periods WHERE id = ?")
            .bind(&period.id)
            .fetch_one(&mut *tx)
            .await?
            .try_get("status")?;
        if status.parse::<PeriodStatus>()? != PeriodStatus::Open {
            return Ok(BetInsert::PeriodClosed);
        }

        let current = match sqlx::query("SELECT balance FROM accounts WHERE owner = ?")
            .bind(&bet.owner)
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => parse_money(&row.try_get::<String, _>("balance")?)?,
            None => Decimal::ZERO,
        };
        if current != expected_prior {
            return Ok(BetInsert::BalanceChanged { current });
        }
        if current < bet.stake {
            return Ok(BetInsert::InsufficientBalance { available: current });
        }

        let debited = sqlx::query("UPDATE accounts SET balance = ? WHERE owner = ? AND balance = ?")
            .bind(money(current - bet.stake))
            .bind(&bet.owner)
            .bind(money(current))
            .execute(&mut *tx)
            .await?;
        if debited.rows_affected() != 1 {
            return Ok(BetInsert::BalanceChanged { current });
        }

        let now = ts(bet.placed_at);
        sqlx::query("INSERT INTO ledger (reference, owner, delta, applied_at) VALUES (?, ?, ?, ?)")
            .bind(LedgerRef::Stake(bet.id).key())
            .bind(&bet.owner)
            .bind(money(-bet.stake))
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        // Status is re-checked in the insert itself so a claim that slipped in wins.
        let inserted = sqlx::query(
            "INSERT INTO bets (id, owner, period, selection, stake, status, payout, placed_at)
             SELECT ?, ?, ?, ?, ?, 'pending', '0', ?
             WHERE EXISTS (SELECT 1 FROM periods WHERE id = ? AND status = 'open')",
        )
        .bind(bet.id.to_string())
        .bind(&bet.owner)
        .bind(&bet.period)
        .bind(bet.selection.to_string())
        .bind(money(bet.stake))
        .bind(&now)
        .bind(&period.id)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() != 1 {
            return Ok(BetInsert::PeriodClosed);
        }

        tx.commit().await?;
        Ok(BetInsert::Created)
    }

    async fn list_pending(&self, period_id: &str) -> Result<Vec<Bet>> {
        let rows = sqlx::query("SELECT * FROM bets WHERE period = ? AND status = 'pending' ORDER BY placed_at")
            .bind(period_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn list_won(&self, period_id: &str) -> Result<Vec<Bet>> {
        let rows = sqlx::query("SELECT * FROM bets WHERE period = ? AND status = 'won' ORDER BY placed_at")
            .bind(period_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn list_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<Bet>> {
        let rows = sqlx::query("SELECT * FROM bets WHERE owner = ? ORDER BY placed_at DESC LIMIT ?")
            .bind(owner)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn transition_status(
        &self,
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
        payout: Decimal,
    ) -> Result<Transition> {
        let updated = sqlx::query("UPDATE bets SET status = ?, payout = ? WHERE id = ? AND status = ?")
            .bind(to.to_string())
            .bind(money(payout))
            .bind(bet_id.to_string())
            .bind(from.to_string())
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }

        let exists = sqlx::query("SELECT 1 FROM bets WHERE id = ?")
            .bind(bet_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(Transition::AlreadyTransitioned),
            None => Err(anyhow!("bet {bet_id} not found")),
        }
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert_once(&self, result: &RoundResult) -> Result<ResultInsert> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO results (period, number, colors, size, drawn_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&result.period)
        .bind(i64::from(result.number.value()))
        .bind(serde_json::to_string(&result.colors)?)
        .bind(result.size.to_string())
        .bind(ts(result.drawn_at))
        .execute(&self.pool)
        .await?;
        Ok(if inserted.rows_affected() == 1 {
            ResultInsert::Inserted
        } else {
            ResultInsert::AlreadyExists
        })
    }

    async fn get(&self, period_id: &str) -> Result<Option<RoundResult>> {
        let row = sqlx::query("SELECT * FROM results WHERE period = ?")
            .bind(period_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(result_from_row).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RoundResult>> {
        let rows = sqlx::query("SELECT * FROM results ORDER BY drawn_at DESC, period DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(result_from_row).collect()
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_balance(&self, owner: &str) -> Result<Decimal> {
        let row = sqlx::query("SELECT balance FROM accounts WHERE owner = ?")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => parse_money(&r.try_get::<String, _>("balance")?),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn apply_delta(
        &self,
        owner: &str,
        delta: Decimal,
        expected_prior: Decimal,
        reference: &LedgerRef,
    ) -> Result<DeltaApply> {
        let mut tx = self.pool.begin().await?;
        let key = reference.key();

        // Write first: a deferred transaction that reads before writing
        // cannot wait out a concurrent writer and fails with SQLITE_BUSY.
        sqlx::query("INSERT OR IGNORE INTO accounts (owner, balance) VALUES (?, '0')")
            .bind(owner)
            .execute(&mut *tx)
            .await?;

        let seen = sqlx::query("SELECT 1 FROM ledger WHERE reference = ?")
            .bind(&key)
            .fetch_optional(&mut *tx)
            .await?;
        if seen.is_some() {
            return Ok(DeltaApply::Duplicate);
        }

        let current = parse_money(
            &sqlx::query("SELECT balance FROM accounts WHERE owner = ?")
                .bind(owner)
                .fetch_one(&mut *tx)
                .await?
                .try_get::<String, _>("balance")?,
        )?;
        if current != expected_prior {
            return Ok(DeltaApply::Conflict { current });
        }
        let balance = current + delta;
        if balance < Decimal::ZERO {
            return Ok(DeltaApply::Overdraw { current });
        }

        let updated = sqlx::query("UPDATE accounts SET balance = ? WHERE owner = ? AND balance = ?")
            .bind(money(balance))
            .bind(owner)
            .bind(money(current))
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() != 1 {
            return Ok(DeltaApply::Conflict { current });
        }

        let logged = sqlx::query(
            "INSERT OR IGNORE INTO ledger (reference, owner, delta, applied_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&key)
        .bind(owner)
        .bind(money(delta))
        .bind(ts(Utc::now()))
        .execute(&mut *tx)
        .await?;
        if logged.rows_affected() != 1 {
            // Rolled back on drop.
            return Ok(DeltaApply::Duplicate);
        }

        tx.commit().await?;
        Ok(DeltaApply::Applied { balance })
    }
}

#[async_trait]
impl AdminOverrideStore for SqliteStore {
    async fn peek(&self) -> Result<Option<Digit>> {
        let row = sqlx::query("SELECT number FROM admin_override WHERE slot = 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(Digit::new(u8::try_from(r.try_get::<i64, _>("number")?)?)?)),
            None => Ok(None),
        }
    }

    async fn consume(&self) -> Result<Option<Digit>> {
        let row = sqlx::query("DELETE FROM admin_override WHERE slot = 1 RETURNING number")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(Digit::new(u8::try_from(r.try_get::<i64, _>("number")?)?)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, number: Digit) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_override (slot, number) VALUES (1, ?)
             ON CONFLICT(slot) DO UPDATE SET number = excluded.number",
        )
        .bind(i64::from(number.value()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DepositStore for SqliteStore {
    async fn record_deposit(&self, record: &DepositRecord) -> Result<DepositInsert> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO deposits
                (utr, owner, amount, proof, mime_type, status, note, submitted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.utr)
        .bind(&record.owner)
        .bind(money(record.amount))
        .bind(&record.proof)
        .bind(&record.mime_type)
        .bind(record.status.to_string())
        .bind(&record.note)
        .bind(ts(record.submitted_at))
        .execute(&self.pool)
        .await?;
        Ok(if inserted.rows_affected() == 1 {
            DepositInsert::Recorded
        } else {
            DepositInsert::AlreadyRecorded
        })
    }

    async fn find_deposit(&self, utr: &str) -> Result<Option<DepositRecord>> {
        let row = sqlx::query("SELECT * FROM deposits WHERE utr = ?")
            .bind(utr)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn pending_deposits(&self) -> Result<Vec<DepositRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM deposits WHERE status = 'pending' ORDER BY submitted_at, utr",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn mark_deposit_approved(&self, utr: &str) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE deposits SET status = 'approved' WHERE utr = ? AND status = 'pending'",
        )
        .bind(utr)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        match self.find_deposit(utr).await? {
            Some(_) => Ok(false),
            None => Err(anyhow!("no deposit with UTR {utr}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
