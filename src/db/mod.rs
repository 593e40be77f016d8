//! SQLite persistence for crash recovery and the action log.
//!
//! Stores everything needed to resume after a restart:
//! - Open positions, including high-water marks, entry ATR and which
//!   profit-ladder rungs have already fired
//! - The equity history the risk governor derives drawdown from
//! - An append-only log of every action the engine took and why

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{CycleAction, Position, PositionState};

pub struct Database {
    pool: SqlitePool,
}

/// Position row as stored; converted on load.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    symbol: String,
    quantity: String,
    entry_price: String,
    opened_at: String,
    high_water_mark: String,
    entry_atr_pct: f64,
    triggered_levels: String,
}

impl StoredPosition {
    fn into_position(self) -> Result<Position> {
        let triggered: HashSet<usize> = serde_json::from_str(&self.triggered_levels)
            .with_context(|| format!("Bad triggered_levels for {}", self.symbol))?;

        Ok(Position {
            symbol: self.symbol.clone(),
            quantity: self
                .quantity
                .parse()
                .with_context(|| format!("Bad quantity for {}", self.symbol))?,
            entry_price: self
                .entry_price
                .parse()
                .with_context(|| format!("Bad entry price for {}", self.symbol))?,
            opened_at: DateTime::parse_from_rfc3339(&self.opened_at)
                .with_context(|| format!("Bad opened_at for {}", self.symbol))?
                .with_timezone(&Utc),
            high_water_mark: self
                .high_water_mark
                .parse()
                .with_context(|| format!("Bad high-water mark for {}", self.symbol))?,
            entry_atr_pct: self.entry_atr_pct,
            triggered_levels: triggered,
            state: PositionState::Open,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredAction {
    timestamp: String,
    kind: String,
    symbol: Option<String>,
    rationale: String,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        // Open positions; decimal fields stored as text to keep exactness
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                quantity TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                high_water_mark TEXT NOT NULL,
                entry_atr_pct REAL NOT NULL,
                triggered_levels TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Action log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT,
                rationale TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Equity history for drawdown tracking
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                equity TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_time ON actions(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_equity_history_time ON equity_history(timestamp)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Positions ====================

    /// Insert or update one position's full lifecycle state.
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let triggered = serde_json::to_string(
            &position.triggered_levels.iter().copied().collect::<Vec<_>>(),
        )?;

        sqlx::query(
            r#"
            INSERT INTO positions
                (symbol, quantity, entry_price, opened_at, high_water_mark,
                 entry_atr_pct, triggered_levels, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                quantity = excluded.quantity,
                high_water_mark = excluded.high_water_mark,
                triggered_levels = excluded.triggered_levels,
                updated_at = datetime('now')
            "#,
        )
        .bind(&position.symbol)
        .bind(position.quantity.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.opened_at.to_rfc3339())
        .bind(position.high_water_mark.to_string())
        .bind(position.entry_atr_pct)
        .bind(triggered)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a fully exited position.
    pub async fn delete_position(&self, symbol: &str) -> Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load every persisted position for crash recovery.
    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            "SELECT symbol, quantity, entry_price, opened_at, high_water_mark,
                    entry_atr_pct, triggered_levels
             FROM positions",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredPosition::into_position).collect()
    }

    // ==================== Action log ====================

    pub async fn log_action(&self, action: &CycleAction) -> Result<()> {
        sqlx::query(
            "INSERT INTO actions (timestamp, kind, symbol, rationale) VALUES (?, ?, ?, ?)",
        )
        .bind(action.timestamp.to_rfc3339())
        .bind(action.kind.as_str())
        .bind(&action.symbol)
        .bind(&action.rationale)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent actions, newest first.
    pub async fn recent_actions(&self, limit: u32) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query_as::<_, StoredAction>(
            "SELECT timestamp, kind, symbol, rationale
             FROM actions ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.timestamp,
                    match r.symbol {
                        Some(s) => format!("{} {}", r.kind, s),
                        None => r.kind,
                    },
                    r.rationale,
                )
            })
            .collect())
    }

    // ==================== Equity history ====================

    pub async fn record_equity(&self, timestamp: DateTime<Utc>, equity: Decimal) -> Result<()> {
        sqlx::query("INSERT INTO equity_history (timestamp, equity) VALUES (?, ?)")
            .bind(timestamp.to_rfc3339())
            .bind(equity.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The newest `limit` equity points, returned oldest first.
    pub async fn load_equity_history(
        &self,
        limit: u32,
    ) -> Result<Vec<(DateTime<Utc>, Decimal)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT timestamp, equity FROM
                (SELECT id, timestamp, equity FROM equity_history ORDER BY id DESC LIMIT ?)
             ORDER BY id ASC",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(ts, equity)| {
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .context("Bad equity timestamp")?
                    .with_timezone(&Utc);
                let equity: Decimal = equity.parse().context("Bad equity value")?;
                Ok((timestamp, equity))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionKind;
    use rust_decimal_macros::dec;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn position_round_trips_with_lifecycle_state() {
        let db = memory_db().await;

        let mut pos = Position::new(
            "BTCUSDT".to_string(),
            dec!(0.5),
            dec!(30000),
            2.4,
            Utc::now(),
        );
        pos.observe_price(dec!(31500));
        pos.mark_level_triggered(0);
        pos.mark_level_triggered(1);
        db.save_position(&pos).await.unwrap();

        let loaded = db.load_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let restored = &loaded[0];
        assert_eq!(restored.symbol, "BTCUSDT");
        assert_eq!(restored.quantity, dec!(0.5));
        assert_eq!(restored.high_water_mark, dec!(31500));
        assert!((restored.entry_atr_pct - 2.4).abs() < 1e-9);
        assert!(restored.triggered_levels.contains(&0));
        assert!(restored.triggered_levels.contains(&1));
        assert!(!restored.triggered_levels.contains(&2));
    }

    #[tokio::test]
    async fn closed_positions_are_deleted() {
        let db = memory_db().await;
        let pos = Position::new("ETHUSDT".to_string(), dec!(1), dec!(2000), 1.5, Utc::now());
        db.save_position(&pos).await.unwrap();

        db.delete_position("ETHUSDT").await.unwrap();
        assert!(db.load_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn equity_history_restores_in_order() {
        let db = memory_db().await;
        let t0 = Utc::now();
        for (i, equity) in [dec!(1000), dec!(1020), dec!(990)].iter().enumerate() {
            db.record_equity(t0 + chrono::Duration::minutes(i as i64), *equity)
                .await
                .unwrap();
        }

        let history = db.load_equity_history(10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].1, dec!(1000));
        assert_eq!(history[2].1, dec!(990));

        // Limit keeps only the newest points
        let tail = db.load_equity_history(2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].1, dec!(1020));
    }

    #[tokio::test]
    async fn actions_are_logged_newest_first() {
        let db = memory_db().await;
        db.log_action(&CycleAction::new(
            ActionKind::Open,
            Some("BTCUSDT".to_string()),
            "score 42.0",
        ))
        .await
        .unwrap();
        db.log_action(&CycleAction::new(ActionKind::Hold, None, "no candidates"))
            .await
            .unwrap();

        let actions = db.recent_actions(10).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].1, "HOLD");
        assert_eq!(actions[1].1, "OPEN BTCUSDT");
    }
}
