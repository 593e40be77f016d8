//! Position lifecycle records and the store that owns them.
//!
//! A `Position` is created on entry fill and mutated only by the lifecycle
//! manager: the high-water mark moves up with observed prices, the
//! triggered-level set grows as partial-profit rungs fire, and only a full
//! exit clears lifecycle state.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Lifecycle state. There is no reopening: a new entry creates a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Open,
    Closed,
}

/// One live position in a single instrument.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub opened_at: DateTime<Utc>,

    /// Highest price observed since entry; monotonically non-decreasing.
    pub high_water_mark: Decimal,

    /// ATR% captured at entry, used for the life of the position.
    pub entry_atr_pct: f64,

    /// Indices into the partial-profit ladder that have already fired.
    pub triggered_levels: HashSet<usize>,

    pub state: PositionState,
}

impl Position {
    pub fn new(
        symbol: String,
        quantity: Decimal,
        entry_price: Decimal,
        entry_atr_pct: f64,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            quantity,
            entry_price,
            opened_at,
            high_water_mark: entry_price,
            entry_atr_pct,
            triggered_levels: HashSet::new(),
            state: PositionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Fold a newly observed price into the high-water mark.
    pub fn observe_price(&mut self, price: Decimal) {
        if price > self.high_water_mark {
            self.high_water_mark = price;
        }
    }

    /// Unrealized P&L as a percentage of the entry price.
    pub fn pnl_pct(&self, price: Decimal) -> f64 {
        if self.entry_price.is_zero() {
            return 0.0;
        }
        ((price - self.entry_price) / self.entry_price * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Retracement from the high-water mark, in percent (>= 0).
    pub fn retracement_pct(&self, price: Decimal) -> f64 {
        if self.high_water_mark.is_zero() {
            return 0.0;
        }
        ((self.high_water_mark - price) / self.high_water_mark * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
            .max(0.0)
    }

    /// Hours since the position was opened.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.opened_at).num_seconds() as f64 / 3600.0
    }

    /// Mark a ladder rung as triggered. Returns false if it already fired,
    /// which makes each rung fire at most once per position lifetime.
    pub fn mark_level_triggered(&mut self, level_idx: usize) -> bool {
        self.triggered_levels.insert(level_idx)
    }

    /// Reduce quantity after a partial fill. Lifecycle state stays intact.
    pub fn reduce(&mut self, sold: Decimal) {
        self.quantity = (self.quantity - sold).max(Decimal::ZERO);
    }

    /// Full exit: terminal state, auxiliary lifecycle fields cleared.
    pub fn close(&mut self) {
        self.state = PositionState::Closed;
        self.quantity = Decimal::ZERO;
        self.triggered_levels.clear();
    }

    /// Current market value at the given price.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}

/// Owner of all live positions, keyed by instrument symbol.
///
/// Access goes through the lifecycle manager; nothing else holds mutable
/// references to positions.
#[derive(Debug, Default)]
pub struct PositionStore {
    inner: HashMap<String, Position>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly opened position, replacing any closed remnant.
    pub fn insert(&mut self, position: Position) {
        self.inner.insert(position.symbol.clone(), position);
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.inner.get(symbol).filter(|p| p.is_open())
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.inner.get_mut(symbol).filter(|p| p.is_open())
    }

    /// Close and remove a position record.
    pub fn close(&mut self, symbol: &str) -> Option<Position> {
        if let Some(pos) = self.inner.get_mut(symbol) {
            pos.close();
        }
        self.inner.remove(symbol)
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.inner
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.symbol.clone())
            .collect()
    }

    pub fn iter_open(&self) -> impl Iterator<Item = &Position> {
        self.inner.values().filter(|p| p.is_open())
    }

    pub fn open_count(&self) -> usize {
        self.inner.values().filter(|p| p.is_open()).count()
    }
}
