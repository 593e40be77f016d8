//! Core data model: indicator bundles, positions, account state, actions.

pub mod account;
pub mod action;
pub mod bundle;
pub mod position;

pub use account::AccountState;
pub use action::{ActionKind, CycleAction};
pub use bundle::{DivergenceKind, IndicatorBundle, MacdSignal, Regime, Trend, VolumeTrend};
pub use position::{Position, PositionState, PositionStore};
