//! Cycle actions emitted by the orchestrator and persisted to the action log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the engine decided to do for an instrument this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// New entry
    Open,
    /// Partial exit (profit-ladder rung)
    ScaleOut,
    /// Full exit
    Close,
    /// Sell-then-buy swap proposed by the rotation coordinator
    Rotate,
    /// No qualifying signal this cycle
    Hold,
    /// Governor veto recorded for the cycle
    RiskHalt,
    /// Sell below the exchange minimum; logged, no order sent
    Dust,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Open => "OPEN",
            ActionKind::ScaleOut => "SCALE_OUT",
            ActionKind::Close => "CLOSE",
            ActionKind::Rotate => "ROTATE",
            ActionKind::Hold => "HOLD",
            ActionKind::RiskHalt => "RISK_HALT",
            ActionKind::Dust => "DUST",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only action-log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleAction {
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    pub symbol: Option<String>,
    pub rationale: String,
}

impl CycleAction {
    pub fn new(kind: ActionKind, symbol: Option<String>, rationale: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            symbol,
            rationale: rationale.into(),
        }
    }
}
