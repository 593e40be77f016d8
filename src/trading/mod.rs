//! Trading logic: signal scoring, sizing, lifecycle and rotation.

pub mod config;
pub mod lifecycle;
pub mod rotation;
pub mod scorer;
pub mod sizer;

pub use config::StrategyConfig;
pub use lifecycle::{EntryContext, ExitDecision, LifecycleManager};
pub use rotation::{HeldSnapshot, RotationCoordinator, RotationPlan};
pub use scorer::{score_bundle, ScoredSignal};
pub use sizer::PositionSizer;
