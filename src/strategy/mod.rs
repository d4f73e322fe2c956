//! Strategy layer: tape reading, strategic setups, risk gating and the
//! position book.

pub mod lifecycle;
pub mod positions;
pub mod risk;
pub mod setups;
pub mod tape_reading;

pub use lifecycle::{LifecycleManager, Transition};
pub use positions::{CloseReason, OpenOutcome, Position, PositionBook, PositionStatus};
pub use risk::{BreakerState, GateOutcome, RiskService, TripReason};
pub use setups::{SetupAction, SetupContext, SetupDetector, SetupEngine};
pub use tape_reading::TapeReadingService;
