//! Risk management: limits, fees and the pre-trade gate

pub mod fees;
pub mod limits;
pub mod manager;

pub use fees::FeeSchedule;
pub use limits::{RiskLimits, SymbolLimits};
pub use manager::{RejectReason, RiskDecision, RiskManager, SizedIntent};
