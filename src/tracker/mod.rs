//! Position & account state tracking and reconciliation

pub mod position;
pub mod reconciler;
pub mod state;

pub use position::{FillEffect, Position};
pub use reconciler::{initial_reconcile, Reconciler};
pub use state::{PositionTracker, ReconcileOutcome, ReconciliationPlan, StateView};
