//! Pure slot management logic for Valkey clusters.
//!
//! This module provides testable, pure functions for slot distribution and reshard planning.
//! It separates the computation of "what slots to move" from "how to move them".
//!
//! ## Module Structure
//!
//! - [`distribution`]: Pure slot distribution calculations
//! - [`order`]: Which node receives which desired range
//! - [`planner`]: Ownership diff, chain-ordered `ReshardPlan`, unassigned-slot claims
//! - [`migration`]: State machine for the migration protocol

pub mod distribution;
pub mod migration;
pub mod order;
pub mod planner;

// Re-export commonly used types
pub use distribution::{SlotRange, TOTAL_SLOTS, calculate_distribution, slot_owner};
pub use migration::{MigrationState, MigrationStep, SlotMigrationTracker, SlotState};
pub use order::{NodeOrderRequest, eligible_masters, resolve_node_order};
pub use planner::{
    AssignmentPlan, ClusterSlotState, DesiredOwnership, NodeId, ReshardAction, ReshardPlan,
    SlotClaim, build_reshard_plan, order_by_chain, plan_unassigned,
};
