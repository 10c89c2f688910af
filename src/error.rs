//! Error types for planning and executing a reshard.
//!
//! Planning errors abort before any mutating call is issued. Execution errors
//! are fatal for the action they occurred in and stop the run; nothing is
//! retried.

use thiserror::Error;

use crate::client::ValkeyError;
use crate::slots::migration::MigrationStep;
use crate::slots::{NodeId, SlotRange};

/// Error type for reshard operations
#[derive(Error, Debug)]
pub enum ReshardError {
    /// Bad node count, zero masters, unusable settings
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Explicit node order does not fit the desired distribution
    #[error("Configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// Fewer eligible masters than desired ranges
    #[error("Insufficient nodes: {required} ranges need a node each, only {available} eligible")]
    InsufficientNodes { required: usize, available: usize },

    /// The live cluster already has slots mid-migration
    #[error("Slots already in importing/migrating state: {}", format_slots(.slots))]
    SlotsInMigration { slots: Vec<u16> },

    /// No connection was bootstrapped for a node the plan needs
    #[error("No connection for node {0}")]
    MissingConnection(NodeId),

    /// Claiming unassigned slots failed
    #[error("Failed to assign slots {range} to node {node}: {error}")]
    ClaimFailure {
        range: SlotRange,
        node: NodeId,
        #[source]
        error: ValkeyError,
    },

    /// A migration protocol call failed for one slot
    #[error(
        "Migration of slot {slot} from {source_node} to {destination} failed at step '{step}': {error}"
    )]
    ProtocolStepFailure {
        slot: u16,
        source_node: NodeId,
        destination: NodeId,
        step: MigrationStep,
        #[source]
        error: ValkeyError,
    },

    /// Topology discovery failed
    #[error("Topology error: {0}")]
    Topology(#[from] ValkeyError),
}

impl ReshardError {
    /// Check if this error was raised by planning logic alone.
    ///
    /// These errors are raised before any mutating call, in preview and
    /// commit mode alike. Topology and connection errors are not included:
    /// the diff fetches topology and checks connections again after the
    /// assignment pass may already have claimed slots.
    pub fn aborts_before_mutation(&self) -> bool {
        matches!(
            self,
            ReshardError::InvalidConfiguration(_)
                | ReshardError::ConfigurationMismatch(_)
                | ReshardError::InsufficientNodes { .. }
                | ReshardError::SlotsInMigration { .. }
        )
    }

    /// The slot a failed protocol step left in a non-stable state, if any.
    pub fn stranded_slot(&self) -> Option<u16> {
        match self {
            ReshardError::ProtocolStepFailure { slot, step, .. } if step.leaves_residue() => {
                Some(*slot)
            }
            _ => None,
        }
    }
}

fn format_slots(slots: &[u16]) -> String {
    SlotRange::coalesce(slots.iter().copied())
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Result type alias for reshard operations
pub type Result<T> = std::result::Result<T, ReshardError>;
