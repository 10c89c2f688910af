//! Slot migration state machine.
//!
//! This module models the Valkey slot migration protocol driven for one action:
//! 1. SETSLOT IMPORTING on the destination
//! 2. SETSLOT MIGRATING on the source
//! 3. COUNTKEYSINSLOT on the source
//! 4. GETKEYSINSLOT / MIGRATE ... REPLACE in batches
//! 5. SETSLOT NODE on destination, source, then every known node
//!
//! A failed action is never rolled back. The tracker records which protocol
//! tags the failure left on which node so the operator can repair them.

use serde::Serialize;

use super::planner::NodeId;

/// Per-node protocol state of a single slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    /// No migration tag on this node.
    #[default]
    Stable,
    /// The node accepts the slot from `from` (`[slot-<-from]`).
    Importing { from: NodeId },
    /// The node hands the slot over to `to` (`[slot->-to]`).
    Migrating { to: NodeId },
}

impl SlotState {
    /// Check whether the slot carries no migration tag.
    pub fn is_stable(&self) -> bool {
        matches!(self, SlotState::Stable)
    }
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotState::Stable => write!(f, "stable"),
            SlotState::Importing { from } => write!(f, "importing@{}", from),
            SlotState::Migrating { to } => write!(f, "migrating@{}", to),
        }
    }
}

/// One protocol call of a slot migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// SETSLOT IMPORTING on the destination.
    MarkImporting,
    /// SETSLOT MIGRATING on the source.
    MarkMigrating,
    /// COUNTKEYSINSLOT on the source.
    CountKeys,
    /// GETKEYSINSLOT on the source.
    FetchKeys,
    /// MIGRATE of one batch.
    TransferKeys,
    /// SETSLOT NODE on the destination.
    FinalizeDestination,
    /// SETSLOT NODE on the source.
    FinalizeSource,
    /// SETSLOT NODE sent to a node that is neither source nor destination.
    Broadcast { node: NodeId },
}

impl MigrationStep {
    /// Whether a failure at this step can leave importing/migrating tags behind.
    ///
    /// Mark-importing is the first mutation. By the time a broadcast runs both
    /// source and destination have been finalized and carry no tag.
    pub fn leaves_residue(&self) -> bool {
        !matches!(
            self,
            MigrationStep::MarkImporting | MigrationStep::Broadcast { .. }
        )
    }
}

impl std::fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStep::MarkImporting => write!(f, "mark importing"),
            MigrationStep::MarkMigrating => write!(f, "mark migrating"),
            MigrationStep::CountKeys => write!(f, "count keys"),
            MigrationStep::FetchKeys => write!(f, "fetch keys"),
            MigrationStep::TransferKeys => write!(f, "transfer keys"),
            MigrationStep::FinalizeDestination => write!(f, "finalize destination"),
            MigrationStep::FinalizeSource => write!(f, "finalize source"),
            MigrationStep::Broadcast { node } => write!(f, "broadcast owner to {}", node),
        }
    }
}

/// State of a single slot migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationState {
    /// Migration not started.
    #[default]
    Pending,
    /// Destination node is importing (SETSLOT IMPORTING sent).
    Importing,
    /// Source node is migrating (SETSLOT MIGRATING sent).
    Migrating,
    /// Keys are being transferred.
    TransferringKeys {
        /// Number of keys moved so far.
        moved: u64,
        /// Number of keys counted in the slot before the first batch.
        total: u64,
    },
    /// Ownership is being propagated to all nodes.
    Finalizing,
    /// Migration complete.
    Complete,
    /// Migration failed.
    Failed {
        /// The protocol call that failed.
        step: MigrationStep,
        /// Error description.
        error: String,
    },
}

impl MigrationState {
    /// Check if this state indicates the migration is done.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationState::Complete | MigrationState::Failed { .. }
        )
    }

    /// Check if the migration completed successfully.
    pub fn is_complete(&self) -> bool {
        matches!(self, MigrationState::Complete)
    }

    /// Check if the migration failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationState::Failed { .. })
    }

    /// Check if the migration is in progress.
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal() && !matches!(self, MigrationState::Pending)
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::Importing => write!(f, "importing"),
            MigrationState::Migrating => write!(f, "migrating"),
            MigrationState::TransferringKeys { moved, total } => {
                write!(f, "transferring ({}/{})", moved, total)
            }
            MigrationState::Finalizing => write!(f, "finalizing"),
            MigrationState::Complete => write!(f, "complete"),
            MigrationState::Failed { step, error } => {
                write!(f, "failed at {}: {}", step, error)
            }
        }
    }
}

/// Tracks the protocol progress of one slot migration.
#[derive(Debug, Clone)]
pub struct SlotMigrationTracker {
    /// The slot being migrated.
    pub slot: u16,
    /// Source node ID.
    pub source_node: NodeId,
    /// Destination node ID.
    pub target_node: NodeId,
    /// Current state of the migration.
    pub state: MigrationState,
    /// Keys counted in the slot when the transfer began.
    pub initial_keys: u64,
    /// Total keys migrated so far.
    pub keys_migrated: u64,
    /// Number of MIGRATE batches sent.
    pub batches: u64,
    importing_marked: bool,
    migrating_marked: bool,
    finalized_on: Vec<NodeId>,
}

impl SlotMigrationTracker {
    /// Create a new migration tracker.
    pub fn new(slot: u16, source: NodeId, target: NodeId) -> Self {
        Self {
            slot,
            source_node: source,
            target_node: target,
            state: MigrationState::Pending,
            initial_keys: 0,
            keys_migrated: 0,
            batches: 0,
            importing_marked: false,
            migrating_marked: false,
            finalized_on: Vec::new(),
        }
    }

    /// Record that the destination accepted the importing tag.
    pub fn mark_importing(&mut self) {
        self.importing_marked = true;
        self.state = MigrationState::Importing;
    }

    /// Record that the source accepted the migrating tag.
    pub fn mark_migrating(&mut self) {
        self.migrating_marked = true;
        self.state = MigrationState::Migrating;
    }

    /// Record the key count observed before the first batch.
    pub fn begin_transfer(&mut self, total: u64) {
        self.initial_keys = total;
        self.state = MigrationState::TransferringKeys { moved: 0, total };
    }

    /// Record one transferred batch.
    pub fn record_batch(&mut self, count: u64) {
        self.keys_migrated += count;
        self.batches += 1;
        self.state = MigrationState::TransferringKeys {
            moved: self.keys_migrated,
            total: self.initial_keys,
        };
    }

    /// Enter the ownership finalize phase.
    pub fn begin_finalize(&mut self) {
        self.state = MigrationState::Finalizing;
    }

    /// Record that `node` now routes the slot to the destination.
    pub fn record_finalized(&mut self, node: &str) {
        if !self.finalized_on.iter().any(|n| n == node) {
            self.finalized_on.push(node.to_string());
        }
    }

    /// Mark as failed at `step`.
    pub fn fail(&mut self, step: MigrationStep, error: impl Into<String>) {
        self.state = MigrationState::Failed {
            step,
            error: error.into(),
        };
    }

    /// Mark as complete.
    pub fn complete(&mut self) {
        self.state = MigrationState::Complete;
    }

    /// Check if the migration is done.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check if the migration completed successfully.
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Check if the migration failed.
    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    /// Protocol tags still set on the source and destination.
    ///
    /// SETSLOT NODE clears a node's importing/migrating tag, so a node that
    /// was finalized no longer reports one.
    pub fn residual_states(&self) -> Vec<(NodeId, SlotState)> {
        let mut residue = Vec::new();
        let finalized = |node: &str| self.finalized_on.iter().any(|n| n == node);

        if self.importing_marked && !finalized(&self.target_node) {
            residue.push((
                self.target_node.clone(),
                SlotState::Importing {
                    from: self.source_node.clone(),
                },
            ));
        }
        if self.migrating_marked && !finalized(&self.source_node) {
            residue.push((
                self.source_node.clone(),
                SlotState::Migrating {
                    to: self.target_node.clone(),
                },
            ));
        }
        residue
    }
}
