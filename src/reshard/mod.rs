//! Reshard pipeline.
//!
//! [`Resharder::run`] composes the pure planning in [`crate::slots`] with the
//! side-effecting pieces of this module:
//!
//! 1. Fetch topology, report nodes and current ownership
//! 2. Resolve node order, compute and report desired ownership
//! 3. Optionally report per-slot key counts
//! 4. Optionally claim unowned slots ([`UnassignedSlotAssigner`])
//! 5. Optionally re-fetch topology, diff, and migrate ([`SlotMigrationExecutor`])
//!
//! Ownership is never carried from one phase to the next; every phase that
//! depends on it asks the cluster again.

pub mod assigner;
pub mod executor;
pub mod inspect;
pub mod report;

use std::collections::HashMap;

use tracing::{info, instrument, warn};

pub use assigner::UnassignedSlotAssigner;
pub use executor::{MigrationSummary, SlotMigrationExecutor};
pub use inspect::{StrayKeys, count_keys_in_slots};
pub use report::{ReportEntry, Reporter};

use crate::client::{SlotCommands, TopologySnapshot, TopologySource};
use crate::config::{ExecutionMode, ReshardConfig};
use crate::error::ReshardError;
use crate::slots::{
    AssignmentPlan, DesiredOwnership, NodeId, NodeOrderRequest, SlotRange, build_reshard_plan,
    calculate_distribution, eligible_masters, plan_unassigned, resolve_node_order,
};

/// What one run did (or, in preview, would have done).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Mode the run was executed in.
    pub mode: ExecutionMode,
    /// Node order the desired ranges were assigned with.
    pub node_order: Vec<NodeId>,
    /// Slots claimed by the unassigned-slot pass.
    pub slots_claimed: usize,
    /// The run stopped after bootstrapping an empty cluster.
    pub bootstrapped: bool,
    /// Totals of the migration pass.
    pub migration: MigrationSummary,
    /// Slots the diff skipped for lack of an owner.
    pub unowned_skipped: usize,
    /// Keys found on nodes that do not own their slot.
    pub stray_keys: Vec<StrayKeys>,
}

/// Runs the configured phases against one cluster.
pub struct Resharder<'a, T, C> {
    topology: &'a T,
    connections: &'a HashMap<NodeId, C>,
    config: &'a ReshardConfig,
}

impl<'a, T, C> Resharder<'a, T, C>
where
    T: TopologySource + Sync,
    C: SlotCommands + Sync,
{
    /// `connections` must hold one connection per master, keyed by node ID.
    pub fn new(
        topology: &'a T,
        connections: &'a HashMap<NodeId, C>,
        config: &'a ReshardConfig,
    ) -> Self {
        Self {
            topology,
            connections,
            config,
        }
    }

    /// Execute the run. The caller closes the report with [`Reporter::finish`].
    #[instrument(skip_all, fields(mode = %self.config.mode, target = %self.config.target))]
    pub async fn run(&self, reporter: &mut Reporter) -> Result<RunSummary, ReshardError> {
        self.config.validate()?;
        let mode = self.config.mode;
        let mut summary = RunSummary {
            mode,
            ..Default::default()
        };

        let snapshot = self.topology.fetch_topology().await?;
        let ownership = snapshot.ownership();
        reporter.record_topology(&snapshot, &ownership);

        let mutating = self.config.assign || self.config.reshard;
        if mutating {
            self.check_no_migrations_in_flight(&snapshot).await?;
        }

        let desired = self.desired_ownership(&snapshot)?;
        summary.node_order = desired.assignments().iter().map(|(_, n)| n.clone()).collect();
        reporter.record_desired(&desired, &summary.node_order);

        if self.config.count_keys_in_slots {
            summary.stray_keys = count_keys_in_slots(self.connections, &ownership, reporter).await?;
        }

        if self.config.assign {
            let plan = plan_unassigned(&ownership, &desired);
            let assigner = UnassignedSlotAssigner::new(self.connections, mode);
            summary.slots_claimed = assigner.assign(&plan, reporter).await?;
            if let AssignmentPlan::EmptyCluster(_) = plan {
                // Nothing can be misplaced in a cluster that had no slots.
                summary.bootstrapped = true;
                info!(slots = summary.slots_claimed, "Empty cluster bootstrapped");
                return Ok(summary);
            }
        }

        if self.config.reshard {
            // Fresh view: the assignment pass or the operator may have changed it.
            let snapshot = self.topology.fetch_topology().await?;
            self.check_no_migrations_in_flight(&snapshot).await?;
            let plan = build_reshard_plan(&snapshot.ownership(), &desired);

            summary.unowned_skipped = plan.unowned_slots.len();
            if !plan.unowned_slots.is_empty() {
                warn!(
                    count = plan.unowned_slots.len(),
                    "Unowned slots skipped, run with assignment to claim them"
                );
                for range in SlotRange::coalesce(plan.unowned_slots.iter().copied()) {
                    reporter.record(ReportEntry::UnownedSlotsSkipped { range });
                }
            }

            if plan.is_empty() {
                info!("No actions needed");
                reporter.record(ReportEntry::NoActionsNeeded);
            } else {
                info!(actions = plan.len(), pairs = ?plan.moves_by_pair(), "Reshard plan built");
                let executor = SlotMigrationExecutor::new(self.connections, &snapshot, mode)
                    .with_batch_size(self.config.migration_batch_size)
                    .with_migrate_timeout(self.config.migrate_timeout);
                summary.migration = executor.execute_plan(&plan, reporter).await?;
            }
        }

        Ok(summary)
    }

    fn desired_ownership(&self, snapshot: &TopologySnapshot) -> Result<DesiredOwnership, ReshardError> {
        let masters = snapshot.master_ids();
        let eligible = eligible_masters(&masters, &self.config.exclude_node_ids);
        if eligible.is_empty() {
            return Err(ReshardError::InvalidConfiguration(
                "cluster has no eligible master".to_string(),
            ));
        }

        let ranges = calculate_distribution(eligible.len())?;
        let ownership = snapshot.ownership();
        let order = resolve_node_order(NodeOrderRequest {
            current: &ownership,
            masters: &masters,
            explicit_order: self.config.node_order.as_deref(),
            excluded: &self.config.exclude_node_ids,
            range_count: ranges.len(),
        })?;
        DesiredOwnership::new(ranges, order)
    }

    /// Refuse to go on while any master holds an importing/migrating tag.
    ///
    /// Each master only reports its own tags, so every master is asked.
    async fn check_no_migrations_in_flight(
        &self,
        snapshot: &TopologySnapshot,
    ) -> Result<(), ReshardError> {
        let mut markers = snapshot.migration_markers();
        for master in snapshot.master_ids() {
            let connection = self
                .connections
                .get(&master)
                .ok_or_else(|| ReshardError::MissingConnection(master.clone()))?;
            for (slot, state) in connection.local_migrations().await? {
                let marker = (master.clone(), slot, state);
                if !markers.contains(&marker) {
                    markers.push(marker);
                }
            }
        }
        if markers.is_empty() {
            return Ok(());
        }

        let mut slots: Vec<u16> = markers.iter().map(|(_, slot, _)| *slot).collect();
        slots.sort_unstable();
        slots.dedup();
        for (node, slot, state) in &markers {
            warn!(node = %node, slot, state = %state, "Slot left mid-migration");
        }
        Err(ReshardError::SlotsInMigration { slots })
    }
}
