//! Slot migration executor.
//!
//! Drives the five-step protocol for one [`ReshardAction`] at a time:
//! mark importing, mark migrating, count keys, transfer keys in batches,
//! finalize ownership everywhere. Actions never overlap. A failed step stops
//! the whole plan; whatever importing/migrating tags it left are logged and
//! left for the operator.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, error, info, instrument};

use super::report::{ReportEntry, Reporter};
use crate::client::{Endpoint, SetSlotCommand, SlotCommands, TopologySnapshot, ValkeyError};
use crate::config::{DEFAULT_MIGRATE_TIMEOUT, DEFAULT_MIGRATION_BATCH_SIZE, ExecutionMode};
use crate::error::ReshardError;
use crate::slots::{MigrationStep, NodeId, ReshardAction, ReshardPlan, SlotMigrationTracker};

/// Totals of an executed plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Actions run to completion (or previewed).
    pub slots_moved: usize,
    /// Keys transferred with MIGRATE.
    pub keys_migrated: u64,
    /// MIGRATE calls issued.
    pub batches: u64,
}

/// Executes reshard actions against per-node connections.
pub struct SlotMigrationExecutor<'a, C> {
    connections: &'a HashMap<NodeId, C>,
    topology: &'a TopologySnapshot,
    batch_size: u64,
    migrate_timeout: Duration,
    mode: ExecutionMode,
}

impl<'a, C: SlotCommands + Sync> SlotMigrationExecutor<'a, C> {
    /// Create an executor. Endpoints of destinations are taken from `topology`.
    pub fn new(
        connections: &'a HashMap<NodeId, C>,
        topology: &'a TopologySnapshot,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            connections,
            topology,
            batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
            migrate_timeout: DEFAULT_MIGRATE_TIMEOUT,
            mode,
        }
    }

    /// Set keys per GETKEYSINSLOT/MIGRATE batch.
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the timeout handed to MIGRATE.
    pub fn with_migrate_timeout(mut self, timeout: Duration) -> Self {
        self.migrate_timeout = timeout;
        self
    }

    /// Execute every action of `plan` in order.
    ///
    /// The batch size and the connections and endpoints for every node the
    /// plan touches are checked before the first action, so a bad one aborts
    /// before any mutation.
    #[instrument(skip_all, fields(mode = %self.mode, actions = plan.len()))]
    pub async fn execute_plan(
        &self,
        plan: &ReshardPlan,
        reporter: &mut Reporter,
    ) -> Result<MigrationSummary, ReshardError> {
        self.check_batch_size()?;
        for action in &plan.actions {
            for node in [&action.from_node, &action.to_node] {
                if !self.connections.contains_key(node) {
                    return Err(ReshardError::MissingConnection(node.clone()));
                }
            }
            if self.topology.endpoint_of(&action.to_node).is_none() {
                return Err(ReshardError::MissingConnection(action.to_node.clone()));
            }
        }

        let mut summary = MigrationSummary::default();
        for action in &plan.actions {
            let tracker = self.execute(action, reporter).await?;
            summary.slots_moved += 1;
            summary.keys_migrated += tracker.keys_migrated;
            summary.batches += tracker.batches;
        }

        info!(
            slots = summary.slots_moved,
            keys = summary.keys_migrated,
            "Reshard plan finished"
        );
        Ok(summary)
    }

    /// Execute one action.
    #[instrument(skip(self, reporter), fields(slot = action.slot, from = %action.from_node, to = %action.to_node))]
    pub async fn execute(
        &self,
        action: &ReshardAction,
        reporter: &mut Reporter,
    ) -> Result<SlotMigrationTracker, ReshardError> {
        self.check_batch_size()?;
        let slot = action.slot;
        let mut tracker =
            SlotMigrationTracker::new(slot, action.from_node.clone(), action.to_node.clone());

        let source = self.connection(&action.from_node)?;
        let destination = self.connection(&action.to_node)?;
        let destination_endpoint: Endpoint = self
            .topology
            .endpoint_of(&action.to_node)
            .ok_or_else(|| ReshardError::MissingConnection(action.to_node.clone()))?;

        if self.mode.is_commit() {
            destination
                .set_slot(slot, SetSlotCommand::Importing(&action.from_node))
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::MarkImporting, e))?;
            tracker.mark_importing();
        }
        if self.mode.is_commit() {
            source
                .set_slot(slot, SetSlotCommand::Migrating(&action.to_node))
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::MarkMigrating, e))?;
            tracker.mark_migrating();
        }

        // Read-only, so issued in preview too.
        let total = source
            .count_keys_in_slot(slot)
            .await
            .map_err(|e| self.fail(&mut tracker, MigrationStep::CountKeys, e))?;
        tracker.begin_transfer(total);
        reporter.record(ReportEntry::Move {
            slot,
            from: action.from_node.clone(),
            to: action.to_node.clone(),
            keys: total,
            mode: self.mode,
        });
        info!(keys = total, mode = %self.mode, "Moving slot");

        while self.mode.is_commit() {
            let keys = source
                .get_keys_in_slot(slot, self.batch_size)
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::FetchKeys, e))?;
            if keys.is_empty() {
                break;
            }
            let count = keys.len() as u64;
            source
                .migrate(&destination_endpoint, &keys, self.migrate_timeout)
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::TransferKeys, e))?;
            tracker.record_batch(count);
            reporter.record(ReportEntry::KeyBatch { slot, keys: count });
            debug!(batch = count, moved = tracker.keys_migrated, "Migrated key batch");
        }

        tracker.begin_finalize();
        let owner = SetSlotCommand::Node(&action.to_node);
        if self.mode.is_commit() {
            destination
                .set_slot(slot, owner.clone())
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::FinalizeDestination, e))?;
            tracker.record_finalized(&action.to_node);
        }
        if self.mode.is_commit() {
            source
                .set_slot(slot, owner.clone())
                .await
                .map_err(|e| self.fail(&mut tracker, MigrationStep::FinalizeSource, e))?;
            tracker.record_finalized(&action.from_node);
        }

        let mut others: Vec<&NodeId> = self
            .connections
            .keys()
            .filter(|id| **id != action.from_node && **id != action.to_node)
            .collect();
        others.sort();
        for node in others {
            let Some(connection) = self.connections.get(node) else {
                continue;
            };
            if self.mode.is_commit() {
                connection.set_slot(slot, owner.clone()).await.map_err(|e| {
                    self.fail(
                        &mut tracker,
                        MigrationStep::Broadcast { node: node.clone() },
                        e,
                    )
                })?;
                tracker.record_finalized(node);
            }
        }

        tracker.complete();
        if self.mode.is_commit() {
            info!(
                keys = tracker.keys_migrated,
                batches = tracker.batches,
                "Slot migrated"
            );
        }
        Ok(tracker)
    }

    // GETKEYSINSLOT with a count of 0 returns nothing, which reads as an
    // empty slot and would finalize with the keys still on the source.
    fn check_batch_size(&self) -> Result<(), ReshardError> {
        if self.batch_size == 0 {
            return Err(ReshardError::InvalidConfiguration(
                "migration batch size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn connection(&self, node: &NodeId) -> Result<&'a C, ReshardError> {
        self.connections
            .get(node)
            .ok_or_else(|| ReshardError::MissingConnection(node.clone()))
    }

    fn fail(
        &self,
        tracker: &mut SlotMigrationTracker,
        step: MigrationStep,
        error: ValkeyError,
    ) -> ReshardError {
        tracker.fail(step.clone(), error.to_string());
        let residue: Vec<String> = tracker
            .residual_states()
            .iter()
            .map(|(node, state)| format!("{}={}", node, state))
            .collect();
        error!(
            slot = tracker.slot,
            from = %tracker.source_node,
            to = %tracker.target_node,
            step = %step,
            error = %error,
            residue = ?residue,
            "Slot migration failed, manual repair required"
        );
        ReshardError::ProtocolStepFailure {
            slot: tracker.slot,
            source_node: tracker.source_node.clone(),
            destination: tracker.target_node.clone(),
            step,
            error,
        }
    }
}
