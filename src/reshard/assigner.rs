//! Claims for slots nobody owns.

use std::collections::HashMap;

use tracing::{info, instrument};

use super::report::{ReportEntry, Reporter};
use crate::client::SlotCommands;
use crate::config::ExecutionMode;
use crate::error::ReshardError;
use crate::slots::{AssignmentPlan, NodeId};

/// Issues `CLUSTER ADDSLOTS` for an [`AssignmentPlan`].
///
/// Claims are not migrations: no data exists in an unowned slot, so no
/// transfer protocol is involved.
pub struct UnassignedSlotAssigner<'a, C> {
    connections: &'a HashMap<NodeId, C>,
    mode: ExecutionMode,
}

impl<'a, C: SlotCommands + Sync> UnassignedSlotAssigner<'a, C> {
    /// Create an assigner over per-master connections keyed by node ID.
    pub fn new(connections: &'a HashMap<NodeId, C>, mode: ExecutionMode) -> Self {
        Self { connections, mode }
    }

    /// Report every claim of `plan`, issuing it when committing.
    ///
    /// Returns the number of slots claimed (or that would be claimed).
    #[instrument(skip_all, fields(mode = %self.mode, claims = plan.claims().len()))]
    pub async fn assign(
        &self,
        plan: &AssignmentPlan,
        reporter: &mut Reporter,
    ) -> Result<usize, ReshardError> {
        let claims = plan.claims();
        if let Some(missing) = claims
            .iter()
            .find(|claim| !self.connections.contains_key(&claim.node))
        {
            return Err(ReshardError::MissingConnection(missing.node.clone()));
        }

        if let AssignmentPlan::EmptyCluster(_) = plan {
            info!("Cluster is empty, assigning desired ranges");
        }

        let mut slots = 0;
        for claim in claims {
            reporter.record(ReportEntry::Claim {
                range: claim.range,
                node: claim.node.clone(),
                mode: self.mode,
            });

            if self.mode.is_commit() {
                let connection = self
                    .connections
                    .get(&claim.node)
                    .ok_or_else(|| ReshardError::MissingConnection(claim.node.clone()))?;
                connection
                    .add_slots(claim.range.iter().collect())
                    .await
                    .map_err(|error| ReshardError::ClaimFailure {
                        range: claim.range,
                        node: claim.node.clone(),
                        error,
                    })?;
                info!(range = %claim.range, node = %claim.node, "Slots assigned");
            }
            slots += usize::from(claim.range.count());
        }
        Ok(slots)
    }
}
