//! Read-only key count inspection.

use std::collections::HashMap;

use tracing::{instrument, warn};

use super::report::{ReportEntry, Reporter};
use crate::client::SlotCommands;
use crate::error::ReshardError;
use crate::slots::{ClusterSlotState, NodeId, TOTAL_SLOTS};

/// Keys found in a slot on a node that does not own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrayKeys {
    /// Slot the keys hash to.
    pub slot: u16,
    /// Node holding them.
    pub node: NodeId,
    /// Key count on that node.
    pub keys: u64,
}

/// Report the key count of every slot on its owner and flag keys resident on
/// any other node.
///
/// Stray keys are usually what an interrupted migration left behind.
#[instrument(skip_all, fields(nodes = connections.len()))]
pub async fn count_keys_in_slots<C: SlotCommands + Sync>(
    connections: &HashMap<NodeId, C>,
    ownership: &ClusterSlotState,
    reporter: &mut Reporter,
) -> Result<Vec<StrayKeys>, ReshardError> {
    let mut nodes: Vec<&NodeId> = connections.keys().collect();
    nodes.sort();

    let mut stray = Vec::new();
    for slot in 0..TOTAL_SLOTS {
        let owner = ownership.owner_of(slot);
        if let Some(owner) = owner {
            if let Some(connection) = connections.get(owner) {
                let keys = connection.count_keys_in_slot(slot).await?;
                reporter.record(ReportEntry::KeyCount {
                    slot,
                    node: owner.clone(),
                    keys,
                    owner: true,
                });
            }
        }

        for node in nodes.iter().copied().filter(|node| owner != Some(*node)) {
            let Some(connection) = connections.get(node) else {
                continue;
            };
            let keys = connection.count_keys_in_slot(slot).await?;
            if keys > 0 {
                warn!(slot, node = %node, keys, owner = ?owner, "Keys found on non-owner node");
                reporter.record(ReportEntry::KeyCount {
                    slot,
                    node: node.clone(),
                    keys,
                    owner: false,
                });
                stray.push(StrayKeys {
                    slot,
                    node: node.clone(),
                    keys,
                });
            }
        }
    }
    Ok(stray)
}
