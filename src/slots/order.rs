//! Node order resolution - which node gets which desired range.
//!
//! Range `i` of the desired distribution goes to node `i` of the resolved
//! order. Without an explicit order the current owners keep their position in
//! slot order, so the lowest slots stay where they are and data movement is
//! kept small.

use std::collections::HashSet;

use super::planner::{ClusterSlotState, NodeId};
use crate::error::ReshardError;

/// Inputs for [`resolve_node_order`].
#[derive(Debug, Clone, Copy)]
pub struct NodeOrderRequest<'a> {
    /// Live ownership, scanned to infer the current order.
    pub current: &'a ClusterSlotState,
    /// All master node IDs in topology order, excluded ones included.
    pub masters: &'a [NodeId],
    /// Operator-supplied order, used verbatim when present.
    pub explicit_order: Option<&'a [NodeId]>,
    /// Nodes that must not receive slots.
    pub excluded: &'a HashSet<NodeId>,
    /// Number of desired ranges.
    pub range_count: usize,
}

/// Masters that may own slots, in topology order.
pub fn eligible_masters(masters: &[NodeId], excluded: &HashSet<NodeId>) -> Vec<NodeId> {
    let mut eligible: Vec<NodeId> = Vec::with_capacity(masters.len());
    for id in masters {
        if !excluded.contains(id) && !eligible.contains(id) {
            eligible.push(id.clone());
        }
    }
    eligible
}

/// Resolve one node ID per desired range.
///
/// # Errors
/// - [`ReshardError::ConfigurationMismatch`] if an explicit order (after
///   removing excluded IDs) has the wrong length, repeats a node or names a
///   node that is not a master.
/// - [`ReshardError::InsufficientNodes`] if fewer eligible masters than
///   ranges are available.
pub fn resolve_node_order(request: NodeOrderRequest<'_>) -> Result<Vec<NodeId>, ReshardError> {
    match request.explicit_order {
        Some(explicit) => resolve_explicit(request, explicit),
        None => resolve_inferred(request),
    }
}

fn resolve_explicit(
    request: NodeOrderRequest<'_>,
    explicit: &[NodeId],
) -> Result<Vec<NodeId>, ReshardError> {
    let order: Vec<NodeId> = explicit
        .iter()
        .filter(|id| !request.excluded.contains(*id))
        .cloned()
        .collect();

    if order.len() != request.range_count {
        return Err(ReshardError::ConfigurationMismatch(format!(
            "explicit node order has {} nodes but {} ranges are required",
            order.len(),
            request.range_count
        )));
    }

    let mut seen = HashSet::with_capacity(order.len());
    for id in &order {
        if !request.masters.contains(id) {
            return Err(ReshardError::ConfigurationMismatch(format!(
                "node {} in explicit order is not a master of this cluster",
                id
            )));
        }
        if !seen.insert(id) {
            return Err(ReshardError::ConfigurationMismatch(format!(
                "node {} appears more than once in explicit order",
                id
            )));
        }
    }

    Ok(order)
}

fn resolve_inferred(request: NodeOrderRequest<'_>) -> Result<Vec<NodeId>, ReshardError> {
    let eligible = eligible_masters(request.masters, request.excluded);

    let mut order: Vec<NodeId> = request
        .current
        .owners_in_slot_order()
        .into_iter()
        .filter(|id| eligible.contains(id))
        .collect();
    for id in eligible {
        if !order.contains(&id) {
            order.push(id);
        }
    }

    if order.len() < request.range_count {
        return Err(ReshardError::InsufficientNodes {
            required: request.range_count,
            available: order.len(),
        });
    }
    order.truncate(request.range_count);
    Ok(order)
}
