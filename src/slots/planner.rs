//! Reshard planning - computes what needs to change, no I/O.
//!
//! This module diffs the current slot ownership against the desired
//! distribution and orders the resulting single-slot moves.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;

use super::distribution::{SlotRange, TOTAL_SLOTS};
use crate::error::ReshardError;

/// Identifies a node by its Valkey cluster node ID.
pub type NodeId = String;

/// Current ownership of slots in the cluster.
///
/// Built fresh from a topology snapshot; never kept across phases.
#[derive(Debug, Clone, Default)]
pub struct ClusterSlotState {
    /// Map from slot number to owning node ID.
    pub slot_to_node: BTreeMap<u16, NodeId>,
    /// Master node IDs in topology order.
    pub masters: Vec<NodeId>,
}

impl ClusterSlotState {
    /// Create a new empty slot state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the node owning a slot, if any.
    pub fn owner_of(&self, slot: u16) -> Option<&NodeId> {
        self.slot_to_node.get(&slot)
    }

    /// Count total assigned slots.
    pub fn assigned_count(&self) -> usize {
        self.slot_to_node.len()
    }

    /// Check if no slot is owned by anyone.
    pub fn is_empty(&self) -> bool {
        self.slot_to_node.is_empty()
    }

    /// Get all unassigned slots.
    pub fn unassigned_slots(&self) -> Vec<u16> {
        (0..TOTAL_SLOTS)
            .filter(|s| !self.slot_to_node.contains_key(s))
            .collect()
    }

    /// Check if all slots are assigned.
    pub fn all_slots_assigned(&self) -> bool {
        self.slot_to_node.len() == TOTAL_SLOTS as usize
    }

    /// Add a master node with its slots.
    pub fn add_master(&mut self, node_id: NodeId, slots: impl IntoIterator<Item = u16>) {
        if !self.masters.contains(&node_id) {
            self.masters.push(node_id.clone());
        }
        for slot in slots {
            self.slot_to_node.insert(slot, node_id.clone());
        }
    }

    /// Owners in the order they are first seen scanning slots ascending.
    pub fn owners_in_slot_order(&self) -> Vec<NodeId> {
        let mut seen: Vec<NodeId> = Vec::new();
        for owner in self.slot_to_node.values() {
            if !seen.contains(owner) {
                seen.push(owner.clone());
            }
        }
        seen
    }

    /// Current ownership as maximal contiguous ranges, ascending.
    pub fn ranges(&self) -> Vec<(SlotRange, NodeId)> {
        let mut ranges: Vec<(SlotRange, NodeId)> = Vec::new();
        for (&slot, owner) in &self.slot_to_node {
            match ranges.last_mut() {
                Some((range, node)) if node == owner && range.end + 1 == slot => {
                    range.end = slot;
                }
                _ => ranges.push((SlotRange::single(slot), owner.clone())),
            }
        }
        ranges
    }
}

/// Desired owner of every slot: one node per desired range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesiredOwnership {
    assignments: Vec<(SlotRange, NodeId)>,
}

impl DesiredOwnership {
    /// Pair each range with the node at the same position.
    ///
    /// Ranges must be ascending, disjoint, contiguous and cover the slot space.
    pub fn new(ranges: Vec<SlotRange>, order: Vec<NodeId>) -> Result<Self, ReshardError> {
        if ranges.len() != order.len() {
            return Err(ReshardError::ConfigurationMismatch(format!(
                "{} desired ranges but {} nodes in order",
                ranges.len(),
                order.len()
            )));
        }

        let mut expected_start = 0u16;
        for range in &ranges {
            if range.start != expected_start || range.end < range.start {
                return Err(ReshardError::InvalidConfiguration(format!(
                    "desired range {} does not continue at slot {}",
                    range, expected_start
                )));
            }
            expected_start = range.end.saturating_add(1);
        }
        if ranges.last().map(|r| r.end) != Some(TOTAL_SLOTS - 1) {
            return Err(ReshardError::InvalidConfiguration(
                "desired ranges do not cover the full slot space".to_string(),
            ));
        }

        Ok(Self {
            assignments: ranges.into_iter().zip(order).collect(),
        })
    }

    /// Get the desired owner of a slot.
    pub fn owner_of(&self, slot: u16) -> Option<&NodeId> {
        let idx = self
            .assignments
            .partition_point(|(range, _)| range.end < slot);
        self.assignments
            .get(idx)
            .filter(|(range, _)| range.contains(slot))
            .map(|(_, node)| node)
    }

    /// Ranges paired with their desired node, ascending.
    pub fn assignments(&self) -> &[(SlotRange, NodeId)] {
        &self.assignments
    }

    /// Number of slots a node should own.
    pub fn slot_count_for(&self, node: &str) -> usize {
        self.assignments
            .iter()
            .filter(|(_, n)| n == node)
            .map(|(r, _)| usize::from(r.count()))
            .sum()
    }
}

/// A single slot that belongs to `from_node` but should belong to `to_node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReshardAction {
    /// The node currently owning the slot.
    pub from_node: NodeId,
    /// The slot to migrate.
    pub slot: u16,
    /// The node that should own the slot.
    pub to_node: NodeId,
}

impl ReshardAction {
    /// Create a new reshard action.
    pub fn new(from_node: impl Into<NodeId>, slot: u16, to_node: impl Into<NodeId>) -> Self {
        Self {
            from_node: from_node.into(),
            slot,
            to_node: to_node.into(),
        }
    }
}

/// Ordered sequence of single-slot moves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReshardPlan {
    /// Actions in execution order.
    pub actions: Vec<ReshardAction>,
    /// Slots the diff skipped because nobody owns them.
    pub unowned_slots: Vec<u16>,
}

impl ReshardPlan {
    /// Create an empty plan.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if the plan is empty (no work to do).
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Get total number of slot moves.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Count moved slots per (source, destination) pair.
    pub fn moves_by_pair(&self) -> BTreeMap<(NodeId, NodeId), usize> {
        let mut pairs = BTreeMap::new();
        for action in &self.actions {
            *pairs
                .entry((action.from_node.clone(), action.to_node.clone()))
                .or_insert(0) += 1;
        }
        pairs
    }
}

/// Diff current ownership against the desired ownership and order the moves.
///
/// Unowned slots are not moves; they are reported in
/// [`ReshardPlan::unowned_slots`] and left to the unassigned-slot pass.
pub fn build_reshard_plan(current: &ClusterSlotState, desired: &DesiredOwnership) -> ReshardPlan {
    let mut diff = Vec::new();
    let mut unowned_slots = Vec::new();

    for slot in 0..TOTAL_SLOTS {
        let Some(target) = desired.owner_of(slot) else {
            continue;
        };
        match current.owner_of(slot) {
            Some(owner) if owner == target => {}
            Some(owner) => diff.push(ReshardAction::new(owner.clone(), slot, target.clone())),
            None => unowned_slots.push(slot),
        }
    }

    ReshardPlan {
        actions: order_by_chain(diff),
        unowned_slots,
    }
}

/// Order moves by following the chain of receiving nodes.
///
/// After a slot moves into node X, the next move is taken from X's own
/// outgoing queue when it still has one; otherwise the lowest pending slot is
/// taken. Each slot appears at most once in `diff`, so the slot number is the
/// removal key.
pub fn order_by_chain(diff: Vec<ReshardAction>) -> Vec<ReshardAction> {
    let mut queues: HashMap<NodeId, VecDeque<u16>> = HashMap::new();
    let mut pending: BTreeMap<u16, ReshardAction> = BTreeMap::new();
    for action in diff {
        queues
            .entry(action.from_node.clone())
            .or_default()
            .push_back(action.slot);
        pending.insert(action.slot, action);
    }

    let mut ordered = Vec::with_capacity(pending.len());
    let mut next = pending.keys().next().copied();

    while let Some(slot) = next {
        let Some(action) = pending.remove(&slot) else {
            break;
        };
        if let Some(queue) = queues.get_mut(&action.from_node) {
            if queue.front() == Some(&slot) {
                queue.pop_front();
            } else {
                queue.retain(|s| *s != slot);
            }
        }

        next = queues
            .get(&action.to_node)
            .and_then(|queue| queue.front().copied())
            .or_else(|| pending.keys().next().copied());
        ordered.push(action);
    }

    ordered
}

/// Take ownership of a range of unowned slots on `node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotClaim {
    /// Slots to claim.
    pub range: SlotRange,
    /// Node that claims them.
    pub node: NodeId,
}

/// Plan for slots that currently have no owner.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssignmentPlan {
    /// Nothing is unowned.
    #[default]
    Complete,
    /// Nobody owns anything: claim each desired range in bulk.
    EmptyCluster(Vec<SlotClaim>),
    /// Some slots are orphaned: claim each one on its desired owner.
    Orphans(Vec<SlotClaim>),
}

impl AssignmentPlan {
    /// Claims to issue, in order.
    pub fn claims(&self) -> &[SlotClaim] {
        match self {
            AssignmentPlan::Complete => &[],
            AssignmentPlan::EmptyCluster(claims) | AssignmentPlan::Orphans(claims) => claims,
        }
    }
}

/// Plan the claims for unowned slots.
pub fn plan_unassigned(current: &ClusterSlotState, desired: &DesiredOwnership) -> AssignmentPlan {
    if current.is_empty() {
        return AssignmentPlan::EmptyCluster(
            desired
                .assignments()
                .iter()
                .map(|(range, node)| SlotClaim {
                    range: *range,
                    node: node.clone(),
                })
                .collect(),
        );
    }

    let claims: Vec<SlotClaim> = current
        .unassigned_slots()
        .into_iter()
        .filter_map(|slot| {
            desired.owner_of(slot).map(|node| SlotClaim {
                range: SlotRange::single(slot),
                node: node.clone(),
            })
        })
        .collect();

    if claims.is_empty() {
        AssignmentPlan::Complete
    } else {
        AssignmentPlan::Orphans(claims)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap,
    clippy::panic
)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::slots::distribution::calculate_distribution;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn desired(order: &[&str]) -> DesiredOwnership {
        DesiredOwnership::new(calculate_distribution(order.len()).unwrap(), ids(order)).unwrap()
    }

    fn balanced(order: &[&str]) -> ClusterSlotState {
        let mut state = ClusterSlotState::new();
        for (range, node) in desired(order).assignments() {
            state.add_master(node.clone(), range.iter());
        }
        state
    }

    #[test]
    fn test_cluster_slot_state_add_master() {
        let mut state = ClusterSlotState::new();
        state.add_master("node-a".to_string(), 0..100);

        assert_eq!(state.masters, ids(&["node-a"]));
        assert_eq!(state.assigned_count(), 100);
        assert_eq!(state.owner_of(99), Some(&"node-a".to_string()));
        assert_eq!(state.owner_of(100), None);
        assert_eq!(state.unassigned_slots().len(), (TOTAL_SLOTS - 100) as usize);
    }

    #[test]
    fn test_owners_in_slot_order() {
        let mut state = ClusterSlotState::new();
        state.add_master("c".into(), 0..10);
        state.add_master("a".into(), 10..20);
        state.add_master("c".into(), 20..30);
        state.add_master("b".into(), 30..40);
        assert_eq!(state.owners_in_slot_order(), ids(&["c", "a", "b"]));
    }

    #[test]
    fn test_ranges_coalesce_per_owner() {
        let mut state = ClusterSlotState::new();
        state.add_master("a".into(), 0..10);
        state.add_master("b".into(), 10..20);
        state.add_master("a".into(), 25..30);
        assert_eq!(
            state.ranges(),
            vec![
                (SlotRange::new(0, 9), "a".to_string()),
                (SlotRange::new(10, 19), "b".to_string()),
                (SlotRange::new(25, 29), "a".to_string()),
            ]
        );
    }

    #[test]
    fn test_desired_ownership_lookup() {
        let d = desired(&["a", "b", "c"]);
        assert_eq!(d.owner_of(0).unwrap(), "a");
        assert_eq!(d.owner_of(5460).unwrap(), "a");
        assert_eq!(d.owner_of(5461).unwrap(), "b");
        assert_eq!(d.owner_of(16383).unwrap(), "c");
        assert_eq!(d.owner_of(TOTAL_SLOTS), None);
        assert_eq!(d.slot_count_for("c"), 5462);
    }

    #[test]
    fn test_desired_ownership_rejects_length_mismatch() {
        let err = DesiredOwnership::new(calculate_distribution(3).unwrap(), ids(&["a", "b"]))
            .unwrap_err();
        assert!(matches!(err, ReshardError::ConfigurationMismatch(_)));
    }

    #[test]
    fn test_desired_ownership_rejects_gaps() {
        let err = DesiredOwnership::new(
            vec![SlotRange::new(0, 99), SlotRange::new(200, 16383)],
            ids(&["a", "b"]),
        )
        .unwrap_err();
        assert!(matches!(err, ReshardError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_plan_no_op_when_balanced() {
        let plan = build_reshard_plan(&balanced(&["a", "b", "c"]), &desired(&["a", "b", "c"]));
        assert!(plan.is_empty());
        assert!(plan.unowned_slots.is_empty());
    }

    #[test]
    fn test_plan_contains_exactly_the_diff() {
        let current = balanced(&["a", "b"]);
        let target = desired(&["a", "b", "c"]);
        let plan = build_reshard_plan(&current, &target);

        let expected: HashSet<u16> = (0..TOTAL_SLOTS)
            .filter(|s| current.owner_of(*s) != target.owner_of(*s))
            .collect();
        let planned: HashSet<u16> = plan.actions.iter().map(|a| a.slot).collect();
        assert_eq!(planned.len(), plan.len());
        assert_eq!(planned, expected);
        assert!(plan.actions.iter().all(|a| a.from_node != a.to_node));
    }

    #[test]
    fn test_plan_two_to_three_moves_only_into_new_ranges() {
        let plan = build_reshard_plan(&balanced(&["a", "b"]), &desired(&["a", "b", "c"]));
        let pairs = plan.moves_by_pair();
        // a: 0-8191 -> 0-5460, b: 8192-16383 -> 5461-10921, c: 10922-16383
        assert_eq!(pairs.get(&("a".into(), "b".into())), Some(&(8191 - 5461 + 1)));
        assert_eq!(pairs.get(&("b".into(), "c".into())), Some(&5462));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn test_plan_skips_unowned_slots() {
        let mut current = balanced(&["a", "b"]);
        current.slot_to_node.remove(&5);
        let plan = build_reshard_plan(&current, &desired(&["a", "b"]));
        assert!(plan.is_empty());
        assert_eq!(plan.unowned_slots, vec![5]);
    }

    #[test]
    fn test_chain_ordering_follows_receiver() {
        let diff = vec![
            ReshardAction::new("a", 0, "b"),
            ReshardAction::new("a", 1, "b"),
            ReshardAction::new("c", 2, "a"),
            ReshardAction::new("b", 3, "c"),
        ];
        let ordered: Vec<u16> = order_by_chain(diff).iter().map(|a| a.slot).collect();
        // 0 into b -> b's next is 3 into c -> c's next is 2 into a -> a's next is 1
        assert_eq!(ordered, vec![0, 3, 2, 1]);
    }

    #[test]
    fn test_chain_ordering_falls_back_to_lowest_slot() {
        let diff = vec![
            ReshardAction::new("a", 10, "x"),
            ReshardAction::new("b", 5, "y"),
            ReshardAction::new("a", 20, "x"),
        ];
        let ordered: Vec<u16> = order_by_chain(diff).iter().map(|a| a.slot).collect();
        assert_eq!(ordered, vec![5, 10, 20]);
    }

    #[test]
    fn test_plan_unassigned_empty_cluster() {
        let plan = plan_unassigned(&ClusterSlotState::new(), &desired(&["a", "b", "c"]));
        let AssignmentPlan::EmptyCluster(claims) = plan else {
            panic!("expected bulk claims");
        };
        assert_eq!(claims.len(), 3);
        assert_eq!(claims[0].range, SlotRange::new(0, 5460));
        assert_eq!(claims[2].node, "c");
    }

    #[test]
    fn test_plan_unassigned_orphans() {
        let mut current = balanced(&["a", "b"]);
        current.slot_to_node.remove(&1);
        current.slot_to_node.remove(&16000);
        let plan = plan_unassigned(&current, &desired(&["a", "b"]));
        assert_eq!(
            plan,
            AssignmentPlan::Orphans(vec![
                SlotClaim {
                    range: SlotRange::single(1),
                    node: "a".into()
                },
                SlotClaim {
                    range: SlotRange::single(16000),
                    node: "b".into()
                },
            ])
        );
    }

    #[test]
    fn test_plan_unassigned_complete() {
        let plan = plan_unassigned(&balanced(&["a"]), &desired(&["a"]));
        assert_eq!(plan, AssignmentPlan::Complete);
        assert!(plan.claims().is_empty());
    }
}
