// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for valkey-reshard.
//!
//! Uses proptest to generate random cluster layouts and verify the planning
//! invariants.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;

use valkey_reshard::slots::{
    ClusterSlotState, DesiredOwnership, NodeId, NodeOrderRequest, SlotRange, TOTAL_SLOTS,
    build_reshard_plan, calculate_distribution, eligible_masters, plan_unassigned,
    resolve_node_order, slot_owner,
};

const CHUNK: u16 = 256;
const CHUNKS: usize = (TOTAL_SLOTS / CHUNK) as usize;

fn node_ids(count: usize) -> Vec<NodeId> {
    (0..count).map(|i| format!("node-{}", i)).collect()
}

/// Strategy for a cluster of 1-8 masters whose slots are dealt out in
/// 256-slot chunks, some of them unowned.
fn any_cluster() -> impl Strategy<Value = (Vec<NodeId>, Vec<Option<usize>>)> {
    (1..=8usize).prop_flat_map(|count| {
        (
            Just(node_ids(count)),
            prop::collection::vec(prop::option::weighted(0.9, 0..count), CHUNKS),
        )
    })
}

fn build_state(masters: &[NodeId], chunks: &[Option<usize>]) -> ClusterSlotState {
    let mut state = ClusterSlotState::new();
    for id in masters {
        state.add_master(id.clone(), []);
    }
    for (i, owner) in chunks.iter().enumerate() {
        if let Some(owner) = owner {
            let start = i as u16 * CHUNK;
            state.add_master(masters[*owner].clone(), start..start + CHUNK);
        }
    }
    state
}

fn desired_for(state: &ClusterSlotState, excluded: &HashSet<NodeId>) -> DesiredOwnership {
    let eligible = eligible_masters(&state.masters, excluded);
    let ranges = calculate_distribution(eligible.len()).unwrap();
    let order = resolve_node_order(NodeOrderRequest {
        current: state,
        masters: &state.masters,
        explicit_order: None,
        excluded,
        range_count: ranges.len(),
    })
    .unwrap();
    DesiredOwnership::new(ranges, order).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Ranges are contiguous, ascending and cover every slot once.
    #[test]
    fn test_distribution_covers_slot_space(nodes in 1..=2000usize) {
        let ranges = calculate_distribution(nodes).unwrap();
        prop_assert_eq!(ranges.len(), nodes);
        prop_assert_eq!(ranges[0].start, 0);
        prop_assert_eq!(ranges[nodes - 1].end, TOTAL_SLOTS - 1);
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].end + 1, pair[1].start);
        }
        let total: usize = ranges.iter().map(|r| usize::from(r.count())).sum();
        prop_assert_eq!(total, TOTAL_SLOTS as usize);
    }

    /// Property: All ranges but the last hold floor(16384 / n) slots; the last
    /// absorbs the remainder.
    #[test]
    fn test_distribution_remainder_on_last(nodes in 1..=2000usize) {
        let ranges = calculate_distribution(nodes).unwrap();
        let per_node = TOTAL_SLOTS / nodes as u16;
        for range in &ranges[..nodes - 1] {
            prop_assert_eq!(range.count(), per_node);
        }
        prop_assert_eq!(
            ranges[nodes - 1].count(),
            per_node + TOTAL_SLOTS % nodes as u16
        );
    }

    /// Property: `slot_owner` is the inverse of the distribution.
    #[test]
    fn test_slot_owner_matches_distribution(
        nodes in 1..=500u16,
        slot in 0..TOTAL_SLOTS
    ) {
        let ranges = calculate_distribution(usize::from(nodes)).unwrap();
        let index = slot_owner(slot, nodes).unwrap();
        prop_assert!(ranges[usize::from(index)].contains(slot));
    }

    /// Property: Desired ownership maps every slot to exactly one eligible
    /// master and never to an excluded one.
    #[test]
    fn test_desired_ownership_excludes_nodes(
        (masters, chunks) in any_cluster(),
        exclude_mask in prop::collection::vec(any::<bool>(), 8)
    ) {
        let excluded: HashSet<NodeId> = masters
            .iter()
            .zip(&exclude_mask)
            .filter(|(_, excluded)| **excluded)
            .map(|(id, _)| id.clone())
            .collect();
        prop_assume!(excluded.len() < masters.len());

        let state = build_state(&masters, &chunks);
        let desired = desired_for(&state, &excluded);

        for slot in 0..TOTAL_SLOTS {
            let owner = desired.owner_of(slot);
            prop_assert!(owner.is_some());
            prop_assert!(!excluded.contains(owner.unwrap()));
        }
        let owners: BTreeSet<&NodeId> = desired.assignments().iter().map(|(_, n)| n).collect();
        prop_assert_eq!(owners.len(), masters.len() - excluded.len());
    }

    /// Property: Applying the plan to the current ownership yields the desired
    /// ownership on every owned slot, with each slot moved at most once.
    #[test]
    fn test_plan_reaches_desired_ownership((masters, chunks) in any_cluster()) {
        let state = build_state(&masters, &chunks);
        let desired = desired_for(&state, &HashSet::new());
        let plan = build_reshard_plan(&state, &desired);

        let mut seen = HashSet::new();
        let mut after = state.slot_to_node.clone();
        for action in &plan.actions {
            prop_assert!(seen.insert(action.slot), "slot {} moved twice", action.slot);
            prop_assert_ne!(&action.from_node, &action.to_node);
            prop_assert_eq!(after.get(&action.slot), Some(&action.from_node));
            after.insert(action.slot, action.to_node.clone());
        }

        for slot in 0..TOTAL_SLOTS {
            match state.owner_of(slot) {
                Some(_) => prop_assert_eq!(after.get(&slot), desired.owner_of(slot)),
                None => prop_assert!(plan.unowned_slots.contains(&slot)),
            }
        }
    }

    /// Property: Moves are only planned for misplaced slots.
    #[test]
    fn test_plan_is_minimal((masters, chunks) in any_cluster()) {
        let state = build_state(&masters, &chunks);
        let desired = desired_for(&state, &HashSet::new());
        let plan = build_reshard_plan(&state, &desired);

        let misplaced = (0..TOTAL_SLOTS)
            .filter(|slot| {
                matches!(state.owner_of(*slot), Some(owner) if Some(owner) != desired.owner_of(*slot))
            })
            .count();
        prop_assert_eq!(plan.len(), misplaced);
    }

    /// Property: After a slot moves into a node that still has slots to give
    /// away, the next move comes from that node.
    #[test]
    fn test_plan_follows_chain((masters, chunks) in any_cluster()) {
        let state = build_state(&masters, &chunks);
        let desired = desired_for(&state, &HashSet::new());
        let plan = build_reshard_plan(&state, &desired);

        for (i, pair) in plan.actions.windows(2).enumerate() {
            let receiver = &pair[0].to_node;
            let receiver_has_pending = plan.actions[i + 1..]
                .iter()
                .any(|action| &action.from_node == receiver);
            if receiver_has_pending {
                prop_assert_eq!(&pair[1].from_node, receiver);
            }
        }
    }

    /// Property: Orphan claims cover exactly the unowned slots, each on its
    /// desired owner.
    #[test]
    fn test_orphan_claims_match_desired((masters, chunks) in any_cluster()) {
        let state = build_state(&masters, &chunks);
        let desired = desired_for(&state, &HashSet::new());
        let plan = plan_unassigned(&state, &desired);

        let claimed: Vec<u16> = plan.claims().iter().flat_map(|c| c.range.iter()).collect();
        if state.is_empty() {
            prop_assert_eq!(claimed.len(), TOTAL_SLOTS as usize);
        } else {
            prop_assert_eq!(claimed, state.unassigned_slots());
        }
        for claim in plan.claims() {
            for slot in claim.range.iter() {
                prop_assert_eq!(desired.owner_of(slot), Some(&claim.node));
            }
        }
    }

    /// Property: Coalescing is lossless.
    #[test]
    fn test_coalesce_roundtrip(slots in prop::collection::btree_set(0..TOTAL_SLOTS, 0..300)) {
        let ranges = SlotRange::coalesce(slots.iter().copied());
        let expanded: BTreeSet<u16> = ranges.iter().flat_map(SlotRange::iter).collect();
        prop_assert_eq!(expanded, slots);
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
    }
}
