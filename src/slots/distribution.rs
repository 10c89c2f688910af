//! Pure slot distribution calculations.
//!
//! All functions in this module are pure, side-effect free, and fully testable.
//! They compute how the hash-slot space is partitioned across master nodes.

use serde::Serialize;

use crate::error::ReshardError;

/// Total number of hash slots in a Valkey cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// A contiguous range of hash slots [start, end] inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
}

impl SlotRange {
    /// Create a new slot range.
    ///
    /// # Panics
    /// Debug-only assertions check that start <= end and end < TOTAL_SLOTS.
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end, "start ({}) must be <= end ({})", start, end);
        debug_assert!(
            end < TOTAL_SLOTS,
            "end ({}) must be < TOTAL_SLOTS ({})",
            end,
            TOTAL_SLOTS
        );
        Self { start, end }
    }

    /// Create a single-slot range.
    pub fn single(slot: u16) -> Self {
        Self {
            start: slot,
            end: slot,
        }
    }

    /// Get the number of slots in this range.
    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    /// Check if this range contains a specific slot.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Iterate over all slots in this range.
    pub fn iter(&self) -> impl Iterator<Item = u16> + use<> {
        self.start..=self.end
    }

    /// Collapse an ascending slot sequence into maximal contiguous ranges.
    pub fn coalesce(slots: impl IntoIterator<Item = u16>) -> Vec<SlotRange> {
        let mut ranges: Vec<SlotRange> = Vec::new();
        for slot in slots {
            match ranges.last_mut() {
                Some(last) if last.end.checked_add(1) == Some(slot) => last.end = slot,
                _ => ranges.push(SlotRange::single(slot)),
            }
        }
        ranges
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Calculate the desired slot distribution for N nodes.
///
/// Every range holds `TOTAL_SLOTS / node_count` slots except the last one,
/// which absorbs the remainder so that it always ends at `TOTAL_SLOTS - 1`.
///
/// # Errors
/// Returns [`ReshardError::InvalidConfiguration`] when `node_count` is zero or
/// larger than the slot space.
///
/// # Examples
///
/// ```
/// use valkey_reshard::slots::distribution::{calculate_distribution, SlotRange};
///
/// let dist = calculate_distribution(3).unwrap();
/// assert_eq!(dist[0], SlotRange::new(0, 5460));      // 5461 slots
/// assert_eq!(dist[1], SlotRange::new(5461, 10921));  // 5461 slots
/// assert_eq!(dist[2], SlotRange::new(10922, 16383)); // 5462 slots
/// ```
pub fn calculate_distribution(node_count: usize) -> Result<Vec<SlotRange>, ReshardError> {
    if node_count == 0 {
        return Err(ReshardError::InvalidConfiguration(
            "node count must be positive (no eligible masters)".to_string(),
        ));
    }
    let count = u16::try_from(node_count)
        .ok()
        .filter(|n| *n <= TOTAL_SLOTS)
        .ok_or_else(|| {
            ReshardError::InvalidConfiguration(format!(
                "node count {} exceeds the {} available slots",
                node_count, TOTAL_SLOTS
            ))
        })?;

    let slots_per_node = TOTAL_SLOTS / count;
    let mut ranges = Vec::with_capacity(node_count);

    for i in 0..count {
        let start = slots_per_node * i;
        let end = if i == count - 1 {
            TOTAL_SLOTS - 1
        } else {
            start + slots_per_node - 1
        };
        ranges.push(SlotRange::new(start, end));
    }

    Ok(ranges)
}

/// Determine which range index a given slot falls into for `node_count` ranges.
///
/// This is the inverse of [`calculate_distribution`]. Returns `None` for a
/// zero node count or a slot outside the slot space.
///
/// # Examples
///
/// ```
/// use valkey_reshard::slots::distribution::slot_owner;
///
/// assert_eq!(slot_owner(0, 3), Some(0));
/// assert_eq!(slot_owner(5460, 3), Some(0));
/// assert_eq!(slot_owner(5461, 3), Some(1));
/// assert_eq!(slot_owner(16383, 3), Some(2));
/// ```
pub fn slot_owner(slot: u16, node_count: u16) -> Option<u16> {
    if node_count == 0 || node_count > TOTAL_SLOTS || slot >= TOTAL_SLOTS {
        return None;
    }
    let slots_per_node = TOTAL_SLOTS / node_count;
    Some((slot / slots_per_node).min(node_count - 1))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_range_single() {
        let range = SlotRange::single(100);
        assert_eq!(range.start, 100);
        assert_eq!(range.end, 100);
        assert_eq!(range.count(), 1);
    }

    #[test]
    fn test_slot_range_count() {
        assert_eq!(SlotRange::new(0, 5460).count(), 5461);
        assert_eq!(SlotRange::new(0, 16383).count(), 16384);
    }

    #[test]
    fn test_slot_range_contains() {
        let range = SlotRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(99));
        assert!(!range.contains(201));
    }

    #[test]
    fn test_slot_range_display() {
        assert_eq!(format!("{}", SlotRange::new(0, 5460)), "0-5460");
        assert_eq!(format!("{}", SlotRange::single(100)), "100");
    }

    #[test]
    fn test_coalesce() {
        let ranges = SlotRange::coalesce([0, 1, 2, 5, 7, 8]);
        assert_eq!(
            ranges,
            vec![
                SlotRange::new(0, 2),
                SlotRange::single(5),
                SlotRange::new(7, 8)
            ]
        );
        assert!(SlotRange::coalesce(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_calculate_distribution_zero_nodes() {
        let err = calculate_distribution(0).unwrap_err();
        assert!(matches!(err, ReshardError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_calculate_distribution_too_many_nodes() {
        assert!(calculate_distribution(TOTAL_SLOTS as usize + 1).is_err());
        assert_eq!(
            calculate_distribution(TOTAL_SLOTS as usize).unwrap().len(),
            TOTAL_SLOTS as usize
        );
    }

    #[test]
    fn test_calculate_distribution_one_node() {
        let dist = calculate_distribution(1).unwrap();
        assert_eq!(dist, vec![SlotRange::new(0, 16383)]);
    }

    #[test]
    fn test_calculate_distribution_three_nodes() {
        // 16384 / 3 = 5461 remainder 1, the last range takes the extra slot
        let dist = calculate_distribution(3).unwrap();
        assert_eq!(dist[0], SlotRange::new(0, 5460));
        assert_eq!(dist[1], SlotRange::new(5461, 10921));
        assert_eq!(dist[2], SlotRange::new(10922, 16383));
        assert_eq!(dist[2].count(), 5462);
    }

    #[test]
    fn test_distribution_covers_all_slots() {
        for node_count in 1..=20 {
            let dist = calculate_distribution(node_count).unwrap();
            let total: u32 = dist.iter().map(|r| u32::from(r.count())).sum();
            assert_eq!(total, u32::from(TOTAL_SLOTS), "node_count={}", node_count);
            assert_eq!(dist.first().unwrap().start, 0);
            assert_eq!(dist.last().unwrap().end, TOTAL_SLOTS - 1);
            for i in 1..dist.len() {
                assert_eq!(dist[i].start, dist[i - 1].end + 1);
            }
        }
    }

    #[test]
    fn test_only_last_range_differs() {
        for node_count in 1..=20usize {
            let dist = calculate_distribution(node_count).unwrap();
            let base = dist[0].count();
            for range in &dist[..dist.len() - 1] {
                assert_eq!(range.count(), base);
            }
            let extra = dist.last().unwrap().count() - base;
            assert!(usize::from(extra) < node_count);
        }
    }

    #[test]
    fn test_slot_owner_is_inverse_of_distribution() {
        for node_count in 1..=10u16 {
            let dist = calculate_distribution(usize::from(node_count)).unwrap();
            for (idx, range) in dist.iter().enumerate() {
                for slot in range.iter() {
                    assert_eq!(slot_owner(slot, node_count), Some(idx as u16));
                }
            }
        }
        assert_eq!(slot_owner(0, 0), None);
        assert_eq!(slot_owner(TOTAL_SLOTS, 3), None);
    }
}
