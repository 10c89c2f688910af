//! Operator report.
//!
//! Every line the operator sees on stdout is a [`ReportEntry`]. In text mode
//! entries are printed as they are recorded; in JSON mode they are collected
//! and printed as one document by [`Reporter::finish`]. Diagnostics go through
//! `tracing` to stderr, never through here.

use std::io::Write;

use serde::Serialize;
use tracing::warn;

use crate::client::{NodeRole, TopologySnapshot};
use crate::config::{ExecutionMode, ReportFormat};
use crate::slots::{ClusterSlotState, DesiredOwnership, NodeId, SlotRange};

/// One line of the operator report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportEntry {
    /// A node of the topology.
    Node {
        id: NodeId,
        endpoint: String,
        role: NodeRole,
        slots: Vec<SlotRange>,
    },
    /// A contiguous range of current ownership.
    CurrentSlots { range: SlotRange, node: NodeId },
    /// Nobody owns any slot.
    NoSlotsAssigned,
    /// A contiguous range of desired ownership.
    DesiredSlots { range: SlotRange, node: NodeId },
    /// The node order desired ranges were assigned with.
    NodeOrder { order: Vec<NodeId> },
    /// Keys resident in a slot on one node.
    KeyCount {
        slot: u16,
        node: NodeId,
        keys: u64,
        owner: bool,
    },
    /// Slots claimed (or to be claimed) by a node.
    Claim {
        range: SlotRange,
        node: NodeId,
        mode: ExecutionMode,
    },
    /// Slots seen without owner while assignment was not requested.
    UnownedSlotsSkipped { range: SlotRange },
    /// A slot moved (or to be moved) between nodes.
    Move {
        slot: u16,
        from: NodeId,
        to: NodeId,
        keys: u64,
        mode: ExecutionMode,
    },
    /// One MIGRATE batch.
    KeyBatch { slot: u16, keys: u64 },
    /// Current ownership already matches the desired one.
    NoActionsNeeded,
    /// Trailing notice of a preview run.
    PreviewNotice,
}

impl std::fmt::Display for ReportEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportEntry::Node {
                id,
                endpoint,
                role,
                slots,
            } => {
                write!(f, "Node {} {} {}", id, endpoint, role)?;
                if !slots.is_empty() {
                    let slots: Vec<String> = slots.iter().map(ToString::to_string).collect();
                    write!(f, " slots {}", slots.join(","))?;
                }
                Ok(())
            }
            ReportEntry::CurrentSlots { range, node } => {
                write!(f, "Slots {} are on node {}", range, node)
            }
            ReportEntry::NoSlotsAssigned => write!(f, "No slots are assigned"),
            ReportEntry::DesiredSlots { range, node } => {
                write!(f, "Slots {} should be on node {}", range, node)
            }
            ReportEntry::NodeOrder { order } => write!(f, "Node order: {}", order.join(",")),
            ReportEntry::KeyCount {
                slot,
                node,
                keys,
                owner: true,
            } => write!(f, "Slot {} has {} keys on node {}", slot, keys, node),
            ReportEntry::KeyCount {
                slot,
                node,
                keys,
                owner: false,
            } => write!(
                f,
                "  ... slot {} has {} keys on non-owner node {}",
                slot, keys, node
            ),
            ReportEntry::Claim { range, node, mode } => {
                write!(f, "[{}] Adding slots {} to node {}", mode, range, node)
            }
            ReportEntry::UnownedSlotsSkipped { range } => write!(
                f,
                "Slots {} have no owner and assignment was not requested, skipping",
                range
            ),
            ReportEntry::Move {
                slot,
                from,
                to,
                keys,
                mode,
            } => write!(
                f,
                "[{}] Moving slot {} from {} to {}, total key count: {}",
                mode, slot, from, to, keys
            ),
            ReportEntry::KeyBatch { slot, keys } => {
                write!(f, "  ... moved {} keys of slot {}", keys, slot)
            }
            ReportEntry::NoActionsNeeded => write!(f, "No actions needed"),
            ReportEntry::PreviewNotice => write!(
                f,
                "!!! Commit flag (--yes) was not set, nothing was changed: this is just a preview !!!"
            ),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    mode: ExecutionMode,
    entries: &'a [ReportEntry],
}

/// Collects report entries and renders them.
pub struct Reporter {
    format: ReportFormat,
    entries: Vec<ReportEntry>,
    sink: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("format", &self.format)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Reporter {
    /// Reporter printing to stdout.
    pub fn stdout(format: ReportFormat) -> Self {
        Self {
            format,
            entries: Vec::new(),
            sink: Some(Box::new(std::io::stdout())),
        }
    }

    /// Reporter writing to an arbitrary sink.
    pub fn to_writer(format: ReportFormat, sink: impl Write + Send + 'static) -> Self {
        Self {
            format,
            entries: Vec::new(),
            sink: Some(Box::new(sink)),
        }
    }

    /// Reporter that only collects entries.
    pub fn collecting() -> Self {
        Self {
            format: ReportFormat::Text,
            entries: Vec::new(),
            sink: None,
        }
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    /// Record one entry.
    pub fn record(&mut self, entry: ReportEntry) {
        if self.format == ReportFormat::Text {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) = writeln!(sink, "{}", entry) {
                    warn!(error = %e, "Failed to write report line");
                }
            }
        }
        self.entries.push(entry);
    }

    /// Record the topology: nodes, current ownership.
    pub fn record_topology(&mut self, topology: &TopologySnapshot, ownership: &ClusterSlotState) {
        for node in topology.nodes() {
            self.record(ReportEntry::Node {
                id: node.node_id.clone(),
                endpoint: node.endpoint().to_string(),
                role: node.role(),
                slots: node.slots.clone(),
            });
        }
        let ranges = ownership.ranges();
        if ranges.is_empty() {
            self.record(ReportEntry::NoSlotsAssigned);
        }
        for (range, node) in ranges {
            self.record(ReportEntry::CurrentSlots { range, node });
        }
    }

    /// Record the desired ownership and the order it was built from.
    pub fn record_desired(&mut self, desired: &DesiredOwnership, order: &[NodeId]) {
        self.record(ReportEntry::NodeOrder {
            order: order.to_vec(),
        });
        for (range, node) in desired.assignments() {
            self.record(ReportEntry::DesiredSlots {
                range: *range,
                node: node.clone(),
            });
        }
    }

    /// Close the report: preview notice, then the JSON document if requested.
    pub fn finish(&mut self, mode: ExecutionMode) -> std::io::Result<()> {
        if !mode.is_commit() {
            self.record(ReportEntry::PreviewNotice);
        }
        if let Some(sink) = self.sink.as_mut() {
            if self.format == ReportFormat::Json {
                let report = JsonReport {
                    mode,
                    entries: &self.entries,
                };
                serde_json::to_writer_pretty(&mut *sink, &report)?;
                writeln!(sink)?;
            }
            sink.flush()?;
        }
        Ok(())
    }
}
