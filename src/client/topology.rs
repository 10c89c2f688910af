//! Point-in-time view of the cluster.
//!
//! A [`TopologySnapshot`] is taken from `CLUSTER NODES` on one node and is
//! never kept across phases: the pipeline fetches a fresh one before every
//! decision that depends on ownership.

use std::future::Future;

use tracing::instrument;

use super::types::{ClusterNode, Endpoint, ParseError, ParsedClusterNodes};
use super::valkey_client::{ValkeyClient, ValkeyError};
use crate::slots::{ClusterSlotState, NodeId, SlotState};

/// Nodes, roles, endpoints and slot ownership as one node sees them.
#[derive(Debug, Clone, Default)]
pub struct TopologySnapshot {
    nodes: Vec<ClusterNode>,
}

impl TopologySnapshot {
    /// Build a snapshot from parsed nodes.
    pub fn from_nodes(nodes: Vec<ClusterNode>) -> Self {
        Self { nodes }
    }

    /// Parse raw `CLUSTER NODES` output.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        Ok(ParsedClusterNodes::parse(raw)?.into())
    }

    /// All nodes, replicas included, in reported order.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Master nodes in reported order.
    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    /// Master node IDs in reported order.
    pub fn master_ids(&self) -> Vec<NodeId> {
        self.masters().map(|n| n.node_id.clone()).collect()
    }

    /// Look up a node by ID.
    pub fn node(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Client endpoint of a node.
    pub fn endpoint_of(&self, node_id: &str) -> Option<Endpoint> {
        self.node(node_id).map(ClusterNode::endpoint)
    }

    /// Slot ownership as reported by the masters.
    pub fn ownership(&self) -> ClusterSlotState {
        let mut state = ClusterSlotState::new();
        for master in self.masters() {
            state.add_master(
                master.node_id.clone(),
                master.slots.iter().flat_map(|range| range.iter()),
            );
        }
        state
    }

    /// Tags held by the node the snapshot was taken from.
    ///
    /// A node prints `[slot->-id]` and `[slot-<-id]` only on its own `myself`
    /// line, so this is the only part of the marker set a snapshot can be
    /// trusted to report in full.
    pub fn local_migrations(&self) -> Vec<(u16, SlotState)> {
        self.nodes
            .iter()
            .find(|node| node.is_myself())
            .map(|node| node.migrations.clone())
            .unwrap_or_default()
    }

    /// Every importing/migrating tag the snapshot shows, as `(node, slot, state)`.
    pub fn migration_markers(&self) -> Vec<(NodeId, u16, SlotState)> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.migrations
                    .iter()
                    .map(move |(slot, state)| (node.node_id.clone(), *slot, state.clone()))
            })
            .collect()
    }

    /// Slots that at least one node reports as importing or migrating.
    pub fn slots_in_migration(&self) -> Vec<u16> {
        let mut slots: Vec<u16> = self
            .nodes
            .iter()
            .flat_map(|node| node.migrations.iter().map(|(slot, _)| *slot))
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }
}

impl From<ParsedClusterNodes> for TopologySnapshot {
    fn from(parsed: ParsedClusterNodes) -> Self {
        Self::from_nodes(parsed.nodes)
    }
}

/// Something that can produce a fresh [`TopologySnapshot`].
pub trait TopologySource {
    /// Query the live cluster.
    fn fetch_topology(&self) -> impl Future<Output = Result<TopologySnapshot, ValkeyError>> + Send;
}

impl TopologySource for ValkeyClient {
    #[instrument(skip(self), fields(endpoint = %self.endpoint()))]
    async fn fetch_topology(&self) -> Result<TopologySnapshot, ValkeyError> {
        let parsed = self.cluster_nodes().await?;
        let snapshot = TopologySnapshot::from(parsed);

        // CLUSTER NODES reports the local node's address as seen by the
        // cluster bus, which may be empty before the first MEET.
        let me = self.endpoint().clone();
        let nodes = snapshot
            .nodes
            .into_iter()
            .map(|mut node| {
                if node.is_myself() && (node.ip.is_empty() || node.port == 0) {
                    node.ip = me.host.clone();
                    node.port = me.port;
                }
                node
            })
            .collect();
        Ok(TopologySnapshot::from_nodes(nodes))
    }
}
