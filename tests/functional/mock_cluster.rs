//! In-memory cluster for functional tests.
//!
//! `MockCluster` implements `TopologySource` and hands out one `MockNode`
//! per master implementing `SlotCommands`. All nodes share one state, so a
//! `MIGRATE` from one node lands in another node's keyspace and a
//! `SETSLOT NODE` changes the ownership the next topology fetch reports.
//! Topology is served from the first master's point of view: like a real
//! node, it prints importing/migrating markers on its own line only.
//! Every mutating or key-level call is recorded for assertions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use valkey_reshard::client::{
    ClusterNode, Endpoint, NodeFlags, SetSlotCommand, SlotCommands, TopologySnapshot,
    TopologySource, ValkeyError,
};
use valkey_reshard::slots::{NodeId, SlotRange, SlotState};

/// Operation kinds a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    AddSlots,
    MarkImporting,
    MarkMigrating,
    SetNode,
    CountKeys,
    GetKeys,
    Migrate,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddSlots { node: NodeId, slots: Vec<u16> },
    SetSlot { node: NodeId, slot: u16, state: String },
    CountKeys { node: NodeId, slot: u16 },
    GetKeys { node: NodeId, slot: u16, count: u64 },
    Migrate { node: NodeId, to: Endpoint, keys: usize },
}

impl Call {
    /// Whether the call changes cluster state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::AddSlots { .. } | Call::SetSlot { .. } | Call::Migrate { .. }
        )
    }

    pub fn node(&self) -> &str {
        match self {
            Call::AddSlots { node, .. }
            | Call::SetSlot { node, .. }
            | Call::CountKeys { node, .. }
            | Call::GetKeys { node, .. }
            | Call::Migrate { node, .. } => node,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    masters: Vec<(NodeId, Endpoint)>,
    owner: BTreeMap<u16, NodeId>,
    keys: HashMap<NodeId, BTreeMap<u16, Vec<Bytes>>>,
    tags: BTreeMap<(NodeId, u16), SlotState>,
    calls: Vec<Call>,
    fail: Option<(NodeId, Op, usize)>,
}

impl State {
    fn tags_of(&self, node: &str) -> Vec<(u16, SlotState)> {
        self.tags
            .iter()
            .filter(|((owner, _), _)| owner.as_str() == node)
            .map(|((_, slot), tag)| (*slot, tag.clone()))
            .collect()
    }

    fn check_fail(&mut self, node: &str, op: Op) -> Result<(), ValkeyError> {
        let Some((fail_node, fail_op, remaining)) = self.fail.as_mut() else {
            return Ok(());
        };
        if fail_node.as_str() != node || *fail_op != op {
            return Ok(());
        }
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(());
        }
        self.fail = None;
        Err(ValkeyError::Connection(format!(
            "injected failure on {} {:?}",
            node, op
        )))
    }
}

/// Shared in-memory cluster.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Add a master with the given owned slots. Endpoint is derived from its
    /// position: the n-th master listens on 10.0.0.n:6379.
    pub fn with_master(self, id: &str, slots: impl IntoIterator<Item = u16>) -> Self {
        {
            let mut state = self.lock();
            let endpoint = Endpoint::new(format!("10.0.0.{}", state.masters.len() + 1), 6379);
            state.masters.push((id.to_string(), endpoint));
            for slot in slots {
                state.owner.insert(slot, id.to_string());
            }
        }
        self
    }

    /// Put `count` keys into `slot` on `node`.
    pub fn with_keys(self, node: &str, slot: u16, count: usize) -> Self {
        {
            let mut state = self.lock();
            let slot_keys = state
                .keys
                .entry(node.to_string())
                .or_default()
                .entry(slot)
                .or_default();
            for i in 0..count {
                slot_keys.push(Bytes::from(format!("key:{}:{}", slot, i)));
            }
        }
        self
    }

    /// Tag a slot on a node as importing/migrating.
    pub fn with_tag(self, node: &str, slot: u16, tag: SlotState) -> Self {
        self.lock().tags.insert((node.to_string(), slot), tag);
        self
    }

    /// Fail the `skip + 1`-th `op` issued against `node`.
    pub fn fail_on(&self, node: &str, op: Op, skip: usize) {
        self.lock().fail = Some((node.to_string(), op, skip));
    }

    /// One connection per master.
    pub fn connections(&self) -> HashMap<NodeId, MockNode> {
        self.lock()
            .masters
            .iter()
            .map(|(id, _)| {
                (
                    id.clone(),
                    MockNode {
                        id: id.clone(),
                        cluster: self.clone(),
                    },
                )
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn owner_of(&self, slot: u16) -> Option<NodeId> {
        self.lock().owner.get(&slot).cloned()
    }

    /// Slots owned by `node`, as ranges.
    pub fn ranges_of(&self, node: &str) -> Vec<SlotRange> {
        let state = self.lock();
        SlotRange::coalesce(
            state
                .owner
                .iter()
                .filter(|(_, owner)| owner.as_str() == node)
                .map(|(slot, _)| *slot),
        )
    }

    pub fn key_count(&self, node: &str, slot: u16) -> usize {
        self.lock()
            .keys
            .get(node)
            .and_then(|slots| slots.get(&slot))
            .map_or(0, Vec::len)
    }

    pub fn total_keys(&self) -> usize {
        self.lock()
            .keys
            .values()
            .flat_map(|slots| slots.values())
            .map(Vec::len)
            .sum()
    }

    pub fn tag(&self, node: &str, slot: u16) -> SlotState {
        self.lock()
            .tags
            .get(&(node.to_string(), slot))
            .cloned()
            .unwrap_or_default()
    }
}

impl TopologySource for MockCluster {
    async fn fetch_topology(&self) -> Result<TopologySnapshot, ValkeyError> {
        let state = self.lock();
        let nodes = state
            .masters
            .iter()
            .enumerate()
            .map(|(i, (id, endpoint))| {
                let myself = i == 0;
                ClusterNode {
                    node_id: id.clone(),
                    ip: endpoint.host.clone(),
                    port: endpoint.port,
                    hostname: None,
                    flags: NodeFlags::parse(if myself { "myself,master" } else { "master" }),
                    master_id: None,
                    link_state: "connected".to_string(),
                    slots: SlotRange::coalesce(
                        state
                            .owner
                            .iter()
                            .filter(|(_, owner)| *owner == id)
                            .map(|(slot, _)| *slot),
                    ),
                    migrations: if myself {
                        state.tags_of(id)
                    } else {
                        Vec::new()
                    },
                }
            })
            .collect();
        Ok(TopologySnapshot::from_nodes(nodes))
    }
}

/// Connection to one mock master.
#[derive(Debug, Clone)]
pub struct MockNode {
    id: NodeId,
    cluster: MockCluster,
}

impl SlotCommands for MockNode {
    async fn myid(&self) -> Result<NodeId, ValkeyError> {
        Ok(self.id.clone())
    }

    async fn local_migrations(&self) -> Result<Vec<(u16, SlotState)>, ValkeyError> {
        Ok(self.cluster.lock().tags_of(&self.id))
    }

    async fn add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        let mut state = self.cluster.lock();
        state.calls.push(Call::AddSlots {
            node: self.id.clone(),
            slots: slots.clone(),
        });
        state.check_fail(&self.id, Op::AddSlots)?;
        if let Some(busy) = slots.iter().find(|slot| state.owner.contains_key(*slot)) {
            return Err(ValkeyError::Connection(format!("Slot {} is already busy", busy)));
        }
        for slot in slots {
            state.owner.insert(slot, self.id.clone());
        }
        Ok(())
    }

    async fn set_slot(&self, slot: u16, command: SetSlotCommand<'_>) -> Result<(), ValkeyError> {
        let mut state = self.cluster.lock();
        let (op, label) = match &command {
            SetSlotCommand::Importing(from) => (Op::MarkImporting, format!("IMPORTING {}", from)),
            SetSlotCommand::Migrating(to) => (Op::MarkMigrating, format!("MIGRATING {}", to)),
            SetSlotCommand::Node(owner) => (Op::SetNode, format!("NODE {}", owner)),
        };
        state.calls.push(Call::SetSlot {
            node: self.id.clone(),
            slot,
            state: label,
        });
        state.check_fail(&self.id, op)?;

        let key = (self.id.clone(), slot);
        match command {
            SetSlotCommand::Importing(from) => {
                state.tags.insert(key, SlotState::Importing { from: from.to_string() });
            }
            SetSlotCommand::Migrating(to) => {
                state.tags.insert(key, SlotState::Migrating { to: to.to_string() });
            }
            SetSlotCommand::Node(owner) => {
                state.tags.remove(&key);
                state.owner.insert(slot, owner.to_string());
            }
        }
        Ok(())
    }

    async fn count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        let mut state = self.cluster.lock();
        state.calls.push(Call::CountKeys {
            node: self.id.clone(),
            slot,
        });
        state.check_fail(&self.id, Op::CountKeys)?;
        let count = state
            .keys
            .get(&self.id)
            .and_then(|slots| slots.get(&slot))
            .map_or(0, Vec::len);
        Ok(count as u64)
    }

    async fn get_keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<Bytes>, ValkeyError> {
        let mut state = self.cluster.lock();
        state.calls.push(Call::GetKeys {
            node: self.id.clone(),
            slot,
            count,
        });
        state.check_fail(&self.id, Op::GetKeys)?;
        Ok(state
            .keys
            .get(&self.id)
            .and_then(|slots| slots.get(&slot))
            .map(|keys| keys.iter().take(count as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn migrate(
        &self,
        destination: &Endpoint,
        keys: &[Bytes],
        _timeout: Duration,
    ) -> Result<(), ValkeyError> {
        let mut state = self.cluster.lock();
        state.calls.push(Call::Migrate {
            node: self.id.clone(),
            to: destination.clone(),
            keys: keys.len(),
        });
        state.check_fail(&self.id, Op::Migrate)?;

        let Some(target) = state
            .masters
            .iter()
            .find(|(_, endpoint)| endpoint == destination)
            .map(|(id, _)| id.clone())
        else {
            return Err(ValkeyError::Connection(format!("no node at {}", destination)));
        };

        let mut moved: HashMap<u16, Vec<Bytes>> = HashMap::new();
        if let Some(slots) = state.keys.get_mut(&self.id) {
            for (slot, slot_keys) in slots.iter_mut() {
                let (taken, kept): (Vec<Bytes>, Vec<Bytes>) =
                    slot_keys.drain(..).partition(|key| keys.contains(key));
                *slot_keys = kept;
                if !taken.is_empty() {
                    moved.insert(*slot, taken);
                }
            }
        }
        let target_slots = state.keys.entry(target).or_default();
        for (slot, taken) in moved {
            let slot_keys = target_slots.entry(slot).or_default();
            for key in taken {
                // REPLACE semantics
                if !slot_keys.contains(&key) {
                    slot_keys.push(key);
                }
            }
        }
        Ok(())
    }
}
