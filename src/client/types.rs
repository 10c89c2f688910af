//! Types for parsed Valkey cluster information.
//!
//! These types represent the parsed output of `CLUSTER NODES`, including the
//! `[slot->-node]` / `[slot-<-node]` markers of in-flight slot migrations.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::slots::{NodeId, SlotRange, SlotState, TOTAL_SLOTS};

/// Errors that can occur when parsing cluster data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid cluster nodes format: {0}")]
    InvalidClusterNodes(String),
    #[error("Invalid slot range: {0}")]
    InvalidSlotRange(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// `[slot->-node]` (migrating) or `[slot-<-node]` (importing).
static MIGRATION_MARKER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\[(\d+)-([<>])-([0-9A-Za-z]+)\]$"));

/// Role of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Node is a master serving hash slots.
    Master,
    /// Node is a replica of a master.
    Replica,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Replica => write!(f, "replica"),
        }
    }
}

/// Flags indicating the state of a cluster node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// This is the local node (myself).
    pub myself: bool,
    /// Node is a master.
    pub master: bool,
    /// Node is a replica.
    pub slave: bool,
    /// Node is in PFAIL state (potentially failed).
    pub pfail: bool,
    /// Node is in FAIL state.
    pub fail: bool,
    /// Node is in handshake state.
    pub handshake: bool,
    /// Node has no address yet.
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parse flags from the CLUSTER NODES output.
    pub fn parse(flags_str: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in flags_str.split(',') {
            match flag.trim() {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" | "replica" => flags.slave = true,
                "pfail" | "fail?" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }

    /// Get the role based on flags.
    pub fn role(&self) -> NodeRole {
        if self.master {
            NodeRole::Master
        } else {
            NodeRole::Replica
        }
    }

    /// Check if the node is healthy (not in fail or pfail state).
    pub fn is_healthy(&self) -> bool {
        !self.fail && !self.pfail && !self.handshake && !self.noaddr
    }
}

/// Host and client port of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, `[v6]:port`, or a `redis://` / `rediss://` /
    /// `valkey://` URI. Returns the endpoint and whether the scheme asks for TLS.
    pub fn parse_target(target: &str) -> Result<(Self, bool), ParseError> {
        let target = target.trim();
        let (rest, tls) = if let Some(rest) = target.strip_prefix("rediss://") {
            (rest, true)
        } else if let Some(rest) = target
            .strip_prefix("redis://")
            .or_else(|| target.strip_prefix("valkey://"))
        {
            (rest, false)
        } else if let Some(rest) = target.strip_prefix("valkeys://") {
            (rest, true)
        } else {
            (target, false)
        };

        // Drop credentials and path/db suffixes.
        let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
        let rest = rest.split('/').next().unwrap_or(rest);

        if rest.is_empty() {
            return Err(ParseError::InvalidEndpoint(target.to_string()));
        }

        let invalid = || ParseError::InvalidEndpoint(target.to_string());
        let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid());

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, parse_port(port)?),
                None if tail.is_empty() => (host, 6379),
                None => return Err(invalid()),
            }
        } else {
            match rest.rsplit_once(':') {
                // A bare IPv6 address carries no port.
                Some((host, _)) if host.contains(':') => (rest, 6379),
                Some((host, port)) if !host.is_empty() => (host, parse_port(port)?),
                Some(_) => return Err(invalid()),
                None => (rest, 6379),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok((Endpoint::new(host, port), tls))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse a slot range from string (e.g., "0-5460" or "5461").
pub fn parse_slot_range(s: &str) -> Result<SlotRange, ParseError> {
    let s = s.trim();
    let parse_slot = |value: &str| -> Result<u16, ParseError> {
        value
            .parse::<u16>()
            .ok()
            .filter(|slot| *slot < TOTAL_SLOTS)
            .ok_or_else(|| ParseError::InvalidSlotRange(s.to_string()))
    };

    let range = if let Some((start, end)) = s.split_once('-') {
        let (start, end) = (parse_slot(start)?, parse_slot(end)?);
        if start > end {
            return Err(ParseError::InvalidSlotRange(s.to_string()));
        }
        SlotRange::new(start, end)
    } else {
        SlotRange::single(parse_slot(s)?)
    };
    Ok(range)
}

/// Parse an importing/migrating marker such as `[93->-e7d1...]`.
///
/// Returns `None` when the token is not a marker.
pub fn parse_migration_marker(s: &str) -> Result<Option<(u16, SlotState)>, ParseError> {
    let regex = MIGRATION_MARKER
        .as_ref()
        .map_err(|e| ParseError::InvalidClusterNodes(e.to_string()))?;

    let Some(caps) = regex.captures(s.trim()) else {
        return Ok(None);
    };
    let (Some(slot), Some(direction), Some(node)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        return Ok(None);
    };

    let slot = parse_slot_range(slot.as_str())?.start;
    let node = node.as_str().to_string();
    let state = if direction.as_str() == ">" {
        SlotState::Migrating { to: node }
    } else {
        SlotState::Importing { from: node }
    };
    Ok(Some((slot, state)))
}

/// A cluster node as reported by `CLUSTER NODES`.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Unique node ID (40 hex characters).
    pub node_id: NodeId,
    /// IP address or hostname.
    pub ip: String,
    /// Client port.
    pub port: u16,
    /// Announced hostname, if any.
    pub hostname: Option<String>,
    /// Node flags.
    pub flags: NodeFlags,
    /// Master node ID if this is a replica.
    pub master_id: Option<NodeId>,
    /// Link state ("connected" or "disconnected").
    pub link_state: String,
    /// Slot ranges owned by this node (masters only).
    pub slots: Vec<SlotRange>,
    /// Slots this node has tagged importing or migrating.
    pub migrations: Vec<(u16, SlotState)>,
}

impl ClusterNode {
    /// Get the role of this node.
    pub fn role(&self) -> NodeRole {
        self.flags.role()
    }

    /// Check if this is a master node.
    pub fn is_master(&self) -> bool {
        self.flags.master
    }

    /// Check if this is the local node.
    pub fn is_myself(&self) -> bool {
        self.flags.myself
    }

    /// Check if the node is connected.
    pub fn is_connected(&self) -> bool {
        self.link_state == "connected"
    }

    /// Check if the node is healthy.
    pub fn is_healthy(&self) -> bool {
        self.flags.is_healthy() && self.is_connected()
    }

    /// Client endpoint of this node.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip.clone(), self.port)
    }

    /// Get total number of slots owned by this node.
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(|r| usize::from(r.count())).sum()
    }

    /// Parse a single line from `CLUSTER NODES` output.
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [node_id, address, flags, master, _ping, _pong, _epoch, link_state, slot_tokens @ ..] =
            parts.as_slice()
        else {
            return Err(ParseError::InvalidClusterNodes(format!(
                "Not enough fields in line: {}",
                line
            )));
        };

        // Address: ip:port@cport[,hostname]
        let (ip_port, bus) = address.split_once('@').unwrap_or((address, ""));
        let hostname = bus
            .split_once(',')
            .map(|(_, hostname)| hostname.to_string())
            .filter(|h| !h.is_empty());
        let (ip, port) = ip_port.rsplit_once(':').ok_or_else(|| {
            ParseError::InvalidClusterNodes(format!("Invalid address format: {}", ip_port))
        })?;
        let port = port
            .parse()
            .map_err(|_| ParseError::InvalidClusterNodes(format!("Invalid port: {}", port)))?;

        let mut slots = Vec::new();
        let mut migrations = Vec::new();
        for token in slot_tokens {
            if token.starts_with('[') {
                if let Some(marker) = parse_migration_marker(token)? {
                    migrations.push(marker);
                }
            } else {
                slots.push(parse_slot_range(token)?);
            }
        }

        Ok(ClusterNode {
            node_id: node_id.to_string(),
            ip: ip.to_string(),
            port,
            hostname,
            flags: NodeFlags::parse(flags),
            master_id: (*master != "-").then(|| master.to_string()),
            link_state: link_state.to_string(),
            slots,
            migrations,
        })
    }
}

/// Parsed output of `CLUSTER NODES` command.
#[derive(Debug, Clone, Default)]
pub struct ParsedClusterNodes {
    /// All nodes in the cluster.
    pub nodes: Vec<ClusterNode>,
}

impl ParsedClusterNodes {
    /// Parse the output of `CLUSTER NODES` command.
    pub fn parse(output: &str) -> Result<Self, ParseError> {
        let nodes: Vec<ClusterNode> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(ClusterNode::parse_line)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ParsedClusterNodes { nodes })
    }

    /// Get all master nodes.
    pub fn masters(&self) -> Vec<&ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master()).collect()
    }

    /// Get the local node (marked with "myself" flag).
    pub fn myself(&self) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.is_myself())
    }

    /// Get a node by its ID.
    pub fn get_node(&self, node_id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Get total number of slots assigned.
    pub fn total_slots_assigned(&self) -> usize {
        self.masters().iter().map(|m| m.slot_count()).sum()
    }
}
