//! Valkey client module for slot management operations.
//!
//! This module provides a type-safe wrapper around the `fred` Redis client
//! for the handful of cluster commands a reshard needs.
//!
//! ## Architecture
//!
//! - `valkey_client`: Per-node client wrapper with TLS support
//! - `types`: Parsed types for `CLUSTER NODES` (nodes, slots, migration markers)
//! - `topology`: `TopologySnapshot` and the `TopologySource` trait
//! - `commands`: `SlotCommands`, the protocol primitives the executor drives
//!
//! ## Example
//!
//! ```rust,ignore
//! use valkey_reshard::client::{Endpoint, TopologySource, ValkeyClient, ValkeyClientConfig};
//!
//! let client = ValkeyClient::connect_single(&Endpoint::new("10.0.0.1", 6379), &config).await?;
//! let topology = client.fetch_topology().await?;
//! println!("{} masters", topology.master_ids().len());
//! ```

pub mod commands;
pub mod topology;
pub mod types;
pub mod valkey_client;

pub use commands::SlotCommands;
pub use topology::{TopologySnapshot, TopologySource};
pub use types::{ClusterNode, Endpoint, NodeFlags, NodeRole, ParseError, ParsedClusterNodes};
pub use valkey_client::{
    MIGRATE_REPLY_MARGIN, SetSlotCommand, TlsCertData, ValkeyClient, ValkeyClientConfig,
    ValkeyError, migrate_reply_timeout,
};
