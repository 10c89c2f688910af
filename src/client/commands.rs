//! Slot protocol primitives driven by the assigner and the migration executor.
//!
//! [`SlotCommands`] is the seam between planning/execution and the network:
//! [`ValkeyClient`] implements it against a live node, tests implement it
//! against an in-memory cluster.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use super::topology::TopologySnapshot;
use super::types::Endpoint;
use super::valkey_client::{SetSlotCommand, ValkeyClient, ValkeyError};
use crate::slots::{NodeId, SlotState};

/// Commands issued against a single cluster node.
pub trait SlotCommands {
    /// `CLUSTER MYID`.
    fn myid(&self) -> impl Future<Output = Result<NodeId, ValkeyError>> + Send;

    /// Importing/migrating tags held by this node, from its own `CLUSTER NODES`.
    fn local_migrations(
        &self,
    ) -> impl Future<Output = Result<Vec<(u16, SlotState)>, ValkeyError>> + Send;

    /// `CLUSTER ADDSLOTS`.
    fn add_slots(&self, slots: Vec<u16>) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER SETSLOT <slot> IMPORTING|MIGRATING|NODE <id>`.
    fn set_slot(
        &self,
        slot: u16,
        command: SetSlotCommand<'_>,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;

    /// `CLUSTER COUNTKEYSINSLOT`.
    fn count_keys_in_slot(&self, slot: u16)
    -> impl Future<Output = Result<u64, ValkeyError>> + Send;

    /// `CLUSTER GETKEYSINSLOT`.
    fn get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> impl Future<Output = Result<Vec<Bytes>, ValkeyError>> + Send;

    /// `MIGRATE ... REPLACE KEYS` to `destination`.
    fn migrate(
        &self,
        destination: &Endpoint,
        keys: &[Bytes],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ValkeyError>> + Send;
}

impl SlotCommands for ValkeyClient {
    async fn myid(&self) -> Result<NodeId, ValkeyError> {
        self.cluster_myid().await
    }

    async fn local_migrations(&self) -> Result<Vec<(u16, SlotState)>, ValkeyError> {
        let snapshot = TopologySnapshot::from(self.cluster_nodes().await?);
        Ok(snapshot.local_migrations())
    }

    async fn add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        self.cluster_add_slots(slots).await
    }

    async fn set_slot(&self, slot: u16, command: SetSlotCommand<'_>) -> Result<(), ValkeyError> {
        self.cluster_setslot(slot, command).await
    }

    async fn count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        self.cluster_count_keys_in_slot(slot).await
    }

    async fn get_keys_in_slot(&self, slot: u16, count: u64) -> Result<Vec<Bytes>, ValkeyError> {
        self.cluster_get_keys_in_slot(slot, count).await
    }

    async fn migrate(
        &self,
        destination: &Endpoint,
        keys: &[Bytes],
        timeout: Duration,
    ) -> Result<(), ValkeyError> {
        self.migrate_keys(destination, keys, timeout).await
    }
}
