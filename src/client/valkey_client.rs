//! Valkey client wrapper using the fred crate.
//!
//! One centralized connection per cluster node, with optional TLS. The slot
//! migration primitives (`CLUSTER SETSLOT ... IMPORTING|MIGRATING <id>` and
//! `MIGRATE ... REPLACE KEYS`) are issued as custom commands because fred does
//! not expose the node-id and multi-key forms.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fred::prelude::*;
use fred::types::config::Options;
use fred::types::{ClusterHash, CustomCommand, Value};
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use tracing::{debug, instrument};

use super::types::{Endpoint, ParsedClusterNodes};

/// Errors that can occur during Valkey operations.
#[derive(Error, Debug)]
pub enum ValkeyError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] crate::client::types::ParseError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Slack added on top of the MIGRATE timeout for the client-side wait.
pub const MIGRATE_REPLY_MARGIN: Duration = Duration::from_secs(5);

/// How long the client waits for a MIGRATE reply.
///
/// Longer than the timeout the server enforces on the transfer, whatever the
/// default command timeout of the connection is.
pub fn migrate_reply_timeout(migrate_timeout: Duration) -> Duration {
    migrate_timeout.saturating_add(MIGRATE_REPLY_MARGIN)
}

/// TLS configuration with certificate data (not file paths).
#[derive(Clone)]
pub struct TlsCertData {
    /// CA certificate in PEM format. Empty means the native TLS defaults.
    pub ca_cert_pem: Vec<u8>,
    /// Client certificate in PEM format (optional, for mTLS).
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client key in PEM format (optional, for mTLS).
    pub client_key_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsCertData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertData")
            .field("ca_cert_pem", &format_args!("{} bytes", self.ca_cert_pem.len()))
            .field("client_cert", &self.client_cert_pem.is_some())
            .finish()
    }
}

impl TlsCertData {
    /// Load a CA bundle from a PEM file.
    pub fn from_ca_file(path: &std::path::Path) -> Result<Self, ValkeyError> {
        let ca_cert_pem = std::fs::read(path).map_err(|e| {
            ValkeyError::InvalidConfig(format!("cannot read CA certificate {}: {}", path.display(), e))
        })?;
        Ok(Self {
            ca_cert_pem,
            client_cert_pem: None,
            client_key_pem: None,
        })
    }
}

/// Settings shared by every per-node connection of one run.
#[derive(Clone, Debug)]
pub struct ValkeyClientConfig {
    /// TLS configuration.
    pub tls: Option<TlsCertData>,
    /// Connection timeout.
    pub connection_timeout: Duration,
    /// Command timeout.
    pub command_timeout: Duration,
    /// Password for authentication.
    pub password: Option<String>,
}

impl Default for ValkeyClientConfig {
    fn default() -> Self {
        Self {
            tls: None,
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            password: None,
        }
    }
}

impl ValkeyClientConfig {
    /// Set TLS configuration.
    pub fn with_tls(mut self, tls: TlsCertData) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set password.
    pub fn with_password(mut self, password: String) -> Self {
        self.password = Some(password);
        self
    }

    /// Set connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// `CLUSTER SETSLOT` sub-command with its node-id argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetSlotCommand<'a> {
    /// Destination side: accept the slot from the given source.
    Importing(&'a str),
    /// Source side: hand the slot to the given destination.
    Migrating(&'a str),
    /// Assign the slot to the given node, clearing importing/migrating tags.
    Node(&'a str),
}

impl SetSlotCommand<'_> {
    fn args(&self, slot: u16) -> Vec<Value> {
        let (keyword, node) = match self {
            SetSlotCommand::Importing(node) => ("IMPORTING", node),
            SetSlotCommand::Migrating(node) => ("MIGRATING", node),
            SetSlotCommand::Node(node) => ("NODE", node),
        };
        vec![
            Value::from("SETSLOT"),
            Value::Integer(i64::from(slot)),
            Value::from(keyword),
            Value::from(node.to_string()),
        ]
    }
}

/// Valkey client bound to one cluster node.
pub struct ValkeyClient {
    client: Client,
    endpoint: Endpoint,
    password: Option<String>,
}

impl std::fmt::Debug for ValkeyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl ValkeyClient {
    /// Connect to a single node (not clustered).
    ///
    /// Cluster redirections are never followed: every slot command must reach
    /// exactly the node it is addressed to.
    #[instrument(skip_all, fields(endpoint = %endpoint, tls = config.tls.is_some()))]
    pub async fn connect_single(
        endpoint: &Endpoint,
        config: &ValkeyClientConfig,
    ) -> Result<Self, ValkeyError> {
        let server_config = ServerConfig::Centralized {
            server: Server::new(endpoint.host.as_str(), endpoint.port),
        };

        let mut redis_config = Config {
            server: server_config,
            ..Default::default()
        };

        if let Some(ref password) = config.password {
            redis_config.password = Some(password.clone());
        }

        if let Some(ref certs) = config.tls {
            let tls_connector = build_tls_connector(certs)?;
            redis_config.tls = Some(tls_connector.into());
        }

        let command_timeout = config.command_timeout;
        let connection_timeout = config.connection_timeout;

        let client = Builder::from_config(redis_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        debug!("Connecting to Valkey node");
        client.init().await?;
        debug!("Connected to Valkey node");

        Ok(Self {
            client,
            endpoint: endpoint.clone(),
            password: config.password.clone(),
        })
    }

    /// Endpoint this client is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Check if the client is connected.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), ValkeyError> {
        self.client.quit().await?;
        Ok(())
    }

    /// Get cluster nodes.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn cluster_nodes_raw(&self) -> Result<String, ValkeyError> {
        let response: String = self.client.cluster_nodes().await?;
        Ok(response)
    }

    /// Get parsed cluster nodes.
    pub async fn cluster_nodes(&self) -> Result<ParsedClusterNodes, ValkeyError> {
        let raw = self.cluster_nodes_raw().await?;
        Ok(ParsedClusterNodes::parse(&raw)?)
    }

    /// Execute CLUSTER MYID to get this node's ID.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn cluster_myid(&self) -> Result<String, ValkeyError> {
        let id: String = self.client.cluster_myid().await?;
        Ok(id)
    }

    /// Execute CLUSTER ADDSLOTS to assign slots to this node.
    #[instrument(skip(self, slots), fields(endpoint = %self.endpoint, slot_count = slots.len()))]
    pub async fn cluster_add_slots(&self, slots: Vec<u16>) -> Result<(), ValkeyError> {
        self.client.cluster_add_slots(slots).await?;
        Ok(())
    }

    /// Execute CLUSTER SETSLOT with a node-id argument.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn cluster_setslot(
        &self,
        slot: u16,
        command: SetSlotCommand<'_>,
    ) -> Result<(), ValkeyError> {
        let cmd = CustomCommand::new_static("CLUSTER", ClusterHash::Random, false);
        let _: Value = self.client.custom(cmd, command.args(slot)).await?;
        Ok(())
    }

    /// Execute CLUSTER GETKEYSINSLOT to get keys in a slot.
    ///
    /// Keys are returned as raw bytes; they are only ever handed back to MIGRATE.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn cluster_get_keys_in_slot(
        &self,
        slot: u16,
        count: u64,
    ) -> Result<Vec<Bytes>, ValkeyError> {
        let values: Vec<Value> = self.client.cluster_get_keys_in_slot(slot, count).await?;
        values
            .into_iter()
            .map(|value| {
                value.into_bytes().ok_or_else(|| {
                    ValkeyError::Connection(format!(
                        "unexpected non-key reply from GETKEYSINSLOT {}",
                        slot
                    ))
                })
            })
            .collect()
    }

    /// Execute CLUSTER COUNTKEYSINSLOT to count keys in a slot.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn cluster_count_keys_in_slot(&self, slot: u16) -> Result<u64, ValkeyError> {
        let count: u64 = self.client.cluster_count_keys_in_slot(slot).await?;
        Ok(count)
    }

    /// Execute MIGRATE to move keys to another node.
    ///
    /// `MIGRATE host port "" 0 timeout REPLACE [AUTH password] KEYS key...`.
    /// REPLACE makes a resent batch harmless.
    #[instrument(skip(self, keys), fields(endpoint = %self.endpoint, to = %destination, key_count = keys.len()))]
    pub async fn migrate_keys(
        &self,
        destination: &Endpoint,
        keys: &[Bytes],
        timeout: Duration,
    ) -> Result<(), ValkeyError> {
        if keys.is_empty() {
            return Ok(());
        }

        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let mut args: Vec<Value> = Vec::with_capacity(keys.len() + 9);
        args.push(Value::from(destination.host.as_str()));
        args.push(Value::Integer(i64::from(destination.port)));
        args.push(Value::from(""));
        args.push(Value::Integer(0));
        args.push(Value::Integer(timeout_ms));
        args.push(Value::from("REPLACE"));
        if let Some(ref password) = self.password {
            args.push(Value::from("AUTH"));
            args.push(Value::from(password.as_str()));
        }
        args.push(Value::from("KEYS"));
        args.extend(keys.iter().cloned().map(Value::Bytes));

        let options = Options {
            timeout: Some(migrate_reply_timeout(timeout)),
            ..Default::default()
        };
        let cmd = CustomCommand::new_static("MIGRATE", ClusterHash::Random, false);
        let reply: Value = self.client.with_options(&options).custom(cmd, args).await?;
        debug!(reply = ?reply, "MIGRATE finished");
        Ok(())
    }
}

/// Build a TLS connector from certificate data.
///
/// Server certificates are verified against the supplied CA bundle (or the
/// rustls defaults when none is given) and the host name of the endpoint.
fn build_tls_connector(certs: &TlsCertData) -> Result<TlsConnector, ValkeyError> {
    use rustls::{ClientConfig, RootCertStore};

    if certs.ca_cert_pem.is_empty() && certs.client_cert_pem.is_none() {
        return TlsConnector::default_rustls()
            .map_err(|e| ValkeyError::Connection(format!("TLS error: {}", e)));
    }

    let mut root_store = RootCertStore::empty();
    let ca_certs = rustls_pemfile::certs(&mut certs.ca_cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ValkeyError::Connection(format!("Failed to parse CA certificate: {}", e)))?;

    for cert in ca_certs {
        root_store
            .add(cert)
            .map_err(|e| ValkeyError::Connection(format!("Failed to add CA certificate: {}", e)))?;
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ValkeyError::Connection(format!("Failed to build TLS config: {}", e)))?
    .with_root_certificates(root_store);

    let config = if let (Some(cert_pem), Some(key_pem)) =
        (&certs.client_cert_pem, &certs.client_key_pem)
    {
        // mTLS: client cert + key
        let client_certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|e| {
                ValkeyError::Connection(format!("Failed to parse client certificate: {}", e))
            })?;

        let client_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .map_err(|e| ValkeyError::Connection(format!("Failed to parse client key: {}", e)))?
            .ok_or_else(|| ValkeyError::Connection("No private key found in PEM".to_string()))?;

        builder
            .with_client_auth_cert(client_certs, client_key)
            .map_err(|e| ValkeyError::Connection(format!("Failed to build TLS config: {}", e)))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(TlsConnector::from(config))
}
