//! Run configuration.
//!
//! [`ReshardConfig`] carries everything one invocation needs. It is built by
//! the CLI (or by tests) with the `with_*` methods and checked once with
//! [`ReshardConfig::validate`] before any connection is opened.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::client::{Endpoint, TlsCertData, ValkeyClientConfig};
use crate::error::ReshardError;
use crate::slots::NodeId;

/// Default number of keys fetched and migrated per MIGRATE call.
pub const DEFAULT_MIGRATION_BATCH_SIZE: u64 = 1000;

/// Default timeout handed to the store for each MIGRATE call.
pub const DEFAULT_MIGRATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether mutating calls are issued.
///
/// Every mutating call site asks [`ExecutionMode::is_commit`] right before it
/// would issue the call; nothing caches the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Plan and report only.
    #[default]
    Preview,
    /// Plan, report and mutate the cluster.
    Commit,
}

impl ExecutionMode {
    /// Map the commit switch to a mode.
    pub fn from_commit_flag(commit: bool) -> Self {
        if commit {
            ExecutionMode::Commit
        } else {
            ExecutionMode::Preview
        }
    }

    /// Check whether mutating calls may be issued.
    pub fn is_commit(self) -> bool {
        matches!(self, ExecutionMode::Commit)
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Preview => write!(f, "preview"),
            ExecutionMode::Commit => write!(f, "commit"),
        }
    }
}

/// How the operator report is written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    /// One line per entry, printed as the run progresses.
    #[default]
    Text,
    /// A single JSON document printed when the run ends.
    Json,
}

/// Configuration of one reshard run.
#[derive(Debug, Clone)]
pub struct ReshardConfig {
    /// Node used for topology discovery.
    pub target: Endpoint,
    /// Connect with TLS (`rediss://` targets turn this on).
    pub tls: bool,
    /// CA bundle for TLS verification.
    pub tls_ca_cert: Option<PathBuf>,
    /// Password for AUTH and for MIGRATE.
    pub password: Option<String>,
    /// Masters that receive no slots.
    pub exclude_node_ids: HashSet<NodeId>,
    /// Claim unowned slots.
    pub assign: bool,
    /// Diff and migrate.
    pub reshard: bool,
    /// Explicit node order, one id per desired range.
    pub node_order: Option<Vec<NodeId>>,
    /// Report per-slot key counts.
    pub count_keys_in_slots: bool,
    /// Keys per GETKEYSINSLOT/MIGRATE batch.
    pub migration_batch_size: u64,
    /// Timeout passed to MIGRATE.
    pub migrate_timeout: Duration,
    /// Client connection timeout.
    pub connection_timeout: Duration,
    /// Client command timeout.
    pub command_timeout: Duration,
    /// Preview or commit.
    pub mode: ExecutionMode,
    /// Report rendering.
    pub report_format: ReportFormat,
}

impl ReshardConfig {
    /// Create a configuration for `target` with defaults everywhere else.
    ///
    /// Accepts `host:port`, `redis://`, `rediss://` and `valkey://` forms.
    pub fn new(target: &str) -> Result<Self, ReshardError> {
        let (target, tls) = Endpoint::parse_target(target)
            .map_err(|e| ReshardError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            target,
            tls,
            tls_ca_cert: None,
            password: None,
            exclude_node_ids: HashSet::new(),
            assign: false,
            reshard: false,
            node_order: None,
            count_keys_in_slots: false,
            migration_batch_size: DEFAULT_MIGRATION_BATCH_SIZE,
            migrate_timeout: DEFAULT_MIGRATE_TIMEOUT,
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            mode: ExecutionMode::Preview,
            report_format: ReportFormat::Text,
        })
    }

    /// Set excluded node ids.
    pub fn with_excluded(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.exclude_node_ids = ids.into_iter().collect();
        self
    }

    /// Enable unassigned slot assignment.
    pub fn with_assign(mut self, assign: bool) -> Self {
        self.assign = assign;
        self
    }

    /// Enable resharding.
    pub fn with_reshard(mut self, reshard: bool) -> Self {
        self.reshard = reshard;
        self
    }

    /// Set an explicit node order.
    pub fn with_node_order(mut self, order: Option<Vec<NodeId>>) -> Self {
        self.node_order = order;
        self
    }

    /// Enable per-slot key count reporting.
    pub fn with_count_keys_in_slots(mut self, count: bool) -> Self {
        self.count_keys_in_slots = count;
        self
    }

    /// Set migration batch size.
    pub fn with_migration_batch_size(mut self, size: u64) -> Self {
        self.migration_batch_size = size;
        self
    }

    /// Set the MIGRATE timeout.
    pub fn with_migrate_timeout(mut self, timeout: Duration) -> Self {
        self.migrate_timeout = timeout;
        self
    }

    /// Set client timeouts.
    pub fn with_timeouts(mut self, connection: Duration, command: Duration) -> Self {
        self.connection_timeout = connection;
        self.command_timeout = command;
        self
    }

    /// Set password.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Turn on TLS, optionally with a CA bundle.
    pub fn with_tls(mut self, tls: bool, ca_cert: Option<PathBuf>) -> Self {
        self.tls = self.tls || tls || ca_cert.is_some();
        self.tls_ca_cert = ca_cert;
        self
    }

    /// Set execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set report format.
    pub fn with_report_format(mut self, format: ReportFormat) -> Self {
        self.report_format = format;
        self
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<(), ReshardError> {
        if self.target.host.is_empty() {
            return Err(ReshardError::InvalidConfiguration(
                "target host must not be empty".to_string(),
            ));
        }
        if self.migration_batch_size == 0 {
            return Err(ReshardError::InvalidConfiguration(
                "migration batch size must be greater than 0".to_string(),
            ));
        }
        if let Some(ref order) = self.node_order {
            let mut seen = HashSet::with_capacity(order.len());
            if let Some(dup) = order.iter().find(|id| !seen.insert(*id)) {
                return Err(ReshardError::InvalidConfiguration(format!(
                    "node {} appears more than once in node order",
                    dup
                )));
            }
        }
        Ok(())
    }

    /// Client settings shared by every node connection.
    pub fn client_config(&self) -> Result<ValkeyClientConfig, ReshardError> {
        let mut config = ValkeyClientConfig::default()
            .with_connection_timeout(self.connection_timeout)
            .with_command_timeout(self.command_timeout);
        if let Some(ref password) = self.password {
            config = config.with_password(password.clone());
        }
        if self.tls {
            let certs = match self.tls_ca_cert {
                Some(ref path) => TlsCertData::from_ca_file(path)
                    .map_err(|e| ReshardError::InvalidConfiguration(e.to_string()))?,
                None => TlsCertData {
                    ca_cert_pem: Vec::new(),
                    client_cert_pem: None,
                    client_key_pem: None,
                },
            };
            config = config.with_tls(certs);
        }
        Ok(config)
    }
}
