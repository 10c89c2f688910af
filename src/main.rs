//! valkey-reshard - rebalance hash slots across the masters of a Valkey cluster.
//!
//! This is the main entry point that:
//! - Parses the command line
//! - Initializes structured logging (stderr; stdout carries the report)
//! - Connects to every master and checks its identity
//! - Runs the reshard pipeline and maps the outcome to an exit code

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use valkey_reshard::client::{
    SlotCommands, TopologySnapshot, TopologySource, ValkeyClient, ValkeyClientConfig,
};
use valkey_reshard::config::DEFAULT_MIGRATION_BATCH_SIZE;
use valkey_reshard::slots::NodeId;
use valkey_reshard::{ExecutionMode, ReportFormat, ReshardConfig, ReshardError, Reporter, Resharder};

/// Rebalance Valkey cluster hash slots across masters
#[derive(Parser, Debug)]
#[command(name = "valkey-reshard", version)]
#[command(about = "Plan and execute hash slot rebalancing for a Valkey cluster (preview unless --yes)")]
struct Args {
    /// Node to connect to (e.g. redis://localhost:6379, rediss://host:6380, host:port)
    #[arg(short = 'u', long = "uri", env = "VALKEY_URI")]
    uri: String,

    /// Node ids that receive no slots (comma separated)
    #[arg(short = 'e', long, value_delimiter = ',')]
    exclude_node_ids: Vec<NodeId>,

    /// Assign unowned slots
    #[arg(short = 'a', long)]
    assign: bool,

    /// Move slots to their desired owners
    #[arg(short = 'r', long)]
    reshard: bool,

    /// Desired node order, one node id per range (comma separated)
    #[arg(short = 'o', long, value_delimiter = ',')]
    node_order: Option<Vec<NodeId>>,

    /// Print the number of keys in each slot
    #[arg(long)]
    count_keys_in_slots: bool,

    /// Keys per GETKEYSINSLOT/MIGRATE batch
    #[arg(long, default_value_t = DEFAULT_MIGRATION_BATCH_SIZE)]
    migration_batch_size: u64,

    /// MIGRATE timeout (seconds)
    #[arg(long, default_value = "60")]
    migrate_timeout: u64,

    /// Connection timeout (seconds)
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Command timeout (seconds)
    #[arg(long, default_value = "30")]
    command_timeout: u64,

    /// Password for AUTH
    #[arg(long, env = "VALKEY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Connect with TLS
    #[arg(long)]
    tls: bool,

    /// CA certificate (PEM) for TLS verification
    #[arg(long)]
    tls_ca_cert: Option<PathBuf>,

    /// Do actual operations; without it the run is a preview
    #[arg(short = 'y', long)]
    yes: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report_format: ReportFormat,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> Result<ReshardConfig, ReshardError> {
        Ok(ReshardConfig::new(&self.uri)?
            .with_excluded(self.exclude_node_ids)
            .with_assign(self.assign)
            .with_reshard(self.reshard)
            .with_node_order(self.node_order)
            .with_count_keys_in_slots(self.count_keys_in_slots)
            .with_migration_batch_size(self.migration_batch_size)
            .with_migrate_timeout(Duration::from_secs(self.migrate_timeout))
            .with_timeouts(
                Duration::from_secs(self.connect_timeout),
                Duration::from_secs(self.command_timeout),
            )
            .with_password(self.password)
            .with_tls(self.tls, self.tls_ca_cert)
            .with_mode(ExecutionMode::from_commit_flag(self.yes))
            .with_report_format(self.report_format))
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("valkey_reshard=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Reshard failed");
            if let Some(slot) = e.stranded_slot() {
                error!(
                    slot,
                    "Slot may be left importing/migrating; inspect CLUSTER NODES and finish it with CLUSTER SETSLOT {} NODE <id> before re-running",
                    slot
                );
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ReshardError> {
    let config = args.into_config()?;
    config.validate()?;
    let client_config = config.client_config()?;

    info!(target = %config.target, mode = %config.mode, "Starting valkey-reshard");

    let seed = ValkeyClient::connect_single(&config.target, &client_config).await?;
    let topology = seed.fetch_topology().await?;
    let connections = connect_masters(&topology, &client_config).await?;

    let mut reporter = Reporter::stdout(config.report_format);
    let result = Resharder::new(&seed, &connections, &config)
        .run(&mut reporter)
        .await;

    if let Err(e) = reporter.finish(config.mode) {
        warn!(error = %e, "Failed to write report");
    }

    for (node, connection) in &connections {
        if let Err(e) = connection.close().await {
            debug!(node = %node, error = %e, "Failed to close connection");
        }
    }
    if let Err(e) = seed.close().await {
        debug!(error = %e, "Failed to close seed connection");
    }

    let summary = result?;
    info!(
        slots_claimed = summary.slots_claimed,
        slots_moved = summary.migration.slots_moved,
        keys_migrated = summary.migration.keys_migrated,
        stray_keys = summary.stray_keys.len(),
        "Done"
    );
    Ok(())
}

/// Open one connection per master and check it answers with the expected id.
async fn connect_masters(
    topology: &TopologySnapshot,
    config: &ValkeyClientConfig,
) -> Result<HashMap<NodeId, ValkeyClient>, ReshardError> {
    let mut connections = HashMap::new();
    for master in topology.masters() {
        let endpoint = master.endpoint();
        let client = ValkeyClient::connect_single(&endpoint, config).await?;
        let id = client.myid().await?;
        if id != master.node_id {
            return Err(ReshardError::ConfigurationMismatch(format!(
                "node at {} reports id {} but topology lists {}",
                endpoint, id, master.node_id
            )));
        }
        debug!(node = %id, endpoint = %endpoint, "Connected to master");
        connections.insert(master.node_id.clone(), client);
    }
    Ok(connections)
}
