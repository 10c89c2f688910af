//! valkey-reshard library crate
//!
//! Rebalances the 16384 hash slots of a Valkey cluster across its masters.
//!
//! - [`slots`]: pure planning (distribution, node order, diff, chain order,
//!   migration state)
//! - [`client`]: fred-based node connections, `CLUSTER NODES` parsing, and the
//!   `TopologySource` / `SlotCommands` seams
//! - [`reshard`]: the side-effecting passes (assign, inspect, migrate) and the
//!   operator report
//! - [`config`]: run configuration and execution mode

pub mod client;
pub mod config;
pub mod error;
pub mod reshard;
pub mod slots;

pub use config::{ExecutionMode, ReportFormat, ReshardConfig};
pub use error::{ReshardError, Result};
pub use reshard::{Reporter, Resharder, RunSummary};
