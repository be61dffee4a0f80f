//! Command-line surface: one subcommand per process mode. Policy and target
//! configuration is read from the environment, not from flags, so the CLI
//! surface itself stays minimal.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Capacity-aware CPU/memory request advisor", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one advisor pass: enumerate workloads, query telemetry, recommend,
    /// publish the report, and (in `apply-pr` mode) plan and open a pull
    /// request. `MODE` selects which of these happens.
    Run,
    /// Serve the exporter: periodically refresh the published report and
    /// expose it as Prometheus metrics plus raw JSON/markdown/HTML.
    Serve,
}
