//! `fabcheck transfer`: two-node bootstrap handshake.

use crate::cli::{Mode, TransferArgs};
use crate::ui;
use anyhow::Context;
use fabcheck_types::config::load_config;
use fabcheck_types::TransferConfig;
use fabcheck_wire::env::SysPaths;
use fabcheck_wire::{
    Completion, HostAgent, InitiatorReport, InitiatorSession, TargetReport, TargetSession,
    TransportAgent, TransportEnv, WireError,
};
use std::path::PathBuf;
use tracing::info;

/// Run one role to completion. On success the process exits from here.
pub fn cmd_transfer(config: Option<PathBuf>, args: TransferArgs) -> anyhow::Result<i32> {
    let config = load_config(config.as_deref()).context("Failed to load configuration")?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let env = TransportEnv::from_env();
    info!(
        mode = ?args.mode,
        node = %env.node_name,
        pod = %env.pod_name,
        "Starting transfer test"
    );
    let agent_config = env.agent_config(config.transfer.backends.clone(), &SysPaths::default());

    match args.mode {
        Mode::Target => {
            let agent = HostAgent::new("target", agent_config)
                .context("Failed to create transport agent")?;
            let done = rt.block_on(run_target(agent, config.transfer, &args.host, args.port))?;
            print_target(done.report());
            done.terminate()
        }
        Mode::Initiator => {
            let agent = HostAgent::new("initiator", agent_config)
                .context("Failed to create transport agent")?;
            let done =
                rt.block_on(run_initiator(agent, config.transfer, &args.host, args.port))?;
            print_initiator(done.report());
            done.terminate()
        }
    }
}

async fn run_target<A: TransportAgent>(
    agent: A,
    config: TransferConfig,
    host: &str,
    port: u16,
) -> Result<Completion<A, TargetReport>, WireError> {
    let mut session = TargetSession::new(agent, config);
    session.configure()?;
    session.listen(host, port).await?;
    session.serve().await
}

async fn run_initiator<A: TransportAgent>(
    agent: A,
    config: TransferConfig,
    host: &str,
    port: u16,
) -> Result<Completion<A, InitiatorReport>, WireError> {
    let mut session = InitiatorSession::new(agent, config);
    session.configure()?;
    session.connect(host, port).await?;
    session.run().await
}

fn print_target(report: &TargetReport) {
    ui::blank();
    ui::section("Transfer target");
    ui::kv("Initiator", &report.peer.to_string());
    ui::kv("Buffer", &format!("{} bytes", report.buffer_size));
    ui::kv("Descriptor", &report.mem_desc);
    ui::kv_ok("Ack", &report.ack);
    ui::success("Target completed successfully");
}

fn print_initiator(report: &InitiatorReport) {
    ui::blank();
    ui::section("Transfer initiator");
    ui::kv("Remote", &report.remote_agent);
    ui::kv("Attempts", &report.connect_attempts.to_string());
    ui::kv("Buffer", &format!("{} bytes", report.local_buffer_len));
    ui::kv("Elapsed", &format!("{:.2}s (simulated)", report.elapsed.as_secs_f64()));
    ui::kv("Bandwidth", &format!("{:.2} GB/s", report.bandwidth_gbps));
    ui::success("Initiator completed successfully");
}
