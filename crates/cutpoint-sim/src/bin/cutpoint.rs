//! Cutpoint CLI
//!
//! Builds a process group from a graph file (or a ring), feeds it some
//! values, takes a network snapshot and optionally kills and recovers one
//! process.
//!
//! # Example
//!
//! ```bash
//! # Chandy-Lamport on a 3-ring, value 10 sent from 0 to 1 before the cut
//! cutpoint --ring 3 --send 0:1:10 --initiator 0
//!
//! # Peterson-Kearns on a graph file, kill and recover "actor0"
//! cutpoint --graph net.dot --protocol pk --send actor0:actor1:10 \
//!     --snapshot-dir ./snapshots --message-log ./messages.log --terminate actor0
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cutpoint_core::{Input, ProcessId, ProtocolKind};
use cutpoint_sim::{AsyncHost, CheckpointRecoveryManager, Topology};

/// Cutpoint snapshot simulator
///
/// Deterministic for a given seed unless `--async-host` is set.
#[derive(Parser, Debug)]
#[command(name = "cutpoint")]
#[command(version, about, long_about = None)]
struct Args {
    /// Graph file with `"a" -> "b"` / `"a" -- "b"` edge lines
    #[arg(short = 'g', long)]
    graph: Option<PathBuf>,

    /// Size of the bidirectional ring used when no graph file is given
    #[arg(long, default_value = "3")]
    ring: usize,

    /// Snapshot protocol: chandy-lamport, lai-yang or peterson-kearns
    #[arg(short = 'p', long, default_value = "chandy-lamport")]
    protocol: ProtocolKind,

    /// Seed for shuffled delivery
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Hop budget of originated values
    #[arg(long, default_value = "0")]
    relay_hops: u32,

    /// Directory for snapshot records (in-memory when omitted)
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Message log file (in-memory when omitted)
    #[arg(long)]
    message_log: Option<PathBuf>,

    /// Apply the workload at a process before the snapshot: ID=VALUE
    #[arg(long, value_parser = parse_compute)]
    compute: Vec<(ProcessId, i64)>,

    /// Send a value before the snapshot: FROM:TO:VALUE
    #[arg(long, value_parser = parse_send)]
    send: Vec<(ProcessId, ProcessId, i64)>,

    /// Process that initiates the snapshot (every process when omitted)
    #[arg(short = 'i', long)]
    initiator: Option<ProcessId>,

    /// Process to terminate and recover after the snapshot
    #[arg(short = 't', long)]
    terminate: Option<ProcessId>,

    /// Run the snapshot on the tokio task-per-process host instead
    #[arg(long)]
    async_host: bool,
}

fn parse_compute(s: &str) -> Result<(ProcessId, i64), String> {
    let (id, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=VALUE, got '{s}'"))?;
    let value = value.parse().map_err(|e| format!("bad value '{value}': {e}"))?;
    Ok((ProcessId::new(id), value))
}

fn parse_send(s: &str) -> Result<(ProcessId, ProcessId, i64), String> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(from), Some(to), Some(value)) => {
            let value = value.parse().map_err(|e| format!("bad value '{value}': {e}"))?;
            Ok((ProcessId::new(from), ProcessId::new(to), value))
        }
        _ => Err(format!("expected FROM:TO:VALUE, got '{s}'")),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cutpoint=info")),
        )
        .init();

    let args = Args::parse();
    let topology = match &args.graph {
        Some(path) => Topology::from_file(path)?,
        None => Topology::ring(args.ring),
    };
    info!(
        processes = topology.len(),
        protocol = %args.protocol,
        seed = args.seed,
        "Starting simulation"
    );
    print_topology(&topology);

    if args.async_host {
        return run_async(&args, &topology);
    }

    let mut builder = CheckpointRecoveryManager::builder()
        .protocol(args.protocol)
        .seed(args.seed)
        .relay_hops(args.relay_hops)
        .topology(topology);
    if let Some(dir) = &args.snapshot_dir {
        builder = builder.snapshot_dir(dir);
    }
    if let Some(path) = &args.message_log {
        builder = builder.message_log_path(path);
    }
    let mut manager = builder.build()?;

    for (id, value) in &args.compute {
        manager.compute(id, *value)?;
    }
    for (from, to, value) in &args.send {
        manager.send(from, to, *value)?;
    }
    if args.protocol == ProtocolKind::PetersonKearns {
        manager.run_until_quiescent()?;
    }

    match &args.initiator {
        Some(id) => manager.initiate_snapshot(id)?,
        None => {
            manager.initiate_network_snapshot();
        }
    }
    let steps = manager.run_until_quiescent()?;

    println!("Snapshot ({}, {steps} deliveries)", args.protocol);
    let ids: Vec<ProcessId> = manager.topology().nodes().cloned().collect();
    for id in &ids {
        match manager.snapshots().list_latest(id)? {
            Some(record) => println!(
                "  {id}: epoch {} state {} in-transit {:?}",
                record.epoch, record.state, record.channel_states
            ),
            None => println!("  {id}: no snapshot"),
        }
    }

    if let Some(id) = &args.terminate {
        let report = match manager.terminate_actor(id)? {
            Some(report) => report,
            None => manager.recover_actor(id)?,
        };
        println!(
            "Recovered {}: epoch {} state {} -> {} ({} replayed, {} skipped)",
            report.process,
            report.epoch,
            report.restored_state,
            report.state_after,
            report.replayed,
            report.skipped
        );
    }

    let stats = manager.stats();
    println!(
        "Delivered {} messages, persisted {} snapshots ({} failures)",
        stats.delivered, stats.persisted, stats.persist_failures
    );
    Ok(())
}

fn print_topology(topology: &Topology) {
    println!("Topology ({} processes, {} channels)", topology.len(), topology.edges().len());
    for (id, neighbors) in topology.neighbor_map() {
        let names: Vec<String> = neighbors.iter().map(ToString::to_string).collect();
        println!("  {id} -> [{}]", names.join(", "));
    }
}

fn run_async(args: &Args, topology: &Topology) -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let snapshots = Arc::new(cutpoint_storage::InMemorySnapshotStore::new());
        let log = Arc::new(cutpoint_storage::InMemoryMessageLog::new());
        let mut config = cutpoint_core::ProcessConfig::for_protocol(args.protocol);
        config.relay_hops = args.relay_hops;

        let host = AsyncHost::from_topology(config, topology, snapshots.clone(), log)?;
        for (id, value) in &args.compute {
            host.submit(id, Input::Compute { value: *value })?;
        }
        for (from, to, value) in &args.send {
            host.submit(
                from,
                Input::Send {
                    to: to.clone(),
                    value: *value,
                },
            )?;
        }
        let initiators: Vec<ProcessId> = match &args.initiator {
            Some(id) => vec![id.clone()],
            None => topology.nodes().cloned().collect(),
        };
        for id in &initiators {
            host.submit(id, Input::InitiateSnapshot)?;
        }

        if !host.wait_quiescent(Duration::from_secs(30)).await {
            return Err("async host did not go quiescent within 30s".into());
        }
        for record in snapshots.all() {
            println!(
                "  {}: epoch {} state {} in-transit {:?}",
                record.process, record.epoch, record.state, record.channel_states
            );
        }
        host.shutdown().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
