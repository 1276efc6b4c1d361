use std::time::Duration;
use std::{env, fs};

use anyhow::Context;
use futures::StreamExt;
use map_reduce_rs::mr::coordinator::Coordinator;
use map_reduce_rs::mr::rpc;
use tarpc::server::incoming::Incoming;
use tarpc::tokio_serde::formats::Json;

/// Launcher: parses arguments, constructs the coordinator, wires it to
/// the RPC transport, and polls `Done` until the job finishes. Carries
/// no task-lifecycle logic of its own — that all lives in `mr::coordinator`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: mrcoordinator <n-reduce> <input-file>...");
        std::process::exit(1);
    }
    let n_reduce: u32 = args[1]
        .parse()
        .context("<n-reduce> must be a positive integer")?;
    let files: Vec<String> = args[2..].to_vec();

    tracing::info!(map_tasks = files.len(), n_reduce, "starting coordinator");
    let coordinator = Coordinator::new(files, n_reduce);

    let sock_path = rpc::coordinator_sock();
    // Remove any stale socket left behind by a prior run before binding.
    if let Err(e) = fs::remove_file(&sock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e).context(format!("failed to remove stale socket at {sock_path}"));
        }
    }

    let listener = tarpc::serde_transport::unix::listen(&sock_path, Json::default)
        .await
        .with_context(|| format!("failed to bind coordinator socket at {sock_path}"))?;
    tracing::info!(sock_path = %sock_path, "listening for worker connections");

    let serving = coordinator.clone();
    tokio::spawn(
        listener
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .execute(serving.serve()),
    );

    while !coordinator.done() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    tracing::info!("all map and reduce tasks complete");
    println!("MapReduce job finished; see mr-out-* for results");
    Ok(())
}
