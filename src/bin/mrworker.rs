use anyhow::Context;
use map_reduce_rs::mr::function::wc;
use map_reduce_rs::mr::rpc::{self, CoordinatorRpcClient};
use map_reduce_rs::mr::worker;
use tarpc::tokio_serde::formats::Json;
use tarpc::{client, serde_transport};

/// Launcher: connects to the coordinator's socket, wires in the
/// word-count map/reduce plugin, and hands off to the poll loop in
/// `mr::worker`. Exits when the coordinator signals the job is done or
/// the connection is lost.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let sock_path = rpc::coordinator_sock();
    let transport = serde_transport::unix::connect(&sock_path, Json::default)
        .await
        .with_context(|| format!("failed to connect to coordinator at {sock_path}"))?;

    let client = CoordinatorRpcClient::new(client::Config::default(), transport).spawn();
    tracing::info!(sock_path = %sock_path, "connected to coordinator");

    worker::run(client, wc::map, wc::reduce).await
}
