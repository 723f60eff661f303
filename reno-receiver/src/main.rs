/*  UDP receiver that answers every segment with its cumulative acknowledgment,
    dropping a fixed fraction of the acknowledgments to model a lossy path.
 */

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use reno_core::config;
use tokio::{net::UdpSocket, signal, time};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line arguments parser for this application.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = config::DEFAULT_PEER)]
    bind: SocketAddr,

    /// Probability that an acknowledgment is dropped
    #[arg(short, long, default_value_t = config::DROP_PROBABILITY)]
    drop_probability: f64,

    /// Seed for the loss pattern; random when absent
    #[arg(short, long)]
    seed: Option<u64>,

    /// How long to serve before exiting, in seconds
    #[arg(long, default_value_t = config::SERVE_TIME.as_secs())]
    serve_time: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    config::validate_drop_probability(args.drop_probability).context("invalid options")?;

    let socket = UdpSocket::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let serve_time = Duration::from_secs(args.serve_time);

    tokio::select! {
        served = reno_core::serve(socket, args.drop_probability, args.seed) => {
            served.context("receiver failed")?;
        }
        _ = time::sleep(serve_time) => info!("Served for {serve_time:?}, exiting"),
        _ = signal::ctrl_c() => info!("Interrupted, exiting"),
    }

    Ok(())
}
