//! Reno Sender
//!
//! Transmits increasing segment numbers to a receiver, adapting its window
//! with slow start, congestion avoidance and fast recovery, and logs the
//! (time, cwnd, ssthresh) series to a file for offline plotting.

use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use reno_core::config::{self, Config};
use reno_core::{run_flow, LogWriter};
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Receiver address
    #[arg(short, long, default_value = config::DEFAULT_PEER)]
    peer: SocketAddr,

    /// Local address to bind to
    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// The flow ends once the last segment sent exceeds this number
    #[arg(short, long, default_value_t = config::COMPLETION_LIMIT)]
    limit: u64,

    #[arg(long, default_value_t = config::INITIAL_CWND)]
    initial_cwnd: f64,

    #[arg(long, default_value_t = config::INITIAL_SSTHRESH)]
    initial_ssthresh: u64,

    /// Fixed retransmission timeout in microseconds
    #[arg(short, long, default_value_t = 2_000)]
    timeout_us: u64,

    /// Pause between consecutive segments of one window refill, in microseconds
    #[arg(long, default_value_t = 0)]
    pacing_us: u64,

    /// Where to write the cwnd/ssthresh series
    #[arg(long, default_value = "cwnd_data.log")]
    log: PathBuf,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            initial_cwnd: self.initial_cwnd,
            initial_ssthresh: self.initial_ssthresh,
            completion_limit: self.limit,
            retransmission_timeout: Duration::from_micros(self.timeout_us),
            pacing: Duration::from_micros(self.pacing_us),
            peer: self.peer,
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config();
    config.validate().context("invalid options")?;

    let file = File::create(&args.log)
        .with_context(|| format!("failed to create telemetry log {}", args.log.display()))?;
    let socket = UdpSocket::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    info!("Sending to {} with telemetry in {}", config.peer, args.log.display());
    let (summary, telemetry) = run_flow(socket, &config, LogWriter::new(BufWriter::new(file)))
        .await
        .context("flow failed")?;

    if telemetry.failed() > 0 {
        warn!("{} telemetry records could not be written", telemetry.failed());
    }
    let records = telemetry.written();
    telemetry.finish().context("failed to flush telemetry log")?;

    println!(
        "Sent: {} -- Acked: {} -- Retransmissions: {} -- Timeouts: {} -- Fast retransmits: {} -- Records: {} -- Duration: {:.2?}",
        summary.last_sent,
        summary.last_acked,
        summary.stats.retransmissions,
        summary.stats.timeouts,
        summary.stats.fast_retransmits,
        records,
        summary.elapsed
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_config() {
        let args = Args::parse_from(["reno-sender"]);
        assert_eq!(args.config(), Config::default());
        assert_eq!(args.log, PathBuf::from("cwnd_data.log"));
    }

    #[test]
    fn options_flow_into_config() {
        let args = Args::parse_from([
            "reno-sender",
            "--peer",
            "10.0.0.2:4000",
            "--limit",
            "50",
            "--initial-ssthresh",
            "8",
            "--timeout-us",
            "250000",
            "--pacing-us",
            "10",
        ]);
        let config = args.config();
        assert_eq!(config.peer, "10.0.0.2:4000".parse().unwrap());
        assert_eq!(config.completion_limit, 50);
        assert_eq!(config.initial_ssthresh, 8);
        assert_eq!(config.retransmission_timeout, Duration::from_millis(250));
        assert_eq!(config.pacing, Duration::from_micros(10));
        config.validate().unwrap();
    }
}
