//! pingu-ctl: one-shot liveness checks from the command line.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use libpingu::{Engine, EngineConfig, PeerAddr};

#[derive(Parser)]
#[command(name = "pingu-ctl", about = "Check whether UDP peers answer a ping")]
struct Cli {
    /// Local address to send from.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: String,

    /// Log dropped datagrams and send failures.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ping a single peer and wait for its pong.
    Ping {
        /// Peer address, `ip:port`.
        addr: String,
        /// How long to wait, in ms.
        #[arg(long, default_value = "1000")]
        timeout: u64,
    },

    /// Ping several peers at once and report each.
    Sweep {
        /// Peer addresses, `ip:port` each.
        #[arg(required = true)]
        addrs: Vec<String>,
        /// How long to wait, in ms.
        #[arg(long, default_value = "1000")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    let engine = Engine::bind(&cli.bind, EngineConfig::default().verbose(cli.verbose))
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    engine.start();

    let ok = match cli.command {
        Command::Ping { addr, timeout } => cmd_ping(&engine, &addr, timeout).await?,
        Command::Sweep { addrs, timeout } => cmd_sweep(&engine, &addrs, timeout).await?,
    };

    engine.close().await;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_ping(engine: &Engine, addr: &str, timeout_ms: u64) -> Result<bool> {
    let peer: PeerAddr = addr
        .parse()
        .with_context(|| format!("invalid address {addr:?}"))?;

    let started = Instant::now();
    match engine
        .ping_pong_addr(peer, Duration::from_millis(timeout_ms))
        .await
    {
        Ok(()) => {
            let rtt = started.elapsed();
            println!("pong from {peer}: time={:.2} ms", rtt.as_secs_f64() * 1000.0);
            Ok(true)
        }
        Err(e) => {
            println!("{e}");
            Ok(false)
        }
    }
}

async fn cmd_sweep(engine: &Engine, addrs: &[String], timeout_ms: u64) -> Result<bool> {
    let peers = addrs
        .iter()
        .map(|a| {
            a.parse::<PeerAddr>()
                .with_context(|| format!("invalid address {a:?}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let results = engine
        .probe(peers, Duration::from_millis(timeout_ms))
        .await?;

    let sorted: BTreeMap<_, _> = results.into_iter().collect();
    let mut all_alive = true;
    for (peer, alive) in &sorted {
        all_alive &= *alive;
        println!("{:<45} {}", peer.to_string(), if *alive { "alive" } else { "dead" });
    }
    println!(
        "{}/{} peers answered",
        sorted.values().filter(|a| **a).count(),
        sorted.len()
    );
    Ok(all_alive)
}
