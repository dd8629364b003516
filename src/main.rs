use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use caching_filter_proxy::{console, ProxyConfig, ProxyServer, ProxyServices};

const STATS_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<std::net::IpAddr>,

    #[arg(long)]
    port: Option<u16>,

    /// File with one blocklist pattern per line
    #[arg(long)]
    blocklist: Option<PathBuf>,

    /// Reset saved-bandwidth and saved-time counters on cache clear
    #[arg(long)]
    reset_stats_on_clear: bool,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,

    #[arg(long, short = 'q')]
    quiet: bool,

    #[arg(long, short = 'v')]
    verbose: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ProxyConfig> {
        let mut config = match self.config {
            Some(ref path) => ProxyConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };
        if let Some(host) = self.host {
            config.bind_address = host;
        }
        if let Some(port) = self.port {
            config.bind_port = port;
        }
        if self.blocklist.is_some() {
            config.blocklist_file = self.blocklist;
        }
        if self.reset_stats_on_clear {
            config.reset_stats_on_clear = true;
        }
        if self.no_console {
            config.console = false;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = args.into_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let services = ProxyServices::from_config(&config)?;
    let stats = std::sync::Arc::clone(&services.stats);
    let server = ProxyServer::bind(&config, services)?;
    let control = server.control();
    let handle = server.spawn()?;

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(STATS_INTERVAL);
        timer.tick().await;
        loop {
            timer.tick().await;
            stats.log_summary();
        }
    });

    if config.console {
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = console::run(control, stdin, tokio::io::stdout()).await {
                warn!("Operator console stopped: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    handle.shutdown();
    handle.join().await;
    Ok(())
}
