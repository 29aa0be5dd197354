//! wmstats - workload-management statistics dashboard

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wmstats::cache::SnapshotCache;
use wmstats::cli::{stats_table, StatsOptions};
use wmstats::config::Config;
use wmstats::fetch::SnapshotSource;
use wmstats::filters::Filters;
use wmstats::presentation::StatsKind;
use wmstats::routes;
use wmstats::state::AppState;
use wmstats::tasks::refresh;

/// Workload-management statistics: campaign, site, release and agent summaries
#[derive(Parser)]
#[command(name = "wmstats", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP dashboard
    Serve {
        /// Path to a JSON configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Print one summary table and exit
    Stats {
        /// Statistics feed: local file or HTTP(S) URL
        #[arg(long)]
        uri: String,

        /// Table to print: campaign, site, cmssw or agent
        #[arg(long, default_value = "campaign")]
        stats: String,

        /// Filters as key=value pairs, e.g. "site=T1_US.*,campaign=Run2022.*"
        #[arg(long, default_value = "")]
        filters: String,

        /// Bearer token, or path to a file holding it
        #[arg(long)]
        token: Option<String>,

        /// Upstream request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn init_tracing(verbose: u8, json: bool) {
    let default_filter = match verbose {
        0 => "wmstats=info,tower_http=info",
        1 => "wmstats=debug,tower_http=debug",
        _ => "wmstats=trace,tower_http=debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "Unable to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

async fn serve(config_path: Option<PathBuf>, verbose: u8) -> anyhow::Result<()> {
    let mut config = Config::load(config_path.as_deref()).context("loading configuration")?;
    config.verbose = config.verbose.max(verbose);
    init_tracing(config.verbose, config.log_json);

    let source = SnapshotSource::new(config.access_uri.clone(), config.token.clone(), config.timeout())
        .context("building snapshot source")?;
    let cache = SnapshotCache::new(source, config.renew_interval());
    let listen_addr = config.listen_addr();
    let rate = config.limiter()?;
    let tick = config.renew_interval().max(Duration::from_secs(1));

    let state = AppState::new(config, cache)?;
    // Warm the cache; a failure here leaves the server not ready until the next tick.
    state.refresh().await;

    let refresh_state = state.clone();
    let refresher = tokio::spawn(async move {
        refresh::refresh_task(refresh_state, tick).await;
    });

    info!(
        "wmstats v{} starting on {} (base '{}')",
        env!("CARGO_PKG_VERSION"),
        listen_addr,
        state.config.base_path()
    );
    info!("Feed: {}", state.cache.uri());
    info!("Renew interval: {}s, limiter: {}", state.config.renew_interval, state.config.limiter_rate);

    let app = routes::router(state, rate);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    refresher.abort();
    info!("HTTP server exited properly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config, cli.verbose).await,
        Commands::Stats {
            uri,
            stats,
            filters,
            token,
            timeout,
        } => {
            init_tracing(cli.verbose, false);
            let options = StatsOptions {
                uri,
                token,
                timeout: timeout.filter(|t| *t > 0).map(Duration::from_secs),
                kind: StatsKind::parse(Some(&stats)),
                filters: Filters::parse(&filters),
                verbose: cli.verbose,
            };
            let table = stats_table(&options).await?;
            print!("{}", table);
            Ok(())
        }
    }
}
