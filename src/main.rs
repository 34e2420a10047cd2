//! Node binary: load configuration, open the store, serve.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use turnlog::{Node, Settings, seeker, server, store};

#[derive(Parser, Debug)]
#[command(name = "turnlog")]
#[command(about = "Run a replicated-log node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(report) => {
            error!(?report, "could not load the configuration");
            std::process::exit(1);
        }
    };
    info!(
        pid = settings.pid,
        mode = settings.mode(),
        quorum = settings.quorum,
        peers = settings.nodes.len(),
        "node configured"
    );

    let store = match store::open(&settings) {
        Ok(store) => store,
        Err(report) => {
            error!(?report, "could not open the store");
            std::process::exit(1);
        }
    };

    let node = match Node::new(settings, store) {
        Ok(node) => node,
        Err(report) => {
            error!(?report, "could not build the peer client");
            std::process::exit(1);
        }
    };

    if !node.settings.manual_mode && node.settings.seek_active && node.begin_seeking() {
        info!(
            interval_secs = node.settings.seek_timeout,
            "automatic mode, starting the seek loop"
        );
        tokio::spawn(seeker::run(node.clone()));
    }

    let addr = format!("{}:{}", node.settings.listener_ip, node.settings.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "could not bind the listener");
            std::process::exit(1);
        }
    };
    info!(%addr, "serving");

    if let Err(error) = axum::serve(listener, server::router(node)).await {
        error!(%error, "server error");
        std::process::exit(1);
    }
}
