//! Sandbox control server: HTTP API, change events and the idle scheduler.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sandbox::engine::Engine;
use sandbox::io::config::load_config;
use sandbox::io::init::SandboxPaths;
use sandbox::io::pending::PendingQueue;
use sandbox::scheduler::{ConfigSource, Scheduler, SchedulerContext};
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "sandbox-ui")]
#[command(about = "HTTP control surface for an idle-driven code sandbox")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Sandbox root directory
    #[arg(long, default_value = "sandbox")]
    root: PathBuf,

    /// Serve the API without starting the idle scheduler
    #[arg(long)]
    no_autorun: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sandbox_ui=info".parse()?)
                .add_directive("sandbox=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let paths = SandboxPaths::new(&args.root);
    paths.ensure_dirs()?;
    let config = load_config(&paths.config_path)?;
    info!(root = %paths.root.display(), "starting sandbox-ui");

    let ctx = Arc::new(SchedulerContext::new());
    let engine = Arc::new(Engine::new(&paths, config.exec.clone()));
    let queue = PendingQueue::new(&paths.pending_dir, config.exec.script_suffix.clone());

    let scheduler = if args.no_autorun {
        info!("autorun disabled by flag");
        None
    } else {
        let scheduler = Scheduler::new(
            Arc::clone(&ctx),
            Arc::clone(&engine),
            queue.clone(),
            ConfigSource::File(paths.config_path.clone()),
        )?;
        Some(scheduler.spawn()?)
    };

    let state = AppState::new(paths, engine, queue, ctx);
    sse::start_file_watcher(state.clone());
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        tokio::task::spawn_blocking(move || handle.stop())
            .await
            .context("join autorun shutdown")??;
        info!("autorun stopped");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
