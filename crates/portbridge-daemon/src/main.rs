//! portbridge
//!
//! Serves a front door that redirects every request to a child application,
//! and supervises that child: patches its port, launches it and relays its
//! output to stdout.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info, warn};

use portbridge_core::Config;
use portbridge_core::config::{RejectedOverride, load_config};
use portbridge_core::tracing_init::{default_filter, init_tracing};
use portbridge_daemon::routes::{AppState, build_router};
use portbridge_daemon::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "portbridge")]
#[command(version, about = "Redirecting front door and supervisor for a child web app")]
struct Args {
    /// Path to a TOML config file (defaults to ./portbridge.toml if present)
    #[arg(long, env = "PORTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Front door bind address
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Host the front door redirects to
    #[arg(long)]
    target_host: Option<String>,

    /// Port the child listens on and the front door redirects to
    #[arg(long)]
    target_port: Option<u16>,

    /// Working directory for the child application
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Skip the in-place port patch of the child's source file
    #[arg(long)]
    no_patch: bool,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Child command line, e.g. `portbridge -- node app.js`
    #[arg(last = true)]
    command: Vec<String>,
}

impl Args {
    /// Apply CLI flags on top of file and environment configuration.
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.front_door.listen_addr = addr;
        }
        if let Some(host) = self.target_host {
            config.front_door.target_host = host;
        }
        if let Some(port) = self.target_port {
            config.front_door.target_port = port;
        }
        if let Some(dir) = self.working_dir {
            config.child.working_dir = Some(dir);
        }
        if self.no_patch {
            config.child.patch.enabled = false;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.log_json {
            config.log.json = true;
        }
        let mut command = self.command.into_iter();
        if let Some(program) = command.next() {
            config.child.program = program;
            config.child.args = command.collect();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, rejected) = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let log_filter = default_filter(&["portbridge_daemon", "portbridge_core"], &config.log.level);
    init_tracing(&log_filter, config.log.json);
    for RejectedOverride { key, value } in rejected {
        warn!(key, %value, "Ignoring invalid environment override");
    }

    let target_base = config.front_door.target_base_url();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.front_door.listen_addr,
        target = %target_base,
        "Starting portbridge"
    );

    // Bind before launching the child so a taken port fails fast.
    let listener = tokio::net::TcpListener::bind(config.front_door.listen_addr).await?;

    let supervisor = Supervisor::new(config.child, config.front_door.target_port);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let supervisor_handle = tokio::spawn(supervisor.run(tokio::io::stdout(), shutdown_rx));

    let app = build_router(AppState::new(target_base));
    info!(addr = %config.front_door.listen_addr, "Front door ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    request_supervisor_shutdown(&shutdown_tx);
    match supervisor_handle.await {
        Ok(reason) => info!(?reason, "Supervisor stopped"),
        Err(e) => warn!(error = %e, "Supervisor task failed"),
    }

    info!("portbridge stopped");
    Ok(())
}

/// Ask the supervisor to stop. Returns `false` if it had already finished.
fn request_supervisor_shutdown(shutdown_tx: &tokio::sync::watch::Sender<bool>) -> bool {
    let delivered = shutdown_tx.send(true).is_ok();
    if !delivered {
        debug!("Supervisor already finished");
    }
    delivered
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C shutdown signal"),
        () = terminate => info!("Received SIGTERM shutdown signal"),
    }
}
