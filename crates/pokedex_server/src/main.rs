//! Pokedex HTTP server entry point.
//!
//! # Responsibility
//! - Parse configuration, start logging, open the store once for the
//!   lifetime of the process.
//! - Serve the records API and static assets until Ctrl-C.

mod config;
mod routes;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::Cli;
use log::info;
use pokedex_api::ApiContext;
use pokedex_core::{default_log_level, init_logging, init_stderr_logging, logging_status};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| default_log_level().to_string());
    let logging = match &cli.log_dir {
        Some(dir) => init_logging(&level, dir),
        None => init_stderr_logging(&level),
    };
    logging.map_err(|err| anyhow!(err))?;

    if let Some((active_level, target)) = logging_status() {
        info!(
            "event=server_logging module=server status=ok level={} target={}",
            active_level, target
        );
    }

    let options = cli.repository_options();
    let ctx = if cli.in_memory {
        info!("event=server_store module=server status=ok backend=memory");
        ApiContext::memory()
    } else {
        // Opened once; every request shares this handle until shutdown.
        ApiContext::open_sqlite(&cli.db_path).with_context(|| {
            format!("failed to open database `{}`", cli.db_path.display())
        })?
    }
    .with_options(options);

    let app = routes::router(ctx, &cli.public_dir);
    let listener = tokio::net::TcpListener::bind(cli.addr)
        .await
        .with_context(|| format!("failed to bind {}", cli.addr))?;
    info!(
        "event=server_start module=server status=ok addr={} existence_check={} update_mode={} empty_list={}",
        cli.addr, options.existence_check, options.update_mode, options.empty_list
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated abnormally")?;

    info!("event=server_stop module=server status=ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!(
            "event=server_stop module=server status=error error_code=signal_failed error={}",
            err
        );
    }
}
