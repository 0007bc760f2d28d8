mod api;
mod config;
mod engine;
mod error;
mod ui;

use crate::config::Settings;
use crate::engine::alarm::TerminalBell;
use crate::engine::session::MonitorSession;
use env_logger::Builder;
use log::{info, LevelFilter};
use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use ui::dashboard::{Dashboard, DashboardShell};

const LOG_FILE_VAR: &str = "PRICEWATCH_LOG_FILE";

fn init_logger() -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut builder = Builder::new();
    builder
        .filter_level(LevelFilter::Info)
        .filter_module("pricewatch", LevelFilter::Debug)
        .format(|buf, record| {
            let ts = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        });

    // The dashboard owns stdout; logs go to stderr unless a file is named.
    match std::env::var(LOG_FILE_VAR) {
        Ok(path) if !path.trim().is_empty() => {
            let file = File::create(path.trim())?;
            builder
                .target(env_logger::Target::Pipe(Box::new(file)))
                .write_style(env_logger::WriteStyle::Never);
        }
        _ => {
            builder
                .target(env_logger::Target::Stderr)
                .write_style(env_logger::WriteStyle::Always);
        }
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    init_logger()?;

    info!("Starting Pricewatch...");

    let settings = Settings::from_env();
    info!(
        "Feed {} | reconnect every {:?} | refire on every tick: {}",
        settings.stream.base_url,
        settings.stream.reconnect_delay,
        settings.evaluator.refire_on_every_tick
    );

    let shell = Arc::new(DashboardShell::new());
    let session = MonitorSession::new(settings, shell.clone(), Arc::new(TerminalBell));

    Dashboard::new(session, shell).run().await?;

    info!("Shutdown complete");
    Ok(())
}
