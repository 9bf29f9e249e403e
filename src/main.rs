pub mod acquisition;
pub mod config;
pub mod serial;
pub mod utils;
pub mod writer;

use std::path::Path;
use std::time::Instant;
use std::time::SystemTime;

use anyhow::Context;
use colored::*;
use humantime::format_duration;
use log::{error, info, warn, Level};

use crate::acquisition::{Acquisition, Termination};
use crate::config::{ConfigLogging, CONFIG_PATH};
use crate::writer::OutputFile;

fn setup_logger(config: &ConfigLogging) -> anyhow::Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            let color = match record.level() {
                Level::Error => "red",
                Level::Warn => "yellow",
                Level::Info => "green",
                Level::Debug => "blue",
                Level::Trace => "magenta",
            };

            let colored_level = format!("{}", record.level()).color(color);
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339_seconds(SystemTime::now()),
                colored_level,
                record.target(),
                message
            ))
        })
        .level(config.level_filter()?)
        .chain(std::io::stdout());

    if let Some(path) = &config.file {
        dispatch = dispatch.chain(
            fern::log_file(path).with_context(|| format!("Unable to open log file: {}", path.display()))?,
        );
    }

    dispatch.apply()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = config::load_config(Path::new(CONFIG_PATH))?;
    setup_logger(&config.logging)?;

    let app_start = Instant::now();
    let shutdown = utils::shutdown_flag().context("Unable to install signal handlers")?;

    let acquire = &config.acquire;
    info!(
        "Opening serial port: {} at {} baud",
        acquire.serial_port.bold(),
        acquire.baud_rate
    );
    let source = serial::open(&acquire.port_settings(), acquire.invalid_utf8, shutdown)?;

    let output = OutputFile::create(&acquire.output_file)
        .with_context(|| format!("Unable to create output file: {}", acquire.output_file.display()))?;
    info!("Writing serial data to {}", output.path().display().to_string().bold());

    let report = Acquisition::new(source, output, acquire.invalid_utf8).run();

    match &report.termination {
        Termination::Disconnected | Termination::Cancelled => info!("Stopped reading: {}", report.termination),
        Termination::DecodeFailed(_) => warn!("Stopped reading: {}", report.termination),
        Termination::ReadFailed(_) | Termination::WriteFailed(_) => error!("Stopped reading: {}", report.termination),
    }

    if report.lines_skipped > 0 {
        warn!("Skipped {} lines with invalid UTF-8", report.lines_skipped);
    }

    info!(
        "Exiting after {} lines ({} bytes), ran for {}",
        report.lines_written,
        report.bytes_written,
        format_duration(app_start.elapsed())
    );

    Ok(())
}
