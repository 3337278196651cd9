//! Process-wide tracing initialization: `EnvFilter` driven by
//! `RUST_LOG`, human output on a TTY, `--json` for machine
//! consumption, plus a non-blocking rotated file sink under
//! `<sentinel>/logs/`.

use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::OutputOptions;

/// Guard that must be held for the lifetime of the process; dropping
/// it flushes the non-blocking file appender.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(output: &OutputOptions, log_dir: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let filter = if output.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console_layer = if output.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_ansi(!output.plain)
            .boxed()
    };

    let (file_layer, file_guard) = if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, "orc.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().json().with_writer(non_blocking)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    let registry = tracing_subscriber::registry().with(filter).with(console_layer);

    if let Some(file_layer) = file_layer {
        registry.with(file_layer).try_init().ok();
    } else {
        registry.try_init().ok();
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
