use std::io;
use std::path::Path;

use chrono::Local;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

const DEFAULT_FILTER: &str = "info";

/// Installs the process-wide subscriber. Output goes to stderr, since stdout
/// carries the MCP stdio protocol, and additionally to a timestamp-named file
/// under `log_dir` when one is given.
///
/// The filter comes from `RUST_LOG`, falling back to `info`.
pub fn init_tracing(log_dir: Option<&Path>) -> io::Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_name = format!("conflux_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let appender = rolling::never(dir, &file_name);
            Some((
                fmt::Layer::new()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_file(true)
                    .with_line_number(true),
                dir.join(file_name),
            ))
        }
        None => None,
    };
    let (file_layer, file_path) = file_layer.unzip();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(true),
        )
        .with(file_layer)
        .with(filter);

    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;

    match file_path {
        Some(path) => tracing::debug!(
            target: "conflux::utils::tracing",
            path = %path.display(),
            "Tracing initialized with stderr and file output"
        ),
        None => tracing::debug!(
            target: "conflux::utils::tracing",
            "Tracing initialized with stderr output"
        ),
    }

    Ok(())
}
