//! Structured logging setup, following the split the teacher crate uses in
//! `core::log::tracing_init` (`try_create_layers` /
//! `try_create_display_layer` / `try_create_file_layer`): build a list of
//! `tracing_subscriber` layers, then let the caller decide when to
//! install them as the global default.

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Where log output should go. Mirrors the teacher's `WriterConfig`
/// enum, minus the `SharedWriter` variant this crate has no use for
/// (there is no terminal-multiplexing layer here to share a writer with).
#[derive(Debug, Clone)]
pub enum WriterConfig {
    Stdout,
    Stderr,
    /// Rolling daily log file under `directory`, with the given file name
    /// prefix, via `tracing_appender::rolling::daily`.
    RollingFile { directory: String, prefix: String },
}

/// Builds the layer stack for `writer_config` at `env_filter` (an
/// `EnvFilter` directive string, e.g. `"osal_core=debug"`) and installs it
/// as the global default subscriber. Returns the rolling-file guard (if
/// any) which must be kept alive for the duration of the process for
/// buffered file writes to be flushed; dropping it early truncates the
/// log.
pub fn install_fmt_subscriber(
    writer_config: WriterConfig,
    env_filter: &str,
) -> miette::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_new(env_filter)
        .map_err(|e| miette::miette!("invalid env filter {env_filter:?}: {e}"))?;

    match writer_config {
        WriterConfig::Stdout => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_filter(filter))
                .try_init()
                .map_err(|e| miette::miette!("tracing already initialized: {e}"))?;
            Ok(None)
        }
        WriterConfig::Stderr => {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_filter(filter))
                .try_init()
                .map_err(|e| miette::miette!("tracing already initialized: {e}"))?;
            Ok(None)
        }
        WriterConfig::RollingFile { directory, prefix } => {
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_filter(filter))
                .try_init()
                .map_err(|e| miette::miette!("tracing already initialized: {e}"))?;
            Ok(Some(guard))
        }
    }
}
