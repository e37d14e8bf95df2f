use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SyncError};

/// Default filter for a `-v` count. `RUST_LOG` always wins.
pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "diffsync=info,warn",
        2 => "diffsync=debug,info",
        _ => "trace",
    }
}

/// Install the global subscriber: stderr plus, with `log_dir`, a daily-rotated
/// `diffsync.log`. Keep the returned guard alive until exit or buffered file lines
/// are lost.
pub fn init(verbosity: u8, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "diffsync.log"));
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SyncError::config(format!("logging already initialized: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_widens_the_filter() {
        assert_eq!(default_filter(0), "warn");
        assert!(default_filter(1).contains("diffsync=info"));
        assert!(default_filter(2).contains("diffsync=debug"));
        assert_eq!(default_filter(9), "trace");
    }
}
