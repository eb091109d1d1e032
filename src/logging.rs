//! Tracing subscriber setup.

use crate::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `level`, which accepts
/// `EnvFilter` directives such as `"info"` or `"histograph=debug,warn"`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| Error::Config(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| Error::Config("Logging already initialized".into()))
}
