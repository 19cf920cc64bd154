//! Logging setup for the batch pipeline.
//!
//! Logs go to stderr so stdout stays clean for shell redirection. The level
//! is controlled via the `FACEPREP_LOG` environment variable (`trace`,
//! `debug`, `info`, `warn`, `error`), defaulting to `info`.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("FACEPREP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
