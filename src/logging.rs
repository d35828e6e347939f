//! Logging setup using `tracing` + `tracing-subscriber`, with a spinner per
//! running step drawn by `tracing-indicatif`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `ASSETLINE_LOG` environment variable (any `EnvFilter` directive)
//! 3. default to `info`

use std::sync::LazyLock;

use indicatif::ProgressStyle;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_ENV: &str = "ASSETLINE_LOG";

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template("{spinner:.green} [{elapsed}] {msg}")
        .expect("valid progress template")
});

/// Style of the spinner shown next to a running step.
pub(crate) fn task_style() -> ProgressStyle {
    TASK_STYLE.clone()
}

/// Installs the global subscriber. Call once, from `main`.
pub fn init(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

