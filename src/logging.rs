use anyhow::{Result, anyhow};
use std::str::FromStr;
use tracing_subscriber::{filter::EnvFilter, filter::LevelFilter, fmt, prelude::*};

/// Parse a configured level name, falling back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    let level = level.trim();
    if level.is_empty() {
        return LevelFilter::INFO;
    }
    LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))?;

    tracing::debug!("[logging] initialized at level {}", parse_level(level));
    Ok(())
}
