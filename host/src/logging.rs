//! Logging setup, mirroring `Server::init_logging` in the teacher: a
//! `tracing_subscriber` registry built once at startup from a
//! CLI/env-configurable level.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).context("parse log level")?;
    fmt().with_env_filter(filter).with_target(true).try_init().ok();
    Ok(())
}
