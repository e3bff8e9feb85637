//! Tracing setup
//!
//! Binaries call [`init_tracing`] once at start. `RUST_LOG` overrides the
//! configured level.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    /// Single line per event
    Compact,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    /// Level for this crate when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
    pub include_target: bool,
    /// Full filter directive, replacing `level` when set
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_location: false,
            include_target: true,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Directive used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> String {
        match &self.env_filter {
            Some(filter) => filter.clone(),
            None => format!("voice_room_client={}", self.level),
        }
    }
}

pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.default_directive())?,
    };

    match config.format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_target(config.include_target),
            );
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
