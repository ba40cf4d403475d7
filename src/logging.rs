//! Live-reloadable logging.
//!
//! The global `tracing` subscriber is built with a reloadable
//! [`EnvFilter`], so a rehash can change verbosity without a restart.
//! Raw protocol I/O is logged at TRACE under the `userinput` and
//! `useroutput` targets and is only enabled when `logging.raw_io` is set.

use crate::config::LoggingConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

pub const RAW_INPUT_TARGET: &str = "userinput";
pub const RAW_OUTPUT_TARGET: &str = "useroutput";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("failed to reload log filter: {0}")]
    Reload(String),
    #[error("failed to install global subscriber: {0}")]
    Init(String),
}

#[derive(Debug)]
pub struct LogManager {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    raw_io: AtomicBool,
    directive: Mutex<String>,
}

impl LogManager {
    /// Install the global subscriber. Call once per process.
    pub fn init_global(config: &LoggingConfig) -> Result<Self, LogError> {
        let (directive, filter) = build_filter(config)?;
        let (filter_layer, handle) = reload::Layer::new(filter);
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| LogError::Init(e.to_string()))?;
        Ok(Self {
            handle: Some(handle),
            raw_io: AtomicBool::new(config.raw_io),
            directive: Mutex::new(directive),
        })
    }

    /// A manager that validates and tracks settings without owning the
    /// global subscriber. Used when embedding the server.
    pub fn detached() -> Self {
        Self {
            handle: None,
            raw_io: AtomicBool::new(false),
            directive: Mutex::new(String::new()),
        }
    }

    /// Apply a new logging section. Leaves the old filter in place on error.
    pub fn apply_config(&self, config: &LoggingConfig) -> Result<(), LogError> {
        let (directive, filter) = build_filter(config)?;
        if let Some(handle) = &self.handle {
            handle
                .reload(filter)
                .map_err(|e| LogError::Reload(e.to_string()))?;
        }
        *self.directive.lock() = directive;
        self.raw_io.store(config.raw_io, Ordering::Release);
        Ok(())
    }

    pub fn is_logging_raw_io(&self) -> bool {
        self.raw_io.load(Ordering::Acquire)
    }

    pub fn directive(&self) -> String {
        self.directive.lock().clone()
    }

    pub fn log_input(&self, session: u64, line: &str) {
        if self.is_logging_raw_io() {
            tracing::trace!(target: "userinput", session, "<- {}", line);
        }
    }

    pub fn log_output(&self, session: u64, line: &str) {
        if self.is_logging_raw_io() {
            tracing::trace!(target: "useroutput", session, "-> {}", line);
        }
    }
}

fn build_filter(config: &LoggingConfig) -> Result<(String, EnvFilter), LogError> {
    let mut directive = config.level.trim().to_string();
    if config.raw_io {
        if !directive.is_empty() {
            directive.push(',');
        }
        directive.push_str(&format!("{RAW_INPUT_TARGET}=trace,{RAW_OUTPUT_TARGET}=trace"));
    }
    let filter = EnvFilter::try_new(&directive).map_err(|e| LogError::InvalidFilter {
        directive: directive.clone(),
        reason: e.to_string(),
    })?;
    Ok((directive, filter))
}
