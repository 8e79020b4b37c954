//! Per-instance log.
//!
//! Every storage instance writes its lifecycle and rotation events to
//! `<name>/<name>.log`, optionally echoed to stderr. The instance owns its
//! own tracing dispatch; code that should land in the instance log runs
//! inside [`InstanceLog::in_scope`].

use cardvault_common::{Error, LogConfig, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Clone)]
pub struct InstanceLog {
    dispatch: Dispatch,
}

impl InstanceLog {
    /// Open (appending) the log file and build the instance dispatch
    pub fn open(path: &Path, config: &LogConfig) -> Result<Self> {
        let level: LevelFilter = config
            .level
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid log level '{}': {e}", config.level)))?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_names(true);
        let stderr_layer = config
            .echo_stderr
            .then(|| fmt::layer().with_writer(std::io::stderr));

        let subscriber = tracing_subscriber::registry()
            .with(level)
            .with(file_layer)
            .with(stderr_layer);

        Ok(Self {
            dispatch: Dispatch::new(subscriber),
        })
    }

    /// Run `f` with this instance's log as the default subscriber
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}
