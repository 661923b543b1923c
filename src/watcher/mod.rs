//! Counter watchers
//!
//! Two ways to read counters:
//! - [`Watcher::query`]: one-shot, opens a query for a single read and closes it
//! - [`ContinuousWatcher`]: keeps one query open and collects in the background

mod continuous;

pub use continuous::{CollectorHandle, ContinuousWatcher};

use crate::core::{Backend, Error, Result};
use crate::query::{is_benign_read_error, resolve_value, CounterQuery};
use crate::subsystem::{self, CounterSubsystem};
use std::sync::Arc;

/// One-shot counter reader
#[derive(Clone)]
pub struct Watcher {
    subsystem: Arc<dyn CounterSubsystem>,
}

impl Watcher {
    pub fn new(subsystem: Arc<dyn CounterSubsystem>) -> Self {
        Self { subsystem }
    }

    /// Create a watcher on the subsystem selected for `backend`
    pub fn detect(backend: Backend) -> Result<Self> {
        Ok(Self::new(subsystem::detect(backend)?))
    }

    /// Name of the underlying subsystem
    pub fn subsystem_name(&self) -> &str {
        self.subsystem.name()
    }

    /// A continuous watcher over the same subsystem
    pub fn continuous(&self) -> ContinuousWatcher {
        ContinuousWatcher::new(Arc::clone(&self.subsystem))
    }

    /// Read the value of `instance` for `path` with a fresh query
    ///
    /// Benign read failures (see [`is_benign_read_error`]) yield `Ok(0.0)`.
    ///
    /// Rate counters such as `% Processor Time` are computed from two
    /// collections. A one-shot query collects once, so they read as 0 on PDH
    /// and on the emulated backend. Use [`ContinuousWatcher`] for those.
    pub fn query(&self, path: &str, instance: &str) -> Result<f64> {
        let mut query = CounterQuery::new(Arc::clone(&self.subsystem));
        query.open()?;
        // `query` closes itself when dropped, on every return below

        let handle = query.register_counter(path)?;
        query.collect()?;

        let values = match query.read_array(&handle) {
            Ok(values) => values,
            Err(e) if is_benign_read_error(&e) => {
                log::debug!("No sample yet for '{}' ({}), reporting 0", path, e);
                return Ok(0.0);
            }
            Err(Error::Read { status, .. }) => {
                return Err(Error::InstanceRead {
                    path: path.to_string(),
                    instance: instance.to_string(),
                    status,
                })
            }
            Err(e) => return Err(e),
        };

        let value = resolve_value(&values, path, instance)?;
        match value.read_error {
            None => Ok(value.value),
            Some(status) if status.is_benign() => {
                log::debug!(
                    "Instance '{}' of '{}' has no sample yet ({}), reporting 0",
                    instance,
                    path,
                    status
                );
                Ok(0.0)
            }
            Some(status) => Err(Error::InstanceRead {
                path: path.to_string(),
                instance: instance.to_string(),
                status,
            }),
        }
    }
}
