//! Counter query lifecycle
//!
//! A [`CounterQuery`] owns one session on a [`CounterSubsystem`]. Counters are
//! registered while it is open, every registered counter is refreshed by
//! [`CounterQuery::collect`], and arrays are read back per handle. Closing the
//! query invalidates every handle it produced.

mod classify;
mod resolver;

pub use classify::is_benign_read_error;
pub use resolver::{resolve, resolve_value};

use crate::core::{CounterValue, Error, Result};
use crate::subsystem::{CounterId, CounterSession, CounterSubsystem};
use std::collections::HashMap;
use std::sync::Arc;

/// How counter paths are handed to the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Paths use the host's display language
    Localized,
    /// Paths use English names regardless of host language
    English,
}

impl Registration {
    fn for_subsystem(subsystem: &dyn CounterSubsystem) -> Self {
        if subsystem.supports_english_counters() {
            Registration::English
        } else {
            Registration::Localized
        }
    }
}

/// Token for a counter registered on a [`CounterQuery`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterHandle {
    id: CounterId,
    epoch: u64,
    path: String,
}

impl CounterHandle {
    pub fn path(&self) -> &str {
        &self.path
    }
}

struct Registered {
    handle: CounterHandle,
    collected: bool,
}

struct OpenSession {
    session: Box<dyn CounterSession>,
    registration: Registration,
}

/// One query session and the counters registered on it
pub struct CounterQuery {
    subsystem: Arc<dyn CounterSubsystem>,
    open: Option<OpenSession>,
    counters: HashMap<String, Registered>,
    /// Bumped on every open so handles from an earlier session are rejected
    epoch: u64,
}

impl CounterQuery {
    /// Create a closed query
    pub fn new(subsystem: Arc<dyn CounterSubsystem>) -> Self {
        Self {
            subsystem,
            open: None,
            counters: HashMap::new(),
            epoch: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Registration strategy of the current session
    pub fn registration(&self) -> Option<Registration> {
        self.open.as_ref().map(|open| open.registration)
    }

    pub fn open(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Err(Error::AlreadyOpen);
        }

        let session = self.subsystem.open().map_err(Error::SessionOpen)?;
        let registration = Registration::for_subsystem(self.subsystem.as_ref());
        self.epoch += 1;
        self.open = Some(OpenSession {
            session,
            registration,
        });

        log::debug!(
            "Opened {} query (epoch {}, {:?} registration)",
            self.subsystem.name(),
            self.epoch,
            registration
        );
        Ok(())
    }

    /// Register `path`, or return its existing handle
    pub fn register_counter(&mut self, path: &str) -> Result<CounterHandle> {
        let open = self.open.as_mut().ok_or(Error::NotOpen)?;

        if let Some(registered) = self.counters.get(path) {
            return Ok(registered.handle.clone());
        }

        let added = match open.registration {
            Registration::English => open.session.add_english_counter(path),
            Registration::Localized => open.session.add_counter(path),
        };
        let id = added.map_err(|status| Error::Registration {
            path: path.to_string(),
            status,
        })?;

        let handle = CounterHandle {
            id,
            epoch: self.epoch,
            path: path.to_string(),
        };
        self.counters.insert(
            path.to_string(),
            Registered {
                handle: handle.clone(),
                collected: false,
            },
        );

        log::debug!("Registered counter '{}'", path);
        Ok(handle)
    }

    pub fn handle(&self, path: &str) -> Option<&CounterHandle> {
        self.counters.get(path).map(|registered| &registered.handle)
    }

    pub fn remove_counter(&mut self, handle: &CounterHandle) -> Result<()> {
        self.verify(handle)?;
        let open = self.open.as_mut().ok_or(Error::NotOpen)?;

        open.session
            .remove_counter(handle.id)
            .map_err(|status| Error::Registration {
                path: handle.path.clone(),
                status,
            })?;
        self.counters.remove(&handle.path);

        log::debug!("Removed counter '{}'", handle.path);
        Ok(())
    }

    /// Collect one sample for every registered counter
    pub fn collect(&mut self) -> Result<()> {
        let open = self.open.as_mut().ok_or(Error::NotOpen)?;
        open.session.collect().map_err(Error::Collection)?;

        for registered in self.counters.values_mut() {
            registered.collected = true;
        }
        Ok(())
    }

    /// Per-instance values for `handle` as of the last collection
    pub fn read_array(&mut self, handle: &CounterHandle) -> Result<Vec<CounterValue>> {
        let registered = self.verify(handle)?;
        if !registered.collected {
            return Err(Error::NotCollected {
                path: handle.path.clone(),
            });
        }

        let open = self.open.as_mut().ok_or(Error::NotOpen)?;
        open.session
            .read_formatted_array(handle.id)
            .map_err(|status| Error::Read {
                path: handle.path.clone(),
                status,
            })
    }

    /// Release the session. Calling this on a closed query does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut open) = self.open.take() else {
            return Ok(());
        };
        self.counters.clear();

        log::debug!("Closing {} query (epoch {})", self.subsystem.name(), self.epoch);
        open.session.close().map_err(Error::SessionClose)
    }

    fn verify(&self, handle: &CounterHandle) -> Result<&Registered> {
        if self.open.is_none() {
            return Err(Error::NotOpen);
        }
        self.counters
            .get(&handle.path)
            .filter(|registered| registered.handle == *handle)
            .ok_or_else(|| Error::StaleHandle {
                path: handle.path.clone(),
            })
    }
}

impl Drop for CounterQuery {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close query on drop: {}", e);
        }
    }
}
