//! Counter subsystem bindings
//!
//! Abstracts over the OS performance-counter facility the engine queries:
//! - Windows: PDH (Performance Data Helper)
//! - Everywhere: a sysinfo-backed emulation of common PDH counters
//! - Tests: a scriptable mock

mod emulated;
pub mod mock;
#[cfg(target_os = "windows")]
mod pdh;

pub use emulated::EmulatedSubsystem;
#[cfg(target_os = "windows")]
pub use pdh::PdhSubsystem;

use crate::core::{Backend, CounterValue, Result, Status};
#[cfg(not(target_os = "windows"))]
use crate::core::Error;
use std::sync::Arc;

/// Session-local identifier of a registered counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(pub usize);

/// Result of a raw subsystem call
pub type SubsystemResult<T> = std::result::Result<T, Status>;

/// A counter facility that can open query sessions
pub trait CounterSubsystem: Send + Sync {
    /// Acquire a new query session
    fn open(&self) -> SubsystemResult<Box<dyn CounterSession>>;

    /// Whether the host provides locale-invariant (English) counter registration
    fn supports_english_counters(&self) -> bool;

    /// Name of this subsystem
    fn name(&self) -> &str;
}

/// One open query session against a counter subsystem
///
/// Sessions are not safe to drive concurrently: callers serialize every call.
pub trait CounterSession: Send {
    /// Register a counter using the host's localized counter names
    fn add_counter(&mut self, path: &str) -> SubsystemResult<CounterId>;

    /// Register a counter using English counter names
    fn add_english_counter(&mut self, path: &str) -> SubsystemResult<CounterId>;

    fn remove_counter(&mut self, id: CounterId) -> SubsystemResult<()>;

    /// Collect one sample for every registered counter
    fn collect(&mut self) -> SubsystemResult<()>;

    /// Formatted per-instance values as of the last collection
    fn read_formatted_array(&mut self, id: CounterId) -> SubsystemResult<Vec<CounterValue>>;

    /// Release the session. Counters registered on it become invalid.
    fn close(&mut self) -> SubsystemResult<()>;
}

#[cfg(target_os = "windows")]
fn native() -> Result<Arc<dyn CounterSubsystem>> {
    log::info!("Using PDH for performance counters");
    Ok(Arc::new(PdhSubsystem::new()))
}

#[cfg(not(target_os = "windows"))]
fn native() -> Result<Arc<dyn CounterSubsystem>> {
    Err(Error::HardwareNotSupported(
        "PDH is only available on Windows".to_string(),
    ))
}

/// Pick a counter subsystem for the requested backend
pub fn detect(backend: Backend) -> Result<Arc<dyn CounterSubsystem>> {
    match backend {
        Backend::Pdh => native(),
        Backend::Auto => native().or_else(|e| {
            log::info!("{}, using emulated counters", e);
            Ok(Arc::new(EmulatedSubsystem::new()) as Arc<dyn CounterSubsystem>)
        }),
        Backend::Emulated => {
            log::info!("Using emulated counters");
            Ok(Arc::new(EmulatedSubsystem::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_emulated() {
        let subsystem = detect(Backend::Emulated).unwrap();
        assert_eq!(subsystem.name(), "emulated");
        assert!(subsystem.supports_english_counters());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_detect_pdh_off_windows() {
        assert!(matches!(
            detect(Backend::Pdh),
            Err(Error::HardwareNotSupported(_))
        ));
        assert_eq!(detect(Backend::Auto).unwrap().name(), "emulated");
    }
}
