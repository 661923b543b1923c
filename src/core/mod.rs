//! Core module - Configuration, errors, status codes and common types

mod config;
mod error;
mod status;
mod types;

pub use config::{Backend, Config, CounterConfig, GeneralConfig, SubsystemConfig};
pub use error::{Error, Result};
pub use status::Status;
pub use types::{CounterValue, Sample};
