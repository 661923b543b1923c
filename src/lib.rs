//! PerfCounter Watcher library
//!
//! A query engine over OS performance counters: one-shot reads through
//! [`watcher::Watcher`] and background collection through
//! [`watcher::ContinuousWatcher`].

pub mod core;
pub mod query;
pub mod subsystem;
pub mod watcher;
