//! Continuous collection against one long-lived query
//!
//! Every started path gets its own background task that collects on a fixed
//! interval. All tasks and readers share one [`CounterQuery`] behind a single
//! mutex, so registration, collection and reads never overlap on the session.

use crate::core::{CounterValue, Error, Result};
use crate::query::CounterQuery;
use crate::subsystem::CounterSubsystem;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

struct Collector {
    id: u64,
    token: CancellationToken,
}

struct State {
    query: CounterQuery,
    collectors: HashMap<String, Collector>,
    next_collector_id: u64,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the collector for `path`, if it is still the one with `id`
    fn stop(&self, path: &str, id: Option<u64>) -> Result<()> {
        let mut state = self.lock();

        match state.collectors.get(path) {
            Some(collector) if id.map_or(true, |id| id == collector.id) => {}
            Some(_) => return Ok(()),
            None if id.is_some() => return Ok(()),
            None => return Err(Error::UnregisteredPath(path.to_string())),
        }

        if let Some(handle) = state.query.handle(path).cloned() {
            state.query.remove_counter(&handle)?;
        }
        if let Some(collector) = state.collectors.remove(path) {
            collector.token.cancel();
        }

        log::info!("Stopped collecting '{}'", path);
        Ok(())
    }

    /// One collection pass on behalf of a collector, unless it was cancelled
    fn collect(&self, token: &CancellationToken) -> Result<()> {
        let mut state = self.lock();
        if token.is_cancelled() {
            return Ok(());
        }
        state.query.collect()
    }
}

/// Background counter collection with on-demand reads
///
/// Owns one query that stays open until [`ContinuousWatcher::shutdown`] or
/// drop. Must be used from within a Tokio runtime.
pub struct ContinuousWatcher {
    shared: Arc<Shared>,
}

impl ContinuousWatcher {
    pub fn new(subsystem: Arc<dyn CounterSubsystem>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    query: CounterQuery::new(subsystem),
                    collectors: HashMap::new(),
                    next_collector_id: 0,
                }),
            }),
        }
    }

    /// Register `path` and collect it every `interval` in the background
    ///
    /// The first collection runs immediately. Dropping the returned handle
    /// stops the collector. Fails with [`Error::NoRuntime`] outside a Tokio
    /// runtime, before anything is registered.
    pub fn start_query(&self, path: &str, interval: Duration) -> Result<CollectorHandle> {
        if interval.is_zero() {
            return Err(Error::Config(format!(
                "collection interval for '{}' must be positive",
                path
            )));
        }
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;

        let (id, token) = {
            let mut state = self.shared.lock();
            if state.collectors.contains_key(path) {
                return Err(Error::AlreadyWatching(path.to_string()));
            }

            if !state.query.is_open() {
                state.query.open()?;
            }
            state.query.register_counter(path)?;

            let id = state.next_collector_id;
            state.next_collector_id += 1;
            let token = CancellationToken::new();
            state.collectors.insert(
                path.to_string(),
                Collector {
                    id,
                    token: token.clone(),
                },
            );
            (id, token)
        };

        runtime.spawn(collection_loop(
            Arc::clone(&self.shared),
            path.to_string(),
            interval,
            token.clone(),
        ));
        log::info!("Collecting '{}' every {:?}", path, interval);

        Ok(CollectorHandle {
            path: path.to_string(),
            id,
            token,
            shared: Arc::downgrade(&self.shared),
            released: false,
        })
    }

    /// Latest collected array for a started path, unresolved
    pub fn get_formatted_query_data(&self, path: &str) -> Result<Vec<CounterValue>> {
        let mut state = self.shared.lock();
        if !state.collectors.contains_key(path) {
            return Err(Error::UnregisteredPath(path.to_string()));
        }

        let handle = state
            .query
            .handle(path)
            .cloned()
            .ok_or_else(|| Error::UnregisteredPath(path.to_string()))?;
        state.query.read_array(&handle)
    }

    /// Stop collecting `path` and unregister it
    pub fn stop_query(&self, path: &str) -> Result<()> {
        self.shared.stop(path, None)
    }

    /// Paths with a running collector, sorted
    pub fn watched_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.shared.lock().collectors.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Stop every collector and close the query
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.shared.lock();
        for (path, collector) in state.collectors.drain() {
            collector.token.cancel();
            log::debug!("Cancelled collector for '{}'", path);
        }
        state.query.close()
    }
}

impl Drop for ContinuousWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to shut down continuous watcher: {}", e);
        }
    }
}

/// Keeps one path's background collector alive
///
/// Stopping or dropping the handle cancels the collector and unregisters the
/// path.
#[must_use = "dropping the handle stops the collector"]
pub struct CollectorHandle {
    path: String,
    id: u64,
    token: CancellationToken,
    shared: Weak<Shared>,
    released: bool,
}

impl CollectorHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn stop(mut self) -> Result<()> {
        self.release()
    }

    /// A failed stop leaves the collector running; [`ContinuousWatcher::stop_query`]
    /// can retry it.
    fn release(&mut self) -> Result<()> {
        if self.released || self.token.is_cancelled() {
            return Ok(());
        }
        self.released = true;

        match self.shared.upgrade() {
            Some(shared) => shared.stop(&self.path, Some(self.id)),
            None => {
                self.token.cancel();
                Ok(())
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Failed to stop collector for '{}': {}", self.path, e);
        }
    }
}

async fn collection_loop(
    shared: Arc<Shared>,
    path: String,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let collector = Arc::clone(&shared);
        let collect_token = token.clone();
        match tokio::task::spawn_blocking(move || collector.collect(&collect_token)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::warn!("Collection for '{}' failed, retrying in {:?}: {}", path, interval, e)
            }
            Err(e) => log::error!("Collection task for '{}' did not complete: {}", path, e),
        }
    }

    log::debug!("Collector for '{}' exited", path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::subsystem::mock::MockSubsystem;

    const CPU: &str = "\\Processor(_Total)\\% Processor Time";
    const MEMORY: &str = "\\Memory\\Available Bytes";
    const INTERVAL: Duration = Duration::from_millis(10);

    fn mock() -> MockSubsystem {
        MockSubsystem::new()
            .with_values(CPU, vec![CounterValue::new("0", 10.0), CounterValue::new("_Total", 12.5)])
            .with_values(MEMORY, vec![CounterValue::new("", 2048.0)])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[tokio::test]
    async fn test_start_then_read() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let _cpu = watcher.start_query(CPU, INTERVAL).unwrap();

        settle().await;
        let values = watcher.get_formatted_query_data(CPU).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].instance_name, "_Total");
        assert!(mock.calls().collects >= 2);
    }

    #[tokio::test]
    async fn test_unregistered_path() {
        let watcher = ContinuousWatcher::new(Arc::new(mock()));
        assert!(matches!(
            watcher.get_formatted_query_data(CPU),
            Err(Error::UnregisteredPath(_))
        ));
        assert!(matches!(watcher.stop_query(CPU), Err(Error::UnregisteredPath(_))));
    }

    #[tokio::test]
    async fn test_paths_share_one_query() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let _cpu = watcher.start_query(CPU, INTERVAL).unwrap();
        let _memory = watcher.start_query(MEMORY, Duration::from_millis(15)).unwrap();

        settle().await;
        assert_eq!(mock.calls().opens, 1);
        assert_eq!(watcher.watched_paths(), vec![MEMORY.to_string(), CPU.to_string()]);
        assert_eq!(watcher.get_formatted_query_data(MEMORY).unwrap()[0].value, 2048.0);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let watcher = ContinuousWatcher::new(Arc::new(mock()));
        let _cpu = watcher.start_query(CPU, INTERVAL).unwrap();
        assert!(matches!(
            watcher.start_query(CPU, INTERVAL),
            Err(Error::AlreadyWatching(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_failure_starts_nothing() {
        let mock = mock().with_registration_failure("\\Bad\\Path", Status::CSTATUS_NO_OBJECT);
        let watcher = ContinuousWatcher::new(Arc::new(mock));
        assert!(matches!(
            watcher.start_query("\\Bad\\Path", INTERVAL),
            Err(Error::Registration { .. })
        ));
        assert!(watcher.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_collection_errors_are_retried() {
        let mock = mock().with_collect_failure(Status::NO_DATA);
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let _cpu = watcher.start_query(CPU, INTERVAL).unwrap();

        settle().await;
        assert!(mock.calls().collects >= 2);
        assert!(matches!(
            watcher.get_formatted_query_data(CPU),
            Err(Error::NotCollected { .. })
        ));

        mock.set_collect_failure(None);
        settle().await;
        assert!(watcher.get_formatted_query_data(CPU).is_ok());
    }

    #[tokio::test]
    async fn test_readers_see_latest_collection() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let _memory = watcher.start_query(MEMORY, INTERVAL).unwrap();

        settle().await;
        mock.set_values(MEMORY, vec![CounterValue::new("", 4096.0)]);
        settle().await;
        assert_eq!(watcher.get_formatted_query_data(MEMORY).unwrap()[0].value, 4096.0);
    }

    #[tokio::test]
    async fn test_stop_query_stops_collecting() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let cpu = watcher.start_query(CPU, INTERVAL).unwrap();

        settle().await;
        watcher.stop_query(CPU).unwrap();
        assert!(cpu.is_stopped());
        assert_eq!(mock.calls().removes, 1);

        let collects = mock.calls().collects;
        settle().await;
        assert_eq!(mock.calls().collects, collects);
        assert!(matches!(
            watcher.get_formatted_query_data(CPU),
            Err(Error::UnregisteredPath(_))
        ));

        // The stale handle must not touch a restarted collector
        let restarted = watcher.start_query(CPU, INTERVAL).unwrap();
        drop(cpu);
        assert_eq!(watcher.watched_paths(), vec![CPU.to_string()]);
        restarted.stop().unwrap();
        assert!(watcher.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_collector() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let cpu = watcher.start_query(CPU, INTERVAL).unwrap();
        let _memory = watcher.start_query(MEMORY, INTERVAL).unwrap();

        drop(cpu);
        assert_eq!(watcher.watched_paths(), vec![MEMORY.to_string()]);
        assert_eq!(mock.calls().removes, 1);

        settle().await;
        assert!(watcher.get_formatted_query_data(MEMORY).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_query() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let cpu = watcher.start_query(CPU, INTERVAL).unwrap();

        settle().await;
        watcher.shutdown().unwrap();
        assert!(cpu.is_stopped());
        assert!(watcher.watched_paths().is_empty());
        assert_eq!(mock.calls().closes, 1);

        let collects = mock.calls().collects;
        settle().await;
        assert_eq!(mock.calls().collects, collects);

        // Dropping after shutdown is a no-op
        drop(cpu);
        drop(watcher);
        assert_eq!(mock.calls().closes, 1);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_collector() {
        let mock = mock().with_remove_failure(Status::INVALID_HANDLE);
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));
        let cpu = watcher.start_query(CPU, INTERVAL).unwrap();

        settle().await;
        assert!(matches!(cpu.stop(), Err(Error::Registration { .. })));
        assert_eq!(watcher.watched_paths(), vec![CPU.to_string()]);
        assert!(watcher.get_formatted_query_data(CPU).is_ok());

        let collects = mock.calls().collects;
        settle().await;
        assert!(mock.calls().collects > collects);

        mock.set_remove_failure(None);
        watcher.stop_query(CPU).unwrap();
        assert!(watcher.watched_paths().is_empty());
    }

    #[test]
    fn test_start_outside_runtime_registers_nothing() {
        let mock = mock();
        let watcher = ContinuousWatcher::new(Arc::new(mock.clone()));

        assert!(matches!(
            watcher.start_query(CPU, INTERVAL),
            Err(Error::NoRuntime(_))
        ));
        assert!(watcher.watched_paths().is_empty());
        assert_eq!(mock.calls().opens, 0);
        assert_eq!(mock.calls().english_adds, 0);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let watcher = ContinuousWatcher::new(Arc::new(mock()));
        assert!(matches!(
            watcher.start_query(CPU, Duration::ZERO),
            Err(Error::Config(_))
        ));
    }
}
