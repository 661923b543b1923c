//! Scriptable in-memory counter subsystem
//!
//! Serves canned per-path arrays and records every call, so engine behaviour
//! can be checked without a real counter facility. Clones share state: keep
//! one clone to inspect calls after handing the other to a watcher.

use super::{CounterId, CounterSession, CounterSubsystem, SubsystemResult};
use crate::core::{CounterValue, Status};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Call counts observed by a mock subsystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub opens: usize,
    pub closes: usize,
    pub localized_adds: usize,
    pub english_adds: usize,
    pub removes: usize,
    pub collects: usize,
    pub reads: usize,
}

#[derive(Default)]
struct MockState {
    arrays: HashMap<String, SubsystemResult<Vec<CounterValue>>>,
    rejected: HashMap<String, Status>,
    open_failure: Option<Status>,
    collect_failure: Option<Status>,
    remove_failure: Option<Status>,
    calls: MockCalls,
}

/// Mock counter subsystem
#[derive(Clone)]
pub struct MockSubsystem {
    english: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockSubsystem {
    /// A mock host that supports English counter registration
    pub fn new() -> Self {
        Self {
            english: true,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// A mock host that only offers localized registration
    pub fn localized() -> Self {
        Self {
            english: false,
            ..Self::new()
        }
    }

    pub fn with_values(self, path: &str, values: Vec<CounterValue>) -> Self {
        self.set_values(path, values);
        self
    }

    pub fn with_read_failure(self, path: &str, status: Status) -> Self {
        self.lock().arrays.insert(path.to_string(), Err(status));
        self
    }

    pub fn with_registration_failure(self, path: &str, status: Status) -> Self {
        self.lock().rejected.insert(path.to_string(), status);
        self
    }

    pub fn with_open_failure(self, status: Status) -> Self {
        self.lock().open_failure = Some(status);
        self
    }

    pub fn with_collect_failure(self, status: Status) -> Self {
        self.set_collect_failure(Some(status));
        self
    }

    pub fn with_remove_failure(self, status: Status) -> Self {
        self.set_remove_failure(Some(status));
        self
    }

    /// Replace the array served for `path` from the next collection on
    pub fn set_values(&self, path: &str, values: Vec<CounterValue>) {
        self.lock().arrays.insert(path.to_string(), Ok(values));
    }

    pub fn set_collect_failure(&self, status: Option<Status>) {
        self.lock().collect_failure = status;
    }

    pub fn set_remove_failure(&self, status: Option<Status>) {
        self.lock().remove_failure = status;
    }

    pub fn calls(&self) -> MockCalls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSubsystem for MockSubsystem {
    fn open(&self) -> SubsystemResult<Box<dyn CounterSession>> {
        let mut state = self.lock();
        state.calls.opens += 1;
        if let Some(status) = state.open_failure {
            return Err(status);
        }

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            counters: HashMap::new(),
            snapshot: HashMap::new(),
            next_id: 0,
            closed: false,
        }))
    }

    fn supports_english_counters(&self) -> bool {
        self.english
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    counters: HashMap<CounterId, String>,
    snapshot: HashMap<CounterId, SubsystemResult<Vec<CounterValue>>>,
    next_id: usize,
    closed: bool,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&mut self, path: &str, english: bool) -> SubsystemResult<CounterId> {
        {
            let mut state = self.lock();
            if english {
                state.calls.english_adds += 1;
            } else {
                state.calls.localized_adds += 1;
            }

            if self.closed {
                return Err(Status::INVALID_HANDLE);
            }
            if let Some(status) = state.rejected.get(path) {
                return Err(*status);
            }
            if !state.arrays.contains_key(path) {
                return Err(Status::CSTATUS_NO_COUNTER);
            }
        }

        let id = CounterId(self.next_id);
        self.next_id += 1;
        self.counters.insert(id, path.to_string());
        Ok(id)
    }
}

impl CounterSession for MockSession {
    fn add_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.add(path, false)
    }

    fn add_english_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.add(path, true)
    }

    fn remove_counter(&mut self, id: CounterId) -> SubsystemResult<()> {
        {
            let mut state = self.lock();
            state.calls.removes += 1;
            if let Some(status) = state.remove_failure {
                return Err(status);
            }
        }
        self.snapshot.remove(&id);
        self.counters
            .remove(&id)
            .map(|_| ())
            .ok_or(Status::INVALID_HANDLE)
    }

    fn collect(&mut self) -> SubsystemResult<()> {
        let snapshot: HashMap<_, _> = {
            let mut state = self.lock();
            state.calls.collects += 1;

            if self.closed {
                return Err(Status::INVALID_HANDLE);
            }
            if let Some(status) = state.collect_failure {
                return Err(status);
            }

            self.counters
                .iter()
                .filter_map(|(id, path)| state.arrays.get(path).map(|array| (*id, array.clone())))
                .collect()
        };

        self.snapshot = snapshot;
        Ok(())
    }

    fn read_formatted_array(&mut self, id: CounterId) -> SubsystemResult<Vec<CounterValue>> {
        self.lock().calls.reads += 1;

        if !self.counters.contains_key(&id) {
            return Err(Status::INVALID_HANDLE);
        }
        self.snapshot
            .get(&id)
            .cloned()
            .unwrap_or(Err(Status::NO_DATA))
    }

    fn close(&mut self) -> SubsystemResult<()> {
        self.lock().calls.closes += 1;
        self.closed = true;
        self.counters.clear();
        self.snapshot.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_serves_snapshot_after_collect() {
        let mock = MockSubsystem::new().with_values("\\A\\B", vec![CounterValue::new("x", 1.0)]);
        let mut session = mock.open().unwrap();

        let id = session.add_english_counter("\\A\\B").unwrap();
        assert_eq!(session.read_formatted_array(id), Err(Status::NO_DATA));

        session.collect().unwrap();
        mock.set_values("\\A\\B", vec![CounterValue::new("x", 2.0)]);
        assert_eq!(session.read_formatted_array(id).unwrap()[0].value, 1.0);

        session.collect().unwrap();
        assert_eq!(session.read_formatted_array(id).unwrap()[0].value, 2.0);
    }

    #[test]
    fn test_unknown_path_is_rejected() {
        let mock = MockSubsystem::new();
        let mut session = mock.open().unwrap();
        assert_eq!(
            session.add_counter("\\Nope\\Nothing"),
            Err(Status::CSTATUS_NO_COUNTER)
        );
        assert_eq!(mock.calls().localized_adds, 1);
    }
}
