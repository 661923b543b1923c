//! Common types used across the engine

use crate::core::Status;
use serde::{Deserialize, Serialize};

/// One sample for one instance of a counter at one collection instant
#[derive(Debug, Clone, PartialEq)]
pub struct CounterValue {
    /// Instance name as reported by the subsystem (may repeat or be truncated)
    pub instance_name: String,
    /// Formatted value
    pub value: f64,
    /// Per-item status when the subsystem flagged this instance's data
    pub read_error: Option<Status>,
}

impl CounterValue {
    pub fn new(instance_name: impl Into<String>, value: f64) -> Self {
        Self {
            instance_name: instance_name.into(),
            value,
            read_error: None,
        }
    }

    pub fn with_read_error(mut self, status: Status) -> Self {
        self.read_error = Some(status);
        self
    }
}

/// A resolved reading emitted by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Configured metric name
    pub name: String,
    /// Counter path the value was read from
    pub path: String,
    /// Instance selector used to pick the value
    pub instance: String,
    pub value: f64,
    /// Timestamp of the reading (Unix timestamp)
    pub timestamp: i64,
}

impl Sample {
    pub fn new(name: &str, path: &str, instance: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            instance: instance.to_string(),
            value,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serializes_flat() {
        let sample = Sample::new("cpu", "\\Processor(_Total)\\% Processor Time", "_Total", 12.5);
        let json = serde_json::to_value(&sample).unwrap();

        assert_eq!(json["name"], "cpu");
        assert_eq!(json["instance"], "_Total");
        assert_eq!(json["value"], 12.5);
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_counter_value_builder() {
        let value = CounterValue::new("w3wp", 3.0).with_read_error(Status::INVALID_DATA);
        assert_eq!(value.instance_name, "w3wp");
        assert_eq!(value.read_error, Some(Status::INVALID_DATA));
    }
}
