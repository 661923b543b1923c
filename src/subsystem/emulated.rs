//! Emulated counter subsystem
//!
//! Serves a subset of the standard PDH counters from sysinfo so the engine
//! and agent run on hosts without PDH. Paths use the PDH shape
//! `\Object(Instance)\Counter`; object and counter names are matched
//! case-insensitively.

use super::{CounterId, CounterSession, CounterSubsystem, SubsystemResult};
use crate::core::{CounterValue, Status};
use std::collections::HashMap;
use sysinfo::{ProcessRefreshKind, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const TOTAL_INSTANCE: &str = "_Total";

/// Counters the emulation knows how to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Metric {
    ProcessorTime,
    ProcessId,
    ProcessProcessorTime,
    ProcessWorkingSet,
    AvailableBytes,
    AvailableMBytes,
    CommittedBytes,
    SystemProcesses,
}

impl Metric {
    fn lookup(object: &str, counter: &str) -> SubsystemResult<Self> {
        let object = object.to_ascii_lowercase();
        let counter = counter.to_ascii_lowercase();

        let metric = match (object.as_str(), counter.as_str()) {
            ("processor", "% processor time") => Metric::ProcessorTime,
            ("process", "id process") => Metric::ProcessId,
            ("process", "% processor time") => Metric::ProcessProcessorTime,
            ("process", "working set") => Metric::ProcessWorkingSet,
            ("memory", "available bytes") => Metric::AvailableBytes,
            ("memory", "available mbytes") => Metric::AvailableMBytes,
            ("memory", "committed bytes") => Metric::CommittedBytes,
            ("system", "processes") => Metric::SystemProcesses,
            ("processor" | "process" | "memory" | "system", _) => {
                return Err(Status::CSTATUS_NO_COUNTER)
            }
            _ => return Err(Status::CSTATUS_NO_OBJECT),
        };
        Ok(metric)
    }

    fn is_multi_instance(self) -> bool {
        matches!(
            self,
            Metric::ProcessorTime
                | Metric::ProcessId
                | Metric::ProcessProcessorTime
                | Metric::ProcessWorkingSet
        )
    }
}

/// A counter path split into its parts
#[derive(Debug, PartialEq)]
struct ParsedPath<'a> {
    object: &'a str,
    instance: Option<&'a str>,
    counter: &'a str,
}

fn parse_path(path: &str) -> SubsystemResult<ParsedPath<'_>> {
    let rest = path
        .strip_prefix('\\')
        .ok_or(Status::CSTATUS_BAD_COUNTERNAME)?;
    let (object_part, counter) = rest
        .rsplit_once('\\')
        .ok_or(Status::CSTATUS_BAD_COUNTERNAME)?;

    if counter.is_empty() || object_part.is_empty() || object_part.starts_with('\\') {
        return Err(Status::CSTATUS_BAD_COUNTERNAME);
    }

    let (object, instance) = match object_part.find('(') {
        Some(open) => {
            let instance = object_part[open + 1..]
                .strip_suffix(')')
                .ok_or(Status::CSTATUS_BAD_COUNTERNAME)?;
            (&object_part[..open], Some(instance))
        }
        None => (object_part, None),
    };

    if object.is_empty() {
        return Err(Status::CSTATUS_BAD_COUNTERNAME);
    }

    Ok(ParsedPath {
        object,
        instance,
        counter,
    })
}

/// Give duplicate process names PDH-style `#N` suffixes, in input order
fn assign_instance_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    names
        .into_iter()
        .map(|name| {
            let count = seen.entry(name).or_insert(0);
            let instance = if *count == 0 {
                name.to_string()
            } else {
                format!("{}#{}", name, count)
            };
            *count += 1;
            instance
        })
        .collect()
}

/// Whether `instance` is selected by the path's instance part
fn instance_selected(filter: Option<&str>, instance: &str) -> bool {
    match filter {
        None | Some("*") => true,
        Some(filter) => match filter.strip_suffix('*') {
            Some(prefix) => instance
                .to_ascii_lowercase()
                .starts_with(&prefix.to_ascii_lowercase()),
            None => instance.eq_ignore_ascii_case(filter),
        },
    }
}

/// sysinfo-backed counter subsystem
pub struct EmulatedSubsystem;

impl EmulatedSubsystem {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmulatedSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSubsystem for EmulatedSubsystem {
    fn open(&self) -> SubsystemResult<Box<dyn CounterSession>> {
        let mut sys = System::new();
        // CPU usage is a delta between refreshes; prime the first sample.
        // A collect right after open still sees a near-zero delta.
        sys.refresh_cpu_usage();

        Ok(Box::new(EmulatedSession {
            sys,
            counters: HashMap::new(),
            snapshot: HashMap::new(),
            next_id: 0,
            closed: false,
        }))
    }

    fn supports_english_counters(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "emulated"
    }
}

struct Registered {
    metric: Metric,
    instance: Option<String>,
}

struct EmulatedSession {
    sys: System,
    counters: HashMap<CounterId, Registered>,
    snapshot: HashMap<CounterId, Vec<CounterValue>>,
    next_id: usize,
    closed: bool,
}

impl EmulatedSession {
    fn register(&mut self, path: &str) -> SubsystemResult<CounterId> {
        if self.closed {
            return Err(Status::INVALID_HANDLE);
        }

        let parsed = parse_path(path)?;
        let metric = Metric::lookup(parsed.object, parsed.counter)?;
        if parsed.instance.is_some() && !metric.is_multi_instance() {
            return Err(Status::CSTATUS_NO_INSTANCE);
        }

        let id = CounterId(self.next_id);
        self.next_id += 1;
        self.counters.insert(
            id,
            Registered {
                metric,
                instance: parsed.instance.map(str::to_string),
            },
        );
        log::debug!("Emulated counter {:?} registered for '{}'", metric, path);
        Ok(id)
    }

    fn processor_values(&self) -> Vec<CounterValue> {
        let cpus = self.sys.cpus();
        let mut values: Vec<CounterValue> = cpus
            .iter()
            .enumerate()
            .map(|(index, cpu)| CounterValue::new(index.to_string(), cpu.cpu_usage() as f64))
            .collect();

        let total = cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>()
            / cpus.len().max(1) as f64;
        values.push(CounterValue::new(TOTAL_INSTANCE, total));
        values
    }

    fn process_values(&self, metric: Metric) -> Vec<CounterValue> {
        let mut processes: Vec<_> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let name = process.name();
                let name = name.strip_suffix(".exe").unwrap_or(name);
                (pid.as_u32(), name, process.cpu_usage() as f64, process.memory() as f64)
            })
            .collect();
        processes.sort_by_key(|(pid, ..)| *pid);

        let names = assign_instance_names(processes.iter().map(|(_, name, ..)| *name));
        let pick = |(pid, _, cpu, memory): &(u32, &str, f64, f64)| match metric {
            Metric::ProcessId => *pid as f64,
            Metric::ProcessProcessorTime => *cpu,
            _ => *memory,
        };

        let total: f64 = match metric {
            // PDH reports 0 for the _Total instance of ID Process
            Metric::ProcessId => 0.0,
            _ => processes.iter().map(pick).sum(),
        };

        let mut values: Vec<CounterValue> = names
            .into_iter()
            .zip(processes.iter())
            .map(|(name, process)| CounterValue::new(name, pick(process)))
            .collect();
        values.push(CounterValue::new(TOTAL_INSTANCE, total));
        values
    }

    fn values_for(&self, registered: &Registered) -> Vec<CounterValue> {
        let values = match registered.metric {
            Metric::ProcessorTime => self.processor_values(),
            Metric::ProcessId | Metric::ProcessProcessorTime | Metric::ProcessWorkingSet => {
                self.process_values(registered.metric)
            }
            Metric::AvailableBytes => {
                vec![CounterValue::new("", self.sys.available_memory() as f64)]
            }
            Metric::AvailableMBytes => vec![CounterValue::new(
                "",
                (self.sys.available_memory() as f64 / BYTES_PER_MB).floor(),
            )],
            Metric::CommittedBytes => vec![CounterValue::new(
                "",
                (self.sys.used_memory() + self.sys.used_swap()) as f64,
            )],
            Metric::SystemProcesses => {
                vec![CounterValue::new("", self.sys.processes().len() as f64)]
            }
        };

        let filter = registered.instance.as_deref();
        values
            .into_iter()
            .filter(|value| instance_selected(filter, &value.instance_name))
            .collect()
    }
}

impl CounterSession for EmulatedSession {
    fn add_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.register(path)
    }

    fn add_english_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.register(path)
    }

    fn remove_counter(&mut self, id: CounterId) -> SubsystemResult<()> {
        self.snapshot.remove(&id);
        self.counters
            .remove(&id)
            .map(|_| ())
            .ok_or(Status::INVALID_HANDLE)
    }

    fn collect(&mut self) -> SubsystemResult<()> {
        if self.closed {
            return Err(Status::INVALID_HANDLE);
        }

        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.sys
            .refresh_processes_specifics(ProcessRefreshKind::new().with_cpu().with_memory());

        let snapshot: HashMap<_, _> = self
            .counters
            .iter()
            .map(|(id, registered)| (*id, self.values_for(registered)))
            .collect();
        self.snapshot = snapshot;
        Ok(())
    }

    fn read_formatted_array(&mut self, id: CounterId) -> SubsystemResult<Vec<CounterValue>> {
        if !self.counters.contains_key(&id) {
            return Err(Status::INVALID_HANDLE);
        }
        self.snapshot.get(&id).cloned().ok_or(Status::NO_DATA)
    }

    fn close(&mut self) -> SubsystemResult<()> {
        self.closed = true;
        self.counters.clear();
        self.snapshot.clear();
        Ok(())
    }
}
