//! Windows PDH (Performance Data Helper) bindings

use super::{CounterId, CounterSession, CounterSubsystem, SubsystemResult};
use crate::core::{CounterValue, Status};
use std::collections::HashMap;

use windows_sys::Win32::System::Performance::{
    PdhAddCounterW, PdhAddEnglishCounterW, PdhCloseQuery, PdhCollectQueryData,
    PdhGetFormattedCounterArrayW, PdhOpenQueryW, PdhRemoveCounter, PDH_FMT_COUNTERVALUE_ITEM_W,
    PDH_FMT_DOUBLE, PDH_HCOUNTER, PDH_HQUERY,
};
use windows_sys::Win32::System::SystemInformation::{GetVersionExW, OSVERSIONINFOW};

const ERROR_SUCCESS: u32 = 0;

fn check(status: u32) -> SubsystemResult<()> {
    if status == ERROR_SUCCESS {
        Ok(())
    } else {
        Err(Status(status))
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Copy a NUL-terminated UTF-16 string
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated UTF-16 buffer.
unsafe fn from_wide(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

/// `PdhAddEnglishCounterW` first shipped with Windows Vista (NT 6.0)
fn host_supports_english_counters() -> bool {
    unsafe {
        let mut info: OSVERSIONINFOW = std::mem::zeroed();
        info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;
        if GetVersionExW(&mut info) == 0 {
            log::warn!("GetVersionExW failed, assuming localized counter registration");
            return false;
        }
        info.dwMajorVersion >= 6
    }
}

/// PDH-backed counter subsystem
pub struct PdhSubsystem {
    english: bool,
}

impl PdhSubsystem {
    pub fn new() -> Self {
        let english = host_supports_english_counters();
        log::debug!("PDH English counter registration available: {}", english);
        Self { english }
    }
}

impl CounterSubsystem for PdhSubsystem {
    fn open(&self) -> SubsystemResult<Box<dyn CounterSession>> {
        let mut query: PDH_HQUERY = unsafe { std::mem::zeroed() };
        check(unsafe { PdhOpenQueryW(std::ptr::null(), 0, &mut query) })?;

        Ok(Box::new(PdhSession {
            query,
            counters: HashMap::new(),
            next_id: 0,
            closed: false,
        }))
    }

    fn supports_english_counters(&self) -> bool {
        self.english
    }

    fn name(&self) -> &str {
        "pdh"
    }
}

struct PdhSession {
    query: PDH_HQUERY,
    counters: HashMap<CounterId, PDH_HCOUNTER>,
    next_id: usize,
    closed: bool,
}

// PDH handles may be used from any thread; the engine serializes all calls.
unsafe impl Send for PdhSession {}

impl PdhSession {
    fn add(&mut self, path: &str, english: bool) -> SubsystemResult<CounterId> {
        if self.closed {
            return Err(Status::INVALID_HANDLE);
        }

        let wide = to_wide(path);
        let mut counter: PDH_HCOUNTER = unsafe { std::mem::zeroed() };
        let status = unsafe {
            if english {
                PdhAddEnglishCounterW(self.query, wide.as_ptr(), 0, &mut counter)
            } else {
                PdhAddCounterW(self.query, wide.as_ptr(), 0, &mut counter)
            }
        };
        check(status)?;

        let id = CounterId(self.next_id);
        self.next_id += 1;
        self.counters.insert(id, counter);
        Ok(id)
    }

    fn counter(&self, id: CounterId) -> SubsystemResult<PDH_HCOUNTER> {
        self.counters.get(&id).copied().ok_or(Status::INVALID_HANDLE)
    }
}

impl CounterSession for PdhSession {
    fn add_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.add(path, false)
    }

    fn add_english_counter(&mut self, path: &str) -> SubsystemResult<CounterId> {
        self.add(path, true)
    }

    fn remove_counter(&mut self, id: CounterId) -> SubsystemResult<()> {
        let counter = self.counter(id)?;
        check(unsafe { PdhRemoveCounter(counter) })?;
        self.counters.remove(&id);
        Ok(())
    }

    fn collect(&mut self) -> SubsystemResult<()> {
        if self.closed {
            return Err(Status::INVALID_HANDLE);
        }
        check(unsafe { PdhCollectQueryData(self.query) })
    }

    fn read_formatted_array(&mut self, id: CounterId) -> SubsystemResult<Vec<CounterValue>> {
        let counter = self.counter(id)?;
        let mut buffer_size: u32 = 0;
        let mut item_count: u32 = 0;

        // First call reports the required buffer size
        let status = unsafe {
            PdhGetFormattedCounterArrayW(
                counter,
                PDH_FMT_DOUBLE,
                &mut buffer_size,
                &mut item_count,
                std::ptr::null_mut(),
            )
        };
        if status == ERROR_SUCCESS {
            return Ok(Vec::new());
        }
        if Status(status) != Status::MORE_DATA {
            return Err(Status(status));
        }

        // Item names are stored in the same buffer after the item array
        let item_size = std::mem::size_of::<PDH_FMT_COUNTERVALUE_ITEM_W>();
        let capacity = (buffer_size as usize + item_size - 1) / item_size;
        let mut buffer: Vec<PDH_FMT_COUNTERVALUE_ITEM_W> =
            vec![unsafe { std::mem::zeroed() }; capacity.max(1)];

        check(unsafe {
            PdhGetFormattedCounterArrayW(
                counter,
                PDH_FMT_DOUBLE,
                &mut buffer_size,
                &mut item_count,
                buffer.as_mut_ptr(),
            )
        })?;

        let items = &buffer[..(item_count as usize).min(buffer.len())];
        let values = items
            .iter()
            .map(|item| {
                let name = unsafe { from_wide(item.szName) };
                let item_status = Status(item.FmtValue.CStatus);
                let value = CounterValue::new(name, unsafe { item.FmtValue.Anonymous.doubleValue });
                if item_status.is_valid_data() {
                    value
                } else {
                    value.with_read_error(item_status)
                }
            })
            .collect();

        Ok(values)
    }

    fn close(&mut self) -> SubsystemResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.counters.clear();
        check(unsafe { PdhCloseQuery(self.query) })
    }
}

impl Drop for PdhSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(status) = self.close() {
                log::warn!("Failed to close PDH query on drop: {}", status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_round_trip() {
        let wide = to_wide("\\Processor(_Total)\\% Processor Time");
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(
            unsafe { from_wide(wide.as_ptr()) },
            "\\Processor(_Total)\\% Processor Time"
        );
        assert_eq!(unsafe { from_wide(std::ptr::null()) }, "");
    }

    #[test]
    fn test_check() {
        assert_eq!(check(0), Ok(()));
        assert_eq!(check(Status::NO_DATA.code()), Err(Status::NO_DATA));
    }
}
