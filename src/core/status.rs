//! Counter subsystem status codes
//!
//! Values follow the PDH status codes from `pdhmsg.h`. The emulated and mock
//! subsystems report the same codes so the rest of the engine only has one
//! vocabulary to deal with.

use std::fmt;

/// A raw status code returned by a counter subsystem call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u32);

impl Status {
    pub const CSTATUS_VALID_DATA: Status = Status(0x0000_0000);
    pub const CSTATUS_NEW_DATA: Status = Status(0x0000_0001);
    pub const CSTATUS_NO_MACHINE: Status = Status(0x8000_07D0);
    pub const CSTATUS_NO_INSTANCE: Status = Status(0x8000_07D1);
    pub const MORE_DATA: Status = Status(0x8000_07D2);
    pub const NO_DATA: Status = Status(0x8000_07D5);
    pub const CALC_NEGATIVE_DENOMINATOR: Status = Status(0x8000_07D6);
    pub const CALC_NEGATIVE_TIMEBASE: Status = Status(0x8000_07D7);
    pub const CALC_NEGATIVE_VALUE: Status = Status(0x8000_07D8);
    pub const CSTATUS_NO_OBJECT: Status = Status(0xC000_0BB8);
    pub const CSTATUS_NO_COUNTER: Status = Status(0xC000_0BB9);
    pub const CSTATUS_INVALID_DATA: Status = Status(0xC000_0BBA);
    pub const MEMORY_ALLOCATION_FAILURE: Status = Status(0xC000_0BBB);
    pub const INVALID_HANDLE: Status = Status(0xC000_0BBC);
    pub const INVALID_ARGUMENT: Status = Status(0xC000_0BBD);
    pub const CSTATUS_BAD_COUNTERNAME: Status = Status(0xC000_0BC0);
    pub const INSUFFICIENT_BUFFER: Status = Status(0xC000_0BC2);
    pub const INVALID_PATH: Status = Status(0xC000_0BC4);
    pub const INVALID_INSTANCE: Status = Status(0xC000_0BC5);
    pub const INVALID_DATA: Status = Status(0xC000_0BC6);

    /// Codes seen while a process-scoped counter's process is starting or exiting.
    /// A read failing with one of these means "no sample yet".
    pub const BENIGN: [Status; 3] = [
        Status::INVALID_DATA,
        Status::CALC_NEGATIVE_VALUE,
        Status::CSTATUS_INVALID_DATA,
    ];

    pub fn code(self) -> u32 {
        self.0
    }

    pub fn is_benign(self) -> bool {
        Self::BENIGN.contains(&self)
    }

    /// Whether a per-item `CStatus` carries usable data
    pub fn is_valid_data(self) -> bool {
        self == Status::CSTATUS_VALID_DATA || self == Status::CSTATUS_NEW_DATA
    }

    /// Symbolic name for the codes we know about
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Status::CSTATUS_VALID_DATA => "PDH_CSTATUS_VALID_DATA",
            Status::CSTATUS_NEW_DATA => "PDH_CSTATUS_NEW_DATA",
            Status::CSTATUS_NO_MACHINE => "PDH_CSTATUS_NO_MACHINE",
            Status::CSTATUS_NO_INSTANCE => "PDH_CSTATUS_NO_INSTANCE",
            Status::MORE_DATA => "PDH_MORE_DATA",
            Status::NO_DATA => "PDH_NO_DATA",
            Status::CALC_NEGATIVE_DENOMINATOR => "PDH_CALC_NEGATIVE_DENOMINATOR",
            Status::CALC_NEGATIVE_TIMEBASE => "PDH_CALC_NEGATIVE_TIMEBASE",
            Status::CALC_NEGATIVE_VALUE => "PDH_CALC_NEGATIVE_VALUE",
            Status::CSTATUS_NO_OBJECT => "PDH_CSTATUS_NO_OBJECT",
            Status::CSTATUS_NO_COUNTER => "PDH_CSTATUS_NO_COUNTER",
            Status::CSTATUS_INVALID_DATA => "PDH_CSTATUS_INVALID_DATA",
            Status::MEMORY_ALLOCATION_FAILURE => "PDH_MEMORY_ALLOCATION_FAILURE",
            Status::INVALID_HANDLE => "PDH_INVALID_HANDLE",
            Status::INVALID_ARGUMENT => "PDH_INVALID_ARGUMENT",
            Status::CSTATUS_BAD_COUNTERNAME => "PDH_CSTATUS_BAD_COUNTERNAME",
            Status::INSUFFICIENT_BUFFER => "PDH_INSUFFICIENT_BUFFER",
            Status::INVALID_PATH => "PDH_INVALID_PATH",
            Status::INVALID_INSTANCE => "PDH_INVALID_INSTANCE",
            Status::INVALID_DATA => "PDH_INVALID_DATA",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "status 0x{:08X}", self.0),
        }
    }
}

impl std::error::Error for Status {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_set_is_closed() {
        assert!(Status::INVALID_DATA.is_benign());
        assert!(Status::CALC_NEGATIVE_VALUE.is_benign());
        assert!(Status::CSTATUS_INVALID_DATA.is_benign());

        assert!(!Status::NO_DATA.is_benign());
        assert!(!Status::CSTATUS_NO_INSTANCE.is_benign());
        assert!(!Status::CSTATUS_NO_OBJECT.is_benign());
        assert!(!Status(0xDEAD_BEEF).is_benign());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Status::INVALID_DATA.to_string(),
            "PDH_INVALID_DATA (0xC0000BC6)"
        );
        assert_eq!(Status(0x1234).to_string(), "status 0x00001234");
    }

    #[test]
    fn test_valid_data() {
        assert!(Status::CSTATUS_VALID_DATA.is_valid_data());
        assert!(Status::CSTATUS_NEW_DATA.is_valid_data());
        assert!(!Status::CSTATUS_INVALID_DATA.is_valid_data());
    }
}
