//! Read error classification

use crate::core::Error;

/// Whether a read failure only means the counter has no sample yet
///
/// Process-scoped counters report these while their process starts or exits.
/// Anything else is a real failure.
pub fn is_benign_read_error(err: &Error) -> bool {
    match err {
        Error::Read { status, .. } | Error::InstanceRead { status, .. } => status.is_benign(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;

    fn read_error(status: Status) -> Error {
        Error::Read {
            path: "\\Process(w3wp)\\ID Process".to_string(),
            status,
        }
    }

    #[test]
    fn test_known_codes_are_benign() {
        for status in Status::BENIGN {
            assert!(is_benign_read_error(&read_error(status)), "{}", status);
        }
    }

    #[test]
    fn test_other_read_codes_are_fatal() {
        assert!(!is_benign_read_error(&read_error(Status::NO_DATA)));
        assert!(!is_benign_read_error(&read_error(Status::INVALID_HANDLE)));
        assert!(!is_benign_read_error(&read_error(Status(0xC000_0BFF))));
    }

    #[test]
    fn test_only_reads_are_classified() {
        assert!(!is_benign_read_error(&Error::Collection(Status::INVALID_DATA)));
        assert!(!is_benign_read_error(&Error::Registration {
            path: "\\X\\Y".to_string(),
            status: Status::INVALID_DATA,
        }));
    }
}
