//! Status codes returned across every API of the crate.

use std::error::Error as StdError;
use std::fmt;

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

/// Closed status taxonomy shared by all components.
///
/// The numeric values are a stable contract between peer processes and
/// bindings: `Success` is `0` and additions append only.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Status {
    /// Generic success code.
    Success = 0,
    /// Generic error code.
    Error,
    /// Resource requested found but not modified.
    NotModified,
    /// Resource requested not found.
    NotFound,
    /// Resource temporarily unavailable (call again).
    Again,
    /// End of file.
    Eof,
    /// Not enough space.
    NoMem,
    /// Invalid argument.
    InvalidArg,
    /// Conflict with the current state of the target resource.
    Conflict,
    /// Operation timed out.
    TimedOut,
    /// Operation interrupted.
    Interrupted,
    /// Bad or not supported media format.
    BadMediaFormat,
    /// Bad or not supported multiplex format.
    BadMuxFormat,
}

impl Status {
    /// Folds a status into a `Result`, mapping `Success` to `Ok(())` and
    /// everything else to `Err(self)`.
    pub fn ok(self) -> Result<(), Status> {
        if self == Status::Success {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Status::Success => "success",
            Status::Error => "generic error",
            Status::NotModified => "resource not modified",
            Status::NotFound => "resource not found",
            Status::Again => "resource temporarily unavailable",
            Status::Eof => "end of file",
            Status::NoMem => "not enough space",
            Status::InvalidArg => "invalid argument",
            Status::Conflict => "conflict with resource state",
            Status::TimedOut => "operation timed out",
            Status::Interrupted => "operation interrupted",
            Status::BadMediaFormat => "bad or unsupported media format",
            Status::BadMuxFormat => "bad or unsupported multiplex format",
        };
        write!(f, "{description}")
    }
}

impl StdError for Status {}

impl From<nix::errno::Errno> for Status {
    fn from(errno: nix::errno::Errno) -> Self {
        use nix::errno::Errno;
        match errno {
            Errno::ENOMEM => Status::NoMem,
            Errno::EAGAIN => Status::Again,
            Errno::EINVAL => Status::InvalidArg,
            Errno::ENOENT => Status::NotFound,
            Errno::EEXIST => Status::Conflict,
            Errno::ETIMEDOUT => Status::TimedOut,
            Errno::EINTR => Status::Interrupted,
            _ => Status::Error,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn numeric_contract_is_stable() {
        assert_eq!(i32::from(Status::Success), 0);
        assert_eq!(i32::from(Status::Error), 1);
        assert_eq!(i32::from(Status::NotModified), 2);
        assert_eq!(i32::from(Status::NotFound), 3);
        assert_eq!(i32::from(Status::Again), 4);
        assert_eq!(i32::from(Status::Eof), 5);
        assert_eq!(i32::from(Status::NoMem), 6);
        assert_eq!(i32::from(Status::InvalidArg), 7);
        assert_eq!(i32::from(Status::Conflict), 8);
        assert_eq!(i32::from(Status::TimedOut), 9);
        assert_eq!(i32::from(Status::Interrupted), 10);
        assert_eq!(i32::from(Status::BadMediaFormat), 11);
        assert_eq!(i32::from(Status::BadMuxFormat), 12);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Status::try_from(13).is_err());
        assert!(Status::try_from(-1).is_err());
        assert_eq!(Status::try_from(0).unwrap(), Status::Success);
    }

    #[test]
    fn ok_folds_success_only() {
        assert_eq!(Status::Success.ok(), Ok(()));
        assert_eq!(Status::NoMem.ok(), Err(Status::NoMem));
    }

    #[test]
    fn errno_mapping() {
        use nix::errno::Errno;
        assert_eq!(Status::from(Errno::EAGAIN), Status::Again);
        assert_eq!(Status::from(Errno::ETIMEDOUT), Status::TimedOut);
        assert_eq!(Status::from(Errno::EIO), Status::Error);
    }
}
