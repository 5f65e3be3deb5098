//! Unified error handling for the library.

use thiserror::Error;

/// Classifies the OS primitive behind an [`Error::Os`] failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OsKind {
    Open,
    Snapshot,
    Read,
    Write,
    Alloc,
    Protect,
    Query,
    ThreadCreate,
    Wait,
    Debug,
}

/// Enumeration of all possible errors raised by the toolkit.
#[derive(Error)]
pub enum Error {
    /// A type, range, or emptiness violation detected before touching OS state.
    #[error("{0}")]
    InvalidArgument(String),

    /// A null or sentinel process handle was supplied.
    #[error("invalid handle: null or INVALID_HANDLE_VALUE")]
    InvalidHandle,

    /// A process, module, thread, or pattern match could not be located.
    #[error("{0} not found")]
    NotFound(String),

    /// A floating-point value cannot be widened to a fixed-width integer losslessly.
    #[error("value {0} cannot be converted to a fixed-width integer without precision loss")]
    PrecisionLoss(f64),

    /// Returned when a Win32 API call fails.
    /// Contains the operation class, the function name and the error code (GetLastError).
    #[error("Win32 API '{api}' failed during {kind:?} with error code: {code}")]
    Os {
        kind: OsKind,
        api: &'static str,
        code: u32,
    },

    /// Bytes transferred did not match bytes requested.
    #[error("partial transfer: moved {actual} of {expected} bytes")]
    PartialTransfer { expected: usize, actual: usize },

    /// A bounded wait elapsed without the awaited condition.
    #[error("bounded wait of {0} ms elapsed")]
    Timeout(u32),

    /// A type tag outside the supported set was supplied.
    #[error("unknown type tag: '{0}'")]
    UnknownType(String),

    /// A signature token failed to parse.
    #[error("malformed pattern token: '{0}'")]
    PatternSyntax(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_error_carries_api_and_code() {
        let err = Error::Os {
            kind: OsKind::Read,
            api: "ReadProcessMemory",
            code: 299,
        };
        let text = err.to_string();
        assert!(text.contains("ReadProcessMemory"));
        assert!(text.contains("299"));
        assert!(text.contains("Read"));
    }

    #[test]
    fn debug_forwards_to_display() {
        let err = Error::InvalidHandle;
        assert_eq!(format!("{:?}", err), format!("{}", err));
    }
}
