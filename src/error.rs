//! The error taxonomy: fatal environment errors that abort the process, and
//! per-probe send errors that map an errno to one of the outcome keywords
//! reported on the wire.

use thiserror::Error;

/// Conditions that indicate a broken host, not a runtime condition to
/// recover from. The library never calls `std::process::abort`/`exit`
/// itself — it returns this structured error and leaves the decision to
/// the command layer (see [`crate::driver`]).
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("failed to open {0} socket: {1}")]
    SocketOpen(&'static str, #[source] std::io::Error),

    #[error("failed to set non-blocking mode on {0} socket: {1}")]
    NonBlocking(&'static str, #[source] std::io::Error),

    #[error("select() failed: {0}")]
    Select(#[source] std::io::Error),

    #[error("receiving from {0} socket failed: {1}")]
    Recv(&'static str, #[source] std::io::Error),

    #[error("platform calibration failed: {0}")]
    Calibration(String),
}

/// One line of the outcome vocabulary, minus the RTT-bearing `reply-<type>`
/// line (that one is built directly by [`crate::recv::ProbeReply`] once an
/// RTT is known).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKeyword {
    ProbesExhausted,
    InvalidArgument,
    NetworkDown,
    NoRoute,
    PermissionDenied,
    AddressInUse,
    UnexpectedError(i32),
    NoReply,
}

impl OutcomeKeyword {
    /// Map an I/O error's errno to an outcome keyword. Errors without a raw
    /// OS errno (shouldn't happen for socket syscalls on Unix) fall back to
    /// `unexpected-error errno 0`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EINVAL) => Self::InvalidArgument,
            Some(libc::ENETDOWN) => Self::NetworkDown,
            Some(libc::ENETUNREACH) => Self::NoRoute,
            Some(libc::EPERM) => Self::PermissionDenied,
            Some(libc::EADDRINUSE) => Self::AddressInUse,
            Some(errno) => Self::UnexpectedError(errno),
            None => Self::UnexpectedError(0),
        }
    }

    /// Render as the ASCII keyword portion of an outcome line (without the
    /// leading `<token> `).
    #[must_use]
    pub fn as_keyword(self) -> String {
        match self {
            Self::ProbesExhausted => "probes-exhausted".to_string(),
            Self::InvalidArgument => "invalid-argument".to_string(),
            Self::NetworkDown => "network-down".to_string(),
            Self::NoRoute => "no-route".to_string(),
            Self::PermissionDenied => "permission-denied".to_string(),
            Self::AddressInUse => "address-in-use".to_string(),
            Self::UnexpectedError(errno) => format!("unexpected-error errno {errno}"),
            Self::NoReply => "no-reply".to_string(),
        }
    }

    /// Render a full outcome line, e.g. `"3 no-reply"`.
    #[must_use]
    pub fn as_line(self, command_token: i64) -> String {
        format!("{command_token} {}", self.as_keyword())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_errnos() {
        let mk = |errno: i32| std::io::Error::from_raw_os_error(errno);
        assert_eq!(
            OutcomeKeyword::from_io_error(&mk(libc::EINVAL)),
            OutcomeKeyword::InvalidArgument
        );
        assert_eq!(
            OutcomeKeyword::from_io_error(&mk(libc::ENETDOWN)),
            OutcomeKeyword::NetworkDown
        );
        assert_eq!(
            OutcomeKeyword::from_io_error(&mk(libc::ENETUNREACH)),
            OutcomeKeyword::NoRoute
        );
        assert_eq!(
            OutcomeKeyword::from_io_error(&mk(libc::EPERM)),
            OutcomeKeyword::PermissionDenied
        );
        assert_eq!(
            OutcomeKeyword::from_io_error(&mk(libc::EADDRINUSE)),
            OutcomeKeyword::AddressInUse
        );
    }

    #[test]
    fn falls_back_to_unexpected_error() {
        let err = std::io::Error::from_raw_os_error(libc::ENOMEM);
        match OutcomeKeyword::from_io_error(&err) {
            OutcomeKeyword::UnexpectedError(errno) => assert_eq!(errno, libc::ENOMEM),
            other => panic!("expected UnexpectedError, got {other:?}"),
        }
    }

    #[test]
    fn formats_outcome_lines() {
        assert_eq!(
            OutcomeKeyword::ProbesExhausted.as_line(7),
            "7 probes-exhausted"
        );
        assert_eq!(
            OutcomeKeyword::UnexpectedError(42).as_line(1),
            "1 unexpected-error errno 42"
        );
    }
}
