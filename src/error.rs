use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of [`crate::Client`].
///
/// Only setup-phase failures show up here. Steady-state problems (a failed
/// direct send, a panicking message handler) are logged and absorbed.
#[derive(Debug, Error)]
pub enum Error {
    /// control connection to the coordinator could not be established
    #[error("coordinator connect failed: {0}")]
    ConnectFailure(#[source] io::Error),

    /// control connection did not complete within the configured timeout
    #[error("coordinator connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// coordinator answered `REGISTER` with something other than `OK`, or not at all
    #[error("registration failed: {}", .0.as_deref().unwrap_or("no reply"))]
    RegistrationFailure(Option<String>),

    /// no endpoint announcement arrived within the connect retry budget
    #[error("peer {0} unreachable")]
    PeerUnreachable(String),

    /// ids are single protocol tokens: non empty, no whitespace
    #[error("invalid id {0:?}")]
    InvalidId(String),

    #[error("client already registered")]
    AlreadyRegistered,

    #[error("client not registered")]
    NotRegistered,

    /// client was shut down, or the control channel was lost
    #[error("client closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::RegistrationFailure(None).to_string(),
            "registration failed: no reply"
        );
        assert_eq!(
            Error::RegistrationFailure(Some("DENIED taken".into())).to_string(),
            "registration failed: DENIED taken"
        );
        assert_eq!(
            Error::PeerUnreachable("bob".into()).to_string(),
            "peer bob unreachable"
        );
        assert_eq!(
            Error::InvalidId("bob smith".into()).to_string(),
            "invalid id \"bob smith\""
        );
    }
}
