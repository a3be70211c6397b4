//! Error taxonomy for the networking runtime.
//!
//! Every asynchronous completion in the crate carries a [`Code`]:
//! `Ok(())` for success, or one of the kinds below. I/O errors are mapped
//! into the taxonomy before they cross a strand boundary, so handlers only
//! ever see these kinds. Stop operations take [`Error`] directly: a stop
//! with a success code is unrepresentable.

use thiserror::Error;

/// Completion code delivered to asynchronous handlers.
pub type Code = Result<(), Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    // Operational
    #[error("unknown error")]
    Unknown,
    #[error("service stopped")]
    ServiceStopped,
    #[error("service suspended")]
    ServiceSuspended,
    #[error("operation canceled")]
    OperationCanceled,
    #[error("operation failed")]
    OperationFailed,
    #[error("operation timed out")]
    OperationTimeout,

    // Resource
    #[error("bad stream")]
    BadStream,
    #[error("not allowed")]
    NotAllowed,
    #[error("peer disconnected")]
    PeerDisconnect,
    #[error("peer unsupported")]
    PeerUnsupported,
    #[error("peer advertises insufficient services or version")]
    PeerInsufficient,
    #[error("peer timestamp out of range")]
    PeerTimestamp,
    #[error("peer is own loopback")]
    PeerLoopback,
    #[error("peer throttling")]
    PeerThrottling,
    #[error("peer blacklisted")]
    PeerBlacklisted,

    // Channel lifecycle
    #[error("channel timed out")]
    ChannelTimeout,
    #[error("channel conflict")]
    ChannelConflict,
    #[error("channel dropped")]
    ChannelDropped,
    #[error("channel stopped")]
    ChannelStopped,
    #[error("channel expired")]
    ChannelExpired,
    #[error("channel inactive")]
    ChannelInactive,
    #[error("channels exhausted")]
    ChannelExhausted,

    // Framing
    #[error("invalid magic")]
    InvalidMagic,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("invalid message")]
    InvalidMessage,
    #[error("invalid heading")]
    InvalidHeading,
    #[error("oversized payload")]
    OversizedPayload,

    // Connection
    #[error("hostname resolution failed")]
    ResolveFailed,
    #[error("connect failed")]
    ConnectFailed,
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("listen failed")]
    ListenFailed,
    #[error("accept failed")]
    AcceptFailed,
    #[error("address blocked")]
    AddressBlocked,
    #[error("address invalid")]
    AddressInvalid,
    #[error("address not found")]
    AddressNotFound,
    #[error("address pool disabled")]
    AddressDisabled,
    #[error("address pool empty")]
    AddressEmpty,

    // Subscriber
    #[error("subscriber key exists")]
    SubscriberExists,
    #[error("subscriber stopped")]
    SubscriberStopped,

    // Seed/handshake
    #[error("seeding unsuccessful")]
    SeedingUnsuccessful,
    #[error("protocol violation")]
    ProtocolViolation,
}

impl Error {
    /// Map a completion from the socket layer into the channel taxonomy.
    /// Cancellation from a socket stop surfaces as `ChannelStopped`.
    pub fn to_channel(self) -> Error {
        match self {
            Error::OperationCanceled => Error::ChannelStopped,
            other => other,
        }
    }

    /// Terminal stop reasons preclude restoring the peer's address to the
    /// pool (outbound reclaim predicate).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Error::PeerBlacklisted
                | Error::PeerLoopback
                | Error::PeerInsufficient
                | Error::PeerTimestamp
                | Error::ProtocolViolation
                | Error::AddressBlocked
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Error::PeerDisconnect,
            ErrorKind::TimedOut => Error::OperationTimeout,
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable => Error::ListenFailed,
            ErrorKind::Interrupted => Error::OperationCanceled,
            _ => Error::OperationFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert_eq!(Error::from(reset), Error::PeerDisconnect);

        let timeout = std::io::Error::from(std::io::ErrorKind::TimedOut);
        assert_eq!(Error::from(timeout), Error::OperationTimeout);
    }

    #[test]
    fn test_terminal_reasons() {
        assert!(Error::PeerLoopback.is_terminal());
        assert!(Error::PeerBlacklisted.is_terminal());
        assert!(!Error::ChannelInactive.is_terminal());
        assert!(!Error::PeerDisconnect.is_terminal());
    }

    #[test]
    fn test_channel_translation() {
        assert_eq!(Error::OperationCanceled.to_channel(), Error::ChannelStopped);
        assert_eq!(Error::InvalidChecksum.to_channel(), Error::InvalidChecksum);
    }
}
