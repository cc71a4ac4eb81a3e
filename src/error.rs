use thiserror::Error;

use crate::message::AlertDescription;

/// Errors produced by the connector.
///
/// Handshake-phase errors reach the application through the failing
/// [`Establishment`](crate::Establishment) or an [`Output::Failed`](crate::Output::Failed).
/// Only capacity and configuration errors are returned synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed, out-of-sequence or repeatedly unexpected messages.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Credential not found, MAC/signature mismatch or chain validation failure.
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// The retransmission budget of a flight was exhausted.
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// The connection store is full and no idle connection could be evicted.
    #[error("Connection store full (capacity {0})")]
    CapacityExceeded(usize),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The peer terminated the handshake with a fatal alert.
    #[error("Peer sent fatal alert: {0:?}")]
    PeerAlert(AlertDescription),

    /// The connection was closed, evicted or replaced while work was pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation needs an established session for the current epoch.
    #[error("Connection not established")]
    NotEstablished,

    #[error("Crypto error: {0}")]
    CryptoError(String),
}

/// Coarse failure classes, one per kind of caller remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The peer (or we) declined or failed authentication.
    Authentication,
    /// Peer unreachable or not responding.
    Unreachable,
    /// Local resources exhausted.
    ResourceExhausted,
    /// The peer does not speak the protocol correctly.
    Protocol,
    /// The connection went away underneath the caller.
    Closed,
    /// Local misconfiguration.
    Configuration,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::AuthenticationFailure(_) => FailureKind::Authentication,
            Error::PeerAlert(alert) if alert.is_authentication_related() => {
                FailureKind::Authentication
            }
            Error::PeerAlert(_) => FailureKind::Protocol,
            Error::ProtocolViolation(_) => FailureKind::Protocol,
            Error::Timeout(_) => FailureKind::Unreachable,
            Error::CapacityExceeded(_) => FailureKind::ResourceExhausted,
            Error::ConfigError(_) | Error::CryptoError(_) => FailureKind::Configuration,
            Error::ConnectionClosed | Error::NotEstablished => FailureKind::Closed,
        }
    }
}
