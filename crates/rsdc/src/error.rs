// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Public error type for the SDC stack.
//!
//! One grouped enum covers the whole taxonomy: protocol faults, domain
//! faults, subscription faults, transport errors, MDIB continuity errors and
//! configuration errors. Background loops never surface these; they log and
//! continue. Everything that crosses the API boundary does.

use crate::soap::fault::Fault;

/// Error conditions reported by the public API.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (fatal at startup)
    // ========================================================================
    /// Invalid or unusable configuration (no matching adapter, duplicate handles, ...).
    Config(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Received a SOAP fault from the peer.
    Soap(Fault),
    /// Malformed XML or envelope (parser message included).
    Envelope(String),
    /// Response did not have the expected shape (missing element, bad action).
    UnexpectedResponse(String),

    // ========================================================================
    // MDIB Errors
    // ========================================================================
    /// A commit would violate an MDIB invariant (dangling parent, duplicate
    /// handle, missing single-state, ...). The transaction was rolled back.
    Consistency(String),
    /// Entity addressed by a transaction does not exist in the committed MDIB.
    UnknownHandle(String),
    /// Report continuity lost (sequence id changed, unrecoverable version gap).
    Continuity(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    Io(std::io::Error),
    /// Notification or request delivery failed (connection refused, timeout,
    /// HTTP status). The string carries the transport's description.
    Delivery(String),

    // ========================================================================
    // Subscription Errors
    // ========================================================================
    /// Subscription is not (or no longer) known to the event source.
    UnknownSubscription(String),
    /// Requested expiration was rejected by the event source.
    InvalidExpirationTime,

    // ========================================================================
    // Operation Errors
    // ========================================================================
    /// Remote operation reported `InvocationState = Fail`.
    OperationFailed {
        /// Transaction id assigned by the provider.
        transaction_id: u64,
        /// Error code from the invocation report (e.g. `Inv`, `Unspec`).
        error: String,
        /// Human readable message, if the provider sent one.
        message: Option<String>,
    },
    /// Invalid state for the requested operation.
    InvalidState(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Soap(fault) => write!(f, "SOAP fault: {}", fault),
            Error::Envelope(msg) => write!(f, "Malformed envelope: {}", msg),
            Error::UnexpectedResponse(msg) => write!(f, "Unexpected response: {}", msg),
            Error::Consistency(msg) => write!(f, "MDIB consistency violation: {}", msg),
            Error::UnknownHandle(handle) => write!(f, "Unknown handle: {}", handle),
            Error::Continuity(msg) => write!(f, "MDIB continuity lost: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Delivery(msg) => write!(f, "Delivery failed: {}", msg),
            Error::UnknownSubscription(id) => write!(f, "Unknown subscription: {}", id),
            Error::InvalidExpirationTime => write!(f, "Invalid expiration time"),
            Error::OperationFailed {
                transaction_id,
                error,
                message,
            } => match message {
                Some(msg) => write!(
                    f,
                    "Operation failed (transaction {}): {} - {}",
                    transaction_id, error, msg
                ),
                None => write!(f, "Operation failed (transaction {}): {}", transaction_id, error),
            },
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Self {
        Error::Soap(fault)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = Error::UnknownHandle("hr.num".to_string());
        assert!(err.to_string().contains("hr.num"));

        let err = Error::OperationFailed {
            transaction_id: 7,
            error: "Inv".to_string(),
            message: Some("no such target".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("7"), "transaction id missing: {}", text);
        assert!(text.contains("Inv"), "error code missing: {}", text);
    }

    #[test]
    fn test_io_source_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from(io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
