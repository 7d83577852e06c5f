// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP request/response client over a pluggable transport.
//!
//! The HTTP(S) machinery is deliberately outside this crate; hosts inject a
//! [`SoapTransport`]. The client adds the envelope layer, fault surfacing
//! and the retry-once policy for idempotent calls.

use super::envelope::{build_envelope, HeaderInfo, ReceivedEnvelope};
use super::fault::Fault;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Transport-level failure classification. Drives the delivery-failure
/// policy of the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused / unreachable.
    Refused,
    /// Request or connect timeout.
    Timeout,
    /// HTTP status outside 2xx.
    Http(u16),
    /// Anything else (TLS failure, DNS, ...).
    Other(String),
}

impl TransportError {
    /// Authoritative end-of-subscription signals: the endpoint exists but
    /// rejects this traffic permanently.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, TransportError::Http(404) | TransportError::Http(410))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Refused => write!(f, "connection refused"),
            TransportError::Timeout => write!(f, "timeout"),
            TransportError::Http(status) => write!(f, "http status {}", status),
            TransportError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// POST one envelope, return the response document.
///
/// Implementations must be safe for concurrent use; the subscription lanes
/// and the consumer share one instance.
pub trait SoapTransport: Send + Sync {
    fn post(&self, url: &str, envelope: &str) -> std::result::Result<String, TransportError>;
}

/// Envelope-level SOAP client.
pub struct SoapClient {
    transport: Arc<dyn SoapTransport>,
    strict: bool,
}

impl SoapClient {
    pub fn new(transport: Arc<dyn SoapTransport>, strict: bool) -> Self {
        Self { transport, strict }
    }

    pub fn transport(&self) -> &Arc<dyn SoapTransport> {
        &self.transport
    }

    /// Send a request and parse the response. `idempotent` requests are
    /// retried exactly once on a transport error; everything else surfaces
    /// immediately. A SOAP fault in the response becomes `Error::Soap`.
    pub fn call(
        &self,
        url: &str,
        mut header: HeaderInfo,
        body: &str,
        idempotent: bool,
    ) -> Result<ReceivedEnvelope> {
        if header.to.is_none() {
            header.to = Some(url.to_string());
        }
        let envelope = build_envelope(&header, body);
        let raw = match self.transport.post(url, &envelope) {
            Ok(raw) => raw,
            Err(first) if idempotent => {
                log::debug!("[soap] transport error ({}), retrying once: {}", url, first);
                self.transport
                    .post(url, &envelope)
                    .map_err(|e| Error::Delivery(e.to_string()))?
            }
            Err(e) => return Err(Error::Delivery(e.to_string())),
        };
        let response = ReceivedEnvelope::parse(&raw, self.strict)?;
        if let Some(fault) = response.with_body(|body, _| body.as_ref().and_then(Fault::decode)) {
            return Err(Error::Soap(fault));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for SoapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapClient").field("strict", &self.strict).finish()
    }
}
