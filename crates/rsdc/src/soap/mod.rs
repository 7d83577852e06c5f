// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP 1.2 / WS-Addressing plumbing: envelopes, faults, the action router
//! and the client.
//!
//! HTTP itself is a pluggable sink behind [`client::SoapTransport`]; this
//! module only produces and consumes envelope strings.

pub mod client;
pub mod envelope;
pub mod fault;
pub mod router;

pub use client::{SoapClient, SoapTransport, TransportError};
pub use envelope::{AppSequence, HeaderInfo, RawElement, ReceivedEnvelope};
pub use fault::{Fault, FaultCode};
pub use router::{ResponseBody, SoapRouter};
