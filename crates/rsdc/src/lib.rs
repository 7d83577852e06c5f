// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RSDC - IEEE 11073 SDC in pure Rust
//!
//! A pure Rust implementation of the IEEE 11073 SDC (Service-Oriented
//! Device Connectivity) protocol family for interoperable point-of-care
//! medical device communication: BICEPS participant/message models, DPWS
//! over SOAP 1.2, WS-Discovery multicast and WS-Eventing subscriptions.
//!
//! Built for testing and demonstration setups, NOT for clinical use.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsdc::mdib::ProviderMdib;
//! use rsdc::provider::SdcProvider;
//! use rsdc::consumer::SdcConsumer;
//! use rsdc::config::SdcConfig;
//! # use std::sync::Arc;
//! # fn transport() -> Arc<dyn rsdc::soap::SoapTransport> { unimplemented!() }
//!
//! # fn main() -> rsdc::Result<()> {
//! // Provider: populate an MDIB, publish it.
//! let mdib = Arc::new(ProviderMdib::new());
//! let provider = SdcProvider::builder(mdib, transport(), "http://10.0.0.7:6464/device")
//!     .build()?;
//!
//! // Consumer: mirror the remote MDIB, subscribe, invoke.
//! let consumer = SdcConsumer::connect(
//!     transport(),
//!     "http://10.0.0.7:6464/device",
//!     "http://10.0.0.9:8080/notify",
//!     &SdcConfig::default(),
//! )?;
//! let hr = consumer.mdib().state("hr.num").cloned();
//! # let _ = (provider, hr);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Facade Layer                                |
//! |        SdcProvider (device)      SdcConsumer (client)              |
//! +--------------------------------------------------------------------+
//! |                        Service Layer                               |
//! |  Hosted services | SCO operations | Subscriptions | Report proc.   |
//! +--------------------------------------------------------------------+
//! |                        Model Layer                                 |
//! |  MDIB store + transactions | BICEPS sum types | change-sets        |
//! +--------------------------------------------------------------------+
//! |                        Wire Layer                                  |
//! |  SOAP 1.2 / WS-Addressing | WS-Eventing | WS-Discovery over UDP    |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`provider::SdcProvider`] | Device facade: MDIB, hosted services, fan-out |
//! | [`consumer::SdcConsumer`] | Client facade: mirror, subscriptions, operations |
//! | [`mdib::ProviderMdib`] | Transactional MDIB access (the only write path) |
//! | [`mdib::MdibSnapshot`] | Immutable committed view, lock-free reads |
//! | [`discovery::DiscoveryNode`] | WS-Discovery multicast node (one adapter) |
//! | [`soap::SoapTransport`] | Pluggable HTTP POST (the host's transport) |
//!
//! ## Scope
//!
//! TLS and the HTTP server/client machinery are deliberately NOT in this
//! crate; they enter through [`soap::SoapTransport`] and the host's
//! notification listener. The wire payloads this crate produces and
//! consumes are bit-compatible with the referenced standards.

/// BICEPS participant model (descriptors, states, contexts) and message
/// bodies.
pub mod biceps;
/// Global configuration: wire constants and the runtime `SdcConfig`.
pub mod config;
/// Consumer facade: MDIB mirror, report processor, operation tracking.
pub mod consumer;
/// WS-Discovery 2005/04 engine (UDP multicast).
pub mod discovery;
/// Public error type.
pub mod error;
/// MDIB store, transaction manager, change-sets.
pub mod mdib;
/// Canonical names: namespaces, QNames, action URIs.
pub mod names;
/// Provider facade: hosted services, SCO, waveform pump.
pub mod provider;
/// SOAP 1.2 envelope/fault codec, action router, client.
pub mod soap;
/// WS-Eventing subscriptions: provider manager and consumer client.
pub mod subscription;
/// XML writer and typed value codec.
pub mod xml;

pub use config::SdcConfig;
pub use error::{Error, Result};

pub use biceps::{
    ContextAssociation, ContextState, Descriptor, DescriptorKind, Handle, MdibVersionGroup, State,
    StateKind,
};
pub use consumer::SdcConsumer;
pub use discovery::{DiscoveryNode, SdcLocation, ServiceEntry};
pub use mdib::{ChangeSet, MdibSnapshot, ProviderMdib};
pub use provider::SdcProvider;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests;
