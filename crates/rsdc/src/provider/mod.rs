// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider facade: one medical device publishing its MDIB.
//!
//! Ties the pieces together: the MDIB and its transaction manager, the
//! action router with all hosted services, the subscription manager wired
//! to committed change-sets, the SCO, and the optional waveform and alert
//! pumps. The host supplies HTTP serving (one call to
//! [`SdcProvider::handle_request`] per inbound POST) and discovery
//! announcement (publishes [`SdcProvider::service_entry`] on a
//! `DiscoveryNode`).
//!
//! Shutdown is staged: stop accepting subscriptions, drain the delivery
//! lanes up to a deadline, send `SubscriptionEnd` everywhere, stop the
//! workers. The discovery `Bye` is the host's final step (the node drains
//! its send queue before closing its socket).

pub mod alerts;
pub mod sco;
pub mod services;
pub mod waveform;

pub use alerts::{AlertPump, AlertSource};
pub use sco::{InvocationError, OperationHandler, OperationResult, ScoRuntime};
pub use waveform::{WaveformPump, WaveformSource};

use crate::biceps::reports::{encode_report, ReportBody, SystemError};
use crate::biceps::CodedValue;
use crate::config::SdcConfig;
use crate::discovery::{SdcLocation, ServiceEntry};
use crate::error::Result;
use crate::mdib::ProviderMdib;
use crate::names::{actions, QName};
use crate::soap::{SoapRouter, SoapTransport};
use crate::subscription::SubscriptionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// DPWS `ThisModel`/`ThisDevice` surface carried by the provider.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    pub manufacturer: String,
    pub model_name: String,
    pub friendly_name: String,
    pub firmware_version: String,
    pub serial_number: String,
}

/// Builder for [`SdcProvider`] (hosts configure, then `build()`).
pub struct SdcProviderBuilder {
    mdib: Arc<ProviderMdib>,
    transport: Arc<dyn SoapTransport>,
    config: SdcConfig,
    metadata: DeviceMetadata,
    base_url: String,
    location: Option<SdcLocation>,
    extra_scopes: Vec<String>,
    waveform_source: Option<Arc<dyn WaveformSource>>,
    alert_source: Option<Arc<dyn AlertSource>>,
}

impl SdcProviderBuilder {
    pub fn new(mdib: Arc<ProviderMdib>, transport: Arc<dyn SoapTransport>, base_url: &str) -> Self {
        Self {
            mdib,
            transport,
            config: SdcConfig::default(),
            metadata: DeviceMetadata::default(),
            base_url: base_url.to_string(),
            location: None,
            extra_scopes: Vec::new(),
            waveform_source: None,
            alert_source: None,
        }
    }

    pub fn config(mut self, config: SdcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Location advertised as an `sdc.ctxt.loc` discovery scope.
    pub fn location(mut self, location: SdcLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn scope(mut self, scope: &str) -> Self {
        self.extra_scopes.push(scope.to_string());
        self
    }

    pub fn waveform_source(mut self, source: Arc<dyn WaveformSource>) -> Self {
        self.waveform_source = Some(source);
        self
    }

    pub fn alert_source(mut self, source: Arc<dyn AlertSource>) -> Self {
        self.alert_source = Some(source);
        self
    }

    pub fn build(self) -> Result<SdcProvider> {
        let epr = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        let subscriptions = Arc::new(SubscriptionManager::new(
            Arc::clone(&self.transport),
            self.config.clone(),
            &self.base_url,
        ));

        // Committed change-sets flow straight into the fan-out, in commit
        // order (the listener runs under the commit lock).
        let fanout = Arc::clone(&subscriptions);
        self.mdib.on_change(move |change_set| fanout.on_change_set(change_set));

        let sco = ScoRuntime::new(
            Arc::clone(&self.mdib),
            Arc::clone(&subscriptions),
            self.config.operation_fast_path,
        );

        let mut router = SoapRouter::new(self.config.strict_envelopes);
        services::register_get_service(&mut router, Arc::clone(&self.mdib));
        services::register_set_service(&mut router, Arc::clone(&sco));
        services::register_context_service(&mut router, Arc::clone(&self.mdib), Arc::clone(&sco));
        services::register_containment_tree_service(&mut router, Arc::clone(&self.mdib));
        subscriptions.register_handlers(&mut router);

        let pump = self.waveform_source.map(|source| {
            WaveformPump::spawn(Arc::clone(&self.mdib), source, self.config.waveform_period)
        });
        let alert_pump = self.alert_source.map(|source| {
            AlertPump::spawn(Arc::clone(&self.mdib), source, self.config.alert_poll_period)
        });

        log::info!(
            "[provider] {} up at {} ({} actions routed)",
            epr,
            self.base_url,
            router.actions().len()
        );

        Ok(SdcProvider {
            epr,
            base_url: self.base_url,
            metadata: self.metadata,
            location: self.location,
            extra_scopes: self.extra_scopes,
            mdib: self.mdib,
            router: Arc::new(router),
            subscriptions,
            sco,
            pump: parking_lot::Mutex::new(pump),
            alert_pump: parking_lot::Mutex::new(alert_pump),
            config: self.config,
        })
    }
}

/// A running SDC provider.
pub struct SdcProvider {
    epr: String,
    base_url: String,
    metadata: DeviceMetadata,
    location: Option<SdcLocation>,
    extra_scopes: Vec<String>,
    mdib: Arc<ProviderMdib>,
    router: Arc<SoapRouter>,
    subscriptions: Arc<SubscriptionManager>,
    sco: Arc<ScoRuntime>,
    pump: parking_lot::Mutex<Option<WaveformPump>>,
    alert_pump: parking_lot::Mutex<Option<AlertPump>>,
    config: SdcConfig,
}

impl SdcProvider {
    pub fn builder(
        mdib: Arc<ProviderMdib>,
        transport: Arc<dyn SoapTransport>,
        base_url: &str,
    ) -> SdcProviderBuilder {
        SdcProviderBuilder::new(mdib, transport, base_url)
    }

    /// Stable endpoint reference of this device.
    pub fn epr(&self) -> &str {
        &self.epr
    }

    pub fn metadata(&self) -> &DeviceMetadata {
        &self.metadata
    }

    pub fn mdib(&self) -> &Arc<ProviderMdib> {
        &self.mdib
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    /// Override one operation's behavior.
    pub fn register_operation_handler(
        &self,
        operation_handle: &str,
        handler: Arc<dyn OperationHandler>,
    ) {
        self.sco.register_handler(operation_handle, handler);
    }

    /// Host HTTP entry point: one request document in, one response
    /// document out.
    pub fn handle_request(&self, raw: &str) -> String {
        self.router.handle(raw)
    }

    /// What this device advertises on WS-Discovery.
    pub fn service_entry(&self) -> ServiceEntry {
        let mut scopes = Vec::new();
        if let Some(location) = &self.location {
            scopes.push(location.scope_string());
        }
        scopes.extend(self.extra_scopes.iter().cloned());
        ServiceEntry {
            epr: self.epr.clone(),
            types: vec![QName::dpws_device(), QName::medical_device()],
            scopes,
            xaddrs: vec![self.base_url.clone()],
            metadata_version: 1,
        }
    }

    /// Publish a `SystemErrorReport` to matching subscribers.
    pub fn emit_system_error(&self, code: &str, info: Option<&str>) {
        let version_group = self.mdib.read().version_group().clone();
        let body = ReportBody::SystemError(vec![SystemError {
            code: CodedValue::new(code),
            info: info.map(str::to_string),
        }]);
        let encoded = encode_report(actions::SYSTEM_ERROR_REPORT, &body, &version_group);
        self.subscriptions
            .notify_raw(actions::SYSTEM_ERROR_REPORT, &encoded, &version_group, false);
    }

    /// Staged shutdown: stop accepting -> drain lanes (bounded) -> end all
    /// subscriptions -> stop workers. The host sends the discovery `Bye`
    /// afterwards.
    pub fn shutdown(&self) {
        log::info!("[provider] {} shutting down", self.epr);
        if let Some(pump) = self.pump.lock().take() {
            pump.shutdown();
        }
        if let Some(pump) = self.alert_pump.lock().take() {
            pump.shutdown();
        }
        self.sco.shutdown();
        self.subscriptions.stop_accepting();
        let deadline = Instant::now() + self.config.shutdown_stage_deadline;
        while self.subscriptions.pending_total() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if self.subscriptions.pending_total() > 0 {
            log::warn!(
                "[provider] drain deadline overrun, {} notification(s) abandoned",
                self.subscriptions.pending_total()
            );
        }
        self.subscriptions.end_all();
        self.subscriptions.shutdown();
    }
}

impl std::fmt::Debug for SdcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdcProvider")
            .field("epr", &self.epr)
            .field("base_url", &self.base_url)
            .field("mdib_version", &self.mdib.read().mdib_version())
            .finish()
    }
}
