// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer facade: discover, mirror, subscribe, invoke.
//!
//! An [`SdcConsumer`] talks to exactly one provider: it fetches the MDIB,
//! keeps the local mirror current through the report processor, manages the
//! subscription lifecycle, and correlates asynchronous operation-invoked
//! reports by `TransactionId`. The host supplies the HTTP plumbing: a
//! [`SoapTransport`] for outbound calls and a call to
//! [`handle_notification`](SdcConsumer::handle_notification) for every
//! notification its listener receives on the `notify_to` endpoint.

pub mod mirror;

pub use mirror::{ConsumerMdib, IncomingReport, ReportProcessor, StreamStats};

use crate::biceps::reports::{
    decode_mdib, decode_report, read_version_group, InvocationInfo, InvocationReportPart,
    ReportBody, SetRequest, SetResponse,
};
use crate::biceps::{ContextState, Handle, MdibVersionGroup, State};
use crate::config::SdcConfig;
use crate::error::{Error, Result};
use crate::mdib::MdibSnapshot;
use crate::names::actions;
use crate::soap::envelope::{HeaderInfo, ReceivedEnvelope};
use crate::soap::{SoapClient, SoapTransport};
use crate::subscription::wire::decode_subscription_end_status;
use crate::subscription::{ConsumerSubscription, SubscriptionClient};
use crate::xml::Decimal;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type OperationObserver = Box<dyn Fn(&InvocationReportPart) + Send + Sync>;
type EndObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Client for one remote provider.
pub struct SdcConsumer {
    soap: Arc<SoapClient>,
    device_url: String,
    mdib: Arc<ConsumerMdib>,
    processor: Arc<ReportProcessor>,
    subscriptions: SubscriptionClient,
    completed_ops: Mutex<HashMap<u64, InvocationReportPart>>,
    ops_cv: Condvar,
    op_observers: RwLock<Vec<OperationObserver>>,
    end_observers: RwLock<Vec<EndObserver>>,
}

impl SdcConsumer {
    /// Build the consumer and perform the initial `GetMdib`.
    pub fn connect(
        transport: Arc<dyn SoapTransport>,
        device_url: &str,
        notify_to: &str,
        config: &SdcConfig,
    ) -> Result<Arc<Self>> {
        let soap = Arc::new(SoapClient::new(transport, config.strict_envelopes));
        let mdib = Arc::new(ConsumerMdib::new());
        let processor = Arc::new(ReportProcessor::new(
            Arc::clone(&mdib),
            config.reorder_window,
            config.reorder_buffer_depth,
        ));
        let subscriptions =
            SubscriptionClient::new(Arc::clone(&soap), notify_to, config.clone());
        let consumer = Arc::new(Self {
            soap,
            device_url: device_url.to_string(),
            mdib,
            processor,
            subscriptions,
            completed_ops: Mutex::new(HashMap::new()),
            ops_cv: Condvar::new(),
            op_observers: RwLock::new(Vec::new()),
            end_observers: RwLock::new(Vec::new()),
        });

        // Gap recovery = refetch; also wired to resubscription gaps.
        let weak = Arc::downgrade(&consumer);
        consumer.processor.set_refetch(move || {
            if let Some(consumer) = weak.upgrade() {
                if let Err(e) = consumer.fetch_mdib() {
                    log::warn!("[consumer] gap refetch failed: {}", e);
                }
            }
        });
        let weak = Arc::downgrade(&consumer);
        consumer.subscriptions.on_gap(move || {
            if let Some(consumer) = weak.upgrade() {
                if let Err(e) = consumer.fetch_mdib() {
                    log::warn!("[consumer] post-resubscribe refetch failed: {}", e);
                }
            }
        });

        consumer.fetch_mdib()?;
        Ok(consumer)
    }

    /// Current mirrored snapshot.
    pub fn mdib(&self) -> Arc<MdibSnapshot> {
        self.mdib.read()
    }

    /// The mirror itself (for observers that need more than snapshots).
    pub fn mirror(&self) -> &Arc<ConsumerMdib> {
        &self.mdib
    }

    /// The continuity-enforcing report processor (observer registration,
    /// stream statistics).
    pub fn processor(&self) -> &Arc<ReportProcessor> {
        &self.processor
    }

    /// (Re)fetch the full MDIB and restart the report stream from it.
    pub fn fetch_mdib(&self) -> Result<MdibVersionGroup> {
        let response = self.soap.call(
            &self.device_url,
            HeaderInfo::for_action(actions::GET_MDIB),
            &format!("<msg:GetMdib xmlns:msg=\"{}\"/>", crate::names::ns::MSG),
            true,
        )?;
        let (version_group, decoded) = response.with_body(|body, raw| {
            let body = body.ok_or_else(|| "empty GetMdibResponse".to_string())?;
            let version_group = read_version_group(&body)?;
            let mdib_node = body
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "Mdib")
                .ok_or_else(|| "GetMdibResponse missing msg:Mdib".to_string())?;
            Ok::<_, String>((version_group, decode_mdib(&mdib_node, raw)?))
        })
        .map_err(Error::UnexpectedResponse)?;
        self.mdib.reset_from(version_group.clone(), decoded)?;
        self.processor.bootstrap(&version_group);
        log::info!(
            "[consumer] MDIB loaded: version {} ({} descriptors)",
            version_group.mdib_version,
            self.mdib.read().descriptor_count()
        );
        Ok(version_group)
    }

    /// Subscribe for the given report actions on this provider.
    pub fn subscribe_reports(
        &self,
        filter: &[&str],
        expires: Option<Duration>,
    ) -> Result<Arc<ConsumerSubscription>> {
        self.subscriptions.subscribe(&self.device_url, filter, expires)
    }

    /// Entry point for the host's notification listener: one notification
    /// envelope in, routed to the right sink.
    pub fn handle_notification(&self, raw: &str) -> Result<()> {
        let envelope = ReceivedEnvelope::parse(raw, false)?;
        match envelope.action.as_str() {
            actions::OPERATION_INVOKED_REPORT => {
                let parts = envelope
                    .with_body(|body, raw| {
                        body.map(|n| decode_report(actions::OPERATION_INVOKED_REPORT, &n, raw))
                    })
                    .transpose()
                    .map_err(Error::UnexpectedResponse)?;
                if let Some(ReportBody::OperationInvoked(parts)) = parts {
                    for part in parts {
                        self.dispatch_operation_report(part);
                    }
                }
                Ok(())
            }
            actions::SUBSCRIPTION_END => {
                let status = envelope
                    .with_body(|body, _| body.as_ref().and_then(decode_subscription_end_status))
                    .unwrap_or_default();
                log::warn!("[consumer] subscription ended by source: {}", status);
                for observer in self.end_observers.read().iter() {
                    observer(&status);
                }
                Ok(())
            }
            action => {
                let Some(_) = ReportBody::element_name(action) else {
                    log::debug!("[consumer] ignoring notification with action {}", action);
                    return Ok(());
                };
                let action_owned = action.to_string();
                let report = envelope
                    .with_body(|body, raw| {
                        let body =
                            body.ok_or_else(|| "empty report body".to_string())?;
                        let version_group = read_version_group(&body)
                            .or_else(|e| envelope.version_group.clone().ok_or(e))?;
                        let decoded = decode_report(&action_owned, &body, raw)?;
                        Ok::<_, String>(IncomingReport {
                            action: action_owned.clone(),
                            version_group,
                            body: decoded,
                        })
                    })
                    .map_err(Error::UnexpectedResponse)?;
                self.processor.on_report(report);
                self.processor.tick();
                Ok(())
            }
        }
    }

    fn dispatch_operation_report(&self, part: InvocationReportPart) {
        log::debug!(
            "[consumer] operation report: transaction {} -> {:?}",
            part.info.transaction_id,
            part.info.state
        );
        for observer in self.op_observers.read().iter() {
            observer(&part);
        }
        if part.info.state.is_final() {
            self.completed_ops
                .lock()
                .insert(part.info.transaction_id, part);
            self.ops_cv.notify_all();
        }
    }

    /// Register an operation-invoked observer
    /// (`transaction_id, invocation_state, operation_target, error`).
    pub fn on_operation_invoked(
        &self,
        observer: impl Fn(&InvocationReportPart) + Send + Sync + 'static,
    ) {
        self.op_observers.write().push(Box::new(observer));
    }

    /// Register a subscription-end observer (status URI).
    pub fn on_subscription_end(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        self.end_observers.write().push(Box::new(observer));
    }

    /// Block until the final invocation report for `transaction_id`
    /// arrives, or the timeout passes.
    pub fn wait_final(
        &self,
        transaction_id: u64,
        timeout: Duration,
    ) -> Option<InvocationReportPart> {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed_ops.lock();
        loop {
            if let Some(part) = completed.remove(&transaction_id) {
                return Some(part);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            self.ops_cv.wait_for(&mut completed, remaining);
        }
    }

    /// Invoke any set-service operation; returns the immediate
    /// `InvocationInfo` (state `Wait`/`Start`/`Fin`/`Fail`).
    pub fn invoke(&self, request: &SetRequest) -> Result<InvocationInfo> {
        let response = self.soap.call(
            &self.device_url,
            HeaderInfo::for_action(request.action()),
            &request.encode(),
            false,
        )?;
        let set_response = response
            .with_body(|body, _| body.map(|n| SetResponse::decode(&n)))
            .ok_or_else(|| Error::UnexpectedResponse("empty set response".to_string()))?
            .map_err(Error::UnexpectedResponse)?;
        Ok(set_response.info)
    }

    pub fn set_value(&self, operation: &str, value: f64) -> Result<InvocationInfo> {
        self.invoke(&SetRequest::SetValue {
            operation: operation.to_string(),
            value: Decimal::from(value),
        })
    }

    pub fn set_string(&self, operation: &str, value: &str) -> Result<InvocationInfo> {
        self.invoke(&SetRequest::SetString {
            operation: operation.to_string(),
            value: value.to_string(),
        })
    }

    pub fn activate(&self, operation: &str, args: &[&str]) -> Result<InvocationInfo> {
        self.invoke(&SetRequest::Activate {
            operation: operation.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    pub fn set_context_state(
        &self,
        operation: &str,
        states: Vec<ContextState>,
    ) -> Result<InvocationInfo> {
        self.invoke(&SetRequest::SetContextState {
            operation: operation.to_string(),
            states,
        })
    }

    /// `GetMdState`, optionally restricted to handles.
    pub fn get_md_state(&self, handles: &[Handle]) -> Result<Vec<State>> {
        let body = crate::biceps::reports::encode_handle_refs("GetMdState", handles);
        let response = self.soap.call(
            &self.device_url,
            HeaderInfo::for_action(actions::GET_MD_STATE),
            &body,
            true,
        )?;
        response
            .with_body(|body, raw| {
                let body = body.ok_or_else(|| "empty GetMdStateResponse".to_string())?;
                let md_state = body
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == "MdState")
                    .ok_or_else(|| "GetMdStateResponse missing msg:MdState".to_string())?;
                let mut out = Vec::new();
                for child in md_state.children().filter(|n| {
                    n.is_element()
                        && n.attribute((crate::names::ns::XSI, "type")).is_some()
                }) {
                    if let crate::biceps::codec::AnyState::Single(s) =
                        crate::biceps::codec::decode_any_state(&child, Some(raw))?
                    {
                        out.push(s);
                    }
                }
                Ok::<_, String>(out)
            })
            .map_err(Error::UnexpectedResponse)
    }

    /// `GetContextStates` (all of them).
    pub fn get_context_states(&self) -> Result<Vec<ContextState>> {
        let body = crate::biceps::reports::encode_handle_refs("GetContextStates", &[]);
        let response = self.soap.call(
            &self.device_url,
            HeaderInfo::for_action(actions::GET_CONTEXT_STATES),
            &body,
            true,
        )?;
        response
            .with_body(|body, raw| {
                let body =
                    body.ok_or_else(|| "empty GetContextStatesResponse".to_string())?;
                let mut out = Vec::new();
                for child in body.children().filter(|n| {
                    n.is_element()
                        && n.attribute((crate::names::ns::XSI, "type")).is_some()
                }) {
                    if let crate::biceps::codec::AnyState::Context(s) =
                        crate::biceps::codec::decode_any_state(&child, Some(raw))?
                    {
                        out.push(s);
                    }
                }
                Ok::<_, String>(out)
            })
            .map_err(Error::UnexpectedResponse)
    }

    /// Consumer teardown: drop all subscriptions (best effort).
    pub fn shutdown(&self) {
        self.subscriptions.unsubscribe_all();
    }
}

impl std::fmt::Debug for SdcConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdcConsumer")
            .field("device_url", &self.device_url)
            .field("mdib_version", &self.mdib.read().mdib_version())
            .finish()
    }
}
