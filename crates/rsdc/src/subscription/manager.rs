// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Provider-side subscription manager: bookkeeping, filter matching,
//! renew/expire, ordered fan-out.
//!
//! Every subscription gets its own single-lane FIFO worker thread, so
//! per-subscriber delivery order equals emission order while a slow
//! receiver cannot stall the others. Delivery failure policy:
//!
//! - transient transport errors mark the subscription failed, no retries
//!   (the receiver's duty is to resubscribe on gap),
//! - authoritative errors (404/410) delete it immediately,
//! - queue overflow terminates it with `DeliveryFailure` after waveform
//!   notifications have been sacrificed first.
//!
//! A background sweeper removes expired subscriptions without an
//! end-notification.

use super::lane::{DeliveryQueue, EnqueueResult, LaneItem};
use super::wire::{
    self, end_status, SubscribeRequest, SubscribeResponseBody, DELIVERY_MODE_PUSH, IDENT_LOCAL,
    IDENT_NS,
};
use crate::biceps::reports::encode_report;
use crate::biceps::MdibVersionGroup;
use crate::config::SdcConfig;
use crate::mdib::ChangeSet;
use crate::names::actions;
use crate::soap::envelope::{build_envelope, HeaderInfo, RawElement, ReceivedEnvelope};
use crate::soap::fault::Fault;
use crate::soap::router::{ResponseBody, SoapRouter};
use crate::soap::SoapTransport;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One active subscription.
pub struct Subscription {
    /// Correlation identifier (text of the `ident` reference parameter).
    pub ident: String,
    pub notify_to: String,
    pub end_to: Option<String>,
    /// Subscriber-supplied parameters, echoed in every notification.
    notify_ref_params: Vec<RawElement>,
    /// Ordered action URI set.
    pub filter: Vec<String>,
    expires_at: Mutex<Instant>,
    queue: Arc<DeliveryQueue>,
    notification_counter: AtomicU64,
    failed: AtomicBool,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscription {
    /// Does the filter list this action?
    pub fn matches(&self, action: &str) -> bool {
        self.filter.iter().any(|a| a == action)
    }

    /// Remaining lifetime (zero when expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .lock()
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO)
    }

    /// Notifications handed to the transport so far.
    pub fn notification_count(&self) -> u64 {
        self.notification_counter.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn stop_worker(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("ident", &self.ident)
            .field("notify_to", &self.notify_to)
            .field("filter", &self.filter.len())
            .field("failed", &self.is_failed())
            .finish()
    }
}

struct ManagerInner {
    subs: RwLock<HashMap<String, Arc<Subscription>>>,
    transport: Arc<dyn SoapTransport>,
    config: SdcConfig,
    /// Address returned as the SubscriptionManager EPR.
    manager_address: String,
    accepting: AtomicBool,
}

impl ManagerInner {
    fn remove(&self, ident: &str) -> Option<Arc<Subscription>> {
        self.subs.write().remove(ident)
    }

    /// Send `SubscriptionEnd` to one subscription's end endpoint. Best
    /// effort; delivery problems are only logged.
    fn send_end(&self, sub: &Subscription, status: &str, reason: &str) {
        let target = sub.end_to.as_deref().unwrap_or(&sub.notify_to);
        let body = wire::encode_subscription_end(
            &self.manager_address,
            &[RawElement::new(IDENT_NS, IDENT_LOCAL, &sub.ident)],
            status,
            reason,
        );
        let header = HeaderInfo {
            action: actions::SUBSCRIPTION_END.to_string(),
            to: Some(target.to_string()),
            reference_parameters: sub.notify_ref_params.clone(),
            ..HeaderInfo::default()
        };
        if let Err(e) = self.transport.post(target, &build_envelope(&header, &body)) {
            log::debug!("[subscriptions] SubscriptionEnd to {} failed: {}", target, e);
        }
    }
}

/// Subscription manager (event source side).
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
    sweeper_stop: Arc<AtomicBool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(
        transport: Arc<dyn SoapTransport>,
        config: SdcConfig,
        manager_address: &str,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            subs: RwLock::new(HashMap::new()),
            transport,
            config,
            manager_address: manager_address.to_string(),
            accepting: AtomicBool::new(true),
        });
        let sweeper_stop = Arc::new(AtomicBool::new(false));
        let sweeper_inner = Arc::downgrade(&inner);
        let stop_clone = Arc::clone(&sweeper_stop);
        let sweeper = thread::Builder::new()
            .name("rsdc-sub-sweeper".to_string())
            .spawn(move || sweeper_loop(&sweeper_inner, &stop_clone))
            .ok();
        Self {
            inner,
            sweeper_stop,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// Total notifications still queued across all lanes (drain check
    /// during staged shutdown).
    pub fn pending_total(&self) -> usize {
        self.inner.subs.read().values().map(|s| s.queue.len()).sum()
    }

    /// Look up one subscription (observation/testing).
    pub fn subscription(&self, ident: &str) -> Option<Arc<Subscription>> {
        self.inner.subs.read().get(ident).cloned()
    }

    /// Wire up the four WS-Eventing actions on the router.
    pub fn register_handlers(&self, router: &mut SoapRouter) {
        let inner = Arc::clone(&self.inner);
        router.register(actions::SUBSCRIBE, move |request| {
            handle_subscribe(&inner, request)
        });
        let inner = Arc::clone(&self.inner);
        router.register(actions::RENEW, move |request| handle_renew(&inner, request));
        let inner = Arc::clone(&self.inner);
        router.register(actions::GET_STATUS, move |request| {
            handle_get_status(&inner, request)
        });
        let inner = Arc::clone(&self.inner);
        router.register(actions::UNSUBSCRIBE, move |request| {
            handle_unsubscribe(&inner, request)
        });
    }

    /// Fan one committed change-set out to all matching subscriptions.
    /// Called synchronously from the transaction manager, in commit order.
    pub fn on_change_set(&self, change_set: &ChangeSet) {
        let action = change_set.action();
        let body = encode_report(action, &change_set.to_report_body(), change_set.version_group());
        self.notify_raw(
            action,
            &body,
            change_set.version_group(),
            change_set.is_waveform(),
        );
    }

    /// Enqueue a pre-encoded report body (used directly by the SCO for
    /// `OperationInvokedReport` and for `SystemErrorReport`).
    pub fn notify_raw(
        &self,
        action: &str,
        body: &str,
        version_group: &MdibVersionGroup,
        is_waveform: bool,
    ) {
        let mut doomed: Vec<Arc<Subscription>> = Vec::new();
        {
            let subs = self.inner.subs.read();
            for sub in subs.values() {
                if sub.is_failed() || !sub.matches(action) {
                    continue;
                }
                let item = LaneItem {
                    action: action.to_string(),
                    body: body.to_string(),
                    version_group: version_group.clone(),
                    is_waveform,
                };
                match sub.queue.push(item) {
                    EnqueueResult::Queued => {}
                    EnqueueResult::QueuedDroppedWaveform => {
                        log::debug!(
                            "[subscriptions] {} slow, dropped oldest waveform notification",
                            sub.ident
                        );
                    }
                    EnqueueResult::Overflow => doomed.push(Arc::clone(sub)),
                }
            }
        }
        for sub in doomed {
            log::warn!(
                "[subscriptions] {} overflowed, terminating with DeliveryFailure",
                sub.ident
            );
            if let Some(sub) = self.inner.remove(&sub.ident) {
                self.inner.send_end(&sub, end_status::DELIVERY_FAILURE, "delivery queue overflow");
                sub.stop_worker();
            }
        }
    }

    /// First shutdown stage: refuse new subscriptions while queues drain.
    pub fn stop_accepting(&self) {
        self.inner.accepting.store(false, Ordering::Relaxed);
    }

    /// Notify and drop all subscriptions with `SourceShuttingDown`.
    pub fn end_all(&self) {
        let all: Vec<Arc<Subscription>> = {
            let mut subs = self.inner.subs.write();
            subs.drain().map(|(_, s)| s).collect()
        };
        for sub in all {
            self.inner.send_end(&sub, end_status::SOURCE_SHUTTING_DOWN, "event source stopping");
            sub.stop_worker();
        }
    }

    /// Stop the sweeper (called from the provider teardown after
    /// [`end_all`](Self::end_all)).
    pub fn shutdown(&self) {
        self.sweeper_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.sweeper_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
    }
}

fn sweeper_loop(inner: &Weak<ManagerInner>, stop: &Arc<AtomicBool>) {
    loop {
        // Chunked sleep keeps shutdown responsive.
        let sleep_end = Instant::now() + crate::config::SUBSCRIPTION_SWEEP_PERIOD;
        while Instant::now() < sleep_end {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let expired: Vec<Arc<Subscription>> = {
            let mut subs = inner.subs.write();
            let doomed: Vec<String> = subs
                .values()
                .filter(|s| s.remaining() == Duration::ZERO)
                .map(|s| s.ident.clone())
                .collect();
            doomed.iter().filter_map(|id| subs.remove(id)).collect()
        };
        for sub in expired {
            // Expired subscriptions end silently, no end-notification.
            log::info!("[subscriptions] {} expired, removed", sub.ident);
            sub.stop_worker();
        }
    }
}

fn handle_subscribe(
    inner: &Arc<ManagerInner>,
    request: &ReceivedEnvelope,
) -> Result<ResponseBody, Fault> {
    if !inner.accepting.load(Ordering::Relaxed) {
        return Err(Fault::event_source_unable("event source is shutting down"));
    }
    let subscribe = request
        .with_body(|body, _| {
            body.map(|n| SubscribeRequest::decode(&n))
                .unwrap_or_else(|| Err("empty Subscribe body".to_string()))
        })
        .map_err(|e| Fault::sender(&e))?;
    if let Some(mode) = &subscribe.delivery_mode {
        if mode != DELIVERY_MODE_PUSH {
            return Err(Fault::delivery_mode_unavailable());
        }
    }
    if subscribe.filter.is_empty() {
        return Err(Fault::sender("empty filter"));
    }

    // Clamp silently to the configured cap.
    let granted = subscribe
        .expires
        .unwrap_or(inner.config.max_subscription_duration)
        .min(inner.config.max_subscription_duration);

    let ident = uuid::Uuid::new_v4().simple().to_string();
    let queue = Arc::new(DeliveryQueue::new(inner.config.delivery_lane_depth));
    let stop = Arc::new(AtomicBool::new(false));
    let subscription = Arc::new(Subscription {
        ident: ident.clone(),
        notify_to: subscribe.notify_to.clone(),
        end_to: subscribe.end_to.clone(),
        notify_ref_params: subscribe.notify_ref_params.clone(),
        filter: subscribe.filter.clone(),
        expires_at: Mutex::new(Instant::now() + granted),
        queue: Arc::clone(&queue),
        notification_counter: AtomicU64::new(0),
        failed: AtomicBool::new(false),
        stop: Arc::clone(&stop),
        worker: Mutex::new(None),
    });

    let worker = spawn_lane_worker(inner, &subscription);
    *subscription.worker.lock() = worker;
    inner.subs.write().insert(ident.clone(), Arc::clone(&subscription));
    log::info!(
        "[subscriptions] new subscription {} -> {} ({} action(s), {}s)",
        ident,
        subscription.notify_to,
        subscription.filter.len(),
        granted.as_secs()
    );

    let response = SubscribeResponseBody {
        manager_address: inner.manager_address.clone(),
        manager_ref_params: vec![RawElement::new(IDENT_NS, IDENT_LOCAL, &ident)],
        expires: granted,
    };
    Ok(ResponseBody::new(actions::SUBSCRIBE_RESPONSE, response.encode()))
}

/// The correlation ident travels as a reference parameter on manager
/// requests.
fn ident_of(request: &ReceivedEnvelope) -> Result<String, Fault> {
    request
        .reference_parameter(IDENT_LOCAL)
        .map(|p| p.text.clone())
        .ok_or_else(|| Fault::unknown_subscription("<missing ident>"))
}

fn handle_renew(
    inner: &Arc<ManagerInner>,
    request: &ReceivedEnvelope,
) -> Result<ResponseBody, Fault> {
    let ident = ident_of(request)?;
    let sub = inner
        .subs
        .read()
        .get(&ident)
        .cloned()
        .ok_or_else(|| Fault::unknown_subscription(&ident))?;
    let requested = request.with_body(|body, _| body.as_ref().and_then(wire::decode_expires));
    let granted = requested
        .unwrap_or(inner.config.max_subscription_duration)
        .min(inner.config.max_subscription_duration);
    *sub.expires_at.lock() = Instant::now() + granted;
    log::debug!("[subscriptions] {} renewed for {}s", ident, granted.as_secs());
    Ok(ResponseBody::new(
        actions::RENEW_RESPONSE,
        wire::encode_expires_response("RenewResponse", granted),
    ))
}

fn handle_get_status(
    inner: &Arc<ManagerInner>,
    request: &ReceivedEnvelope,
) -> Result<ResponseBody, Fault> {
    let ident = ident_of(request)?;
    let sub = inner
        .subs
        .read()
        .get(&ident)
        .cloned()
        .ok_or_else(|| Fault::unknown_subscription(&ident))?;
    Ok(ResponseBody::new(
        actions::GET_STATUS_RESPONSE,
        wire::encode_expires_response("GetStatusResponse", sub.remaining()),
    ))
}

fn handle_unsubscribe(
    inner: &Arc<ManagerInner>,
    request: &ReceivedEnvelope,
) -> Result<ResponseBody, Fault> {
    let ident = ident_of(request)?;
    let sub = inner
        .remove(&ident)
        .ok_or_else(|| Fault::unknown_subscription(&ident))?;
    sub.stop_worker();
    log::info!("[subscriptions] {} unsubscribed", ident);
    Ok(ResponseBody::new(
        actions::UNSUBSCRIBE_RESPONSE,
        wire::encode_empty("UnsubscribeResponse"),
    ))
}

/// Lane worker: pops queued notifications and POSTs them in order.
fn spawn_lane_worker(
    inner: &Arc<ManagerInner>,
    subscription: &Arc<Subscription>,
) -> Option<JoinHandle<()>> {
    let weak_inner = Arc::downgrade(inner);
    let sub = Arc::clone(subscription);
    thread::Builder::new()
        .name("rsdc-sub-lane".to_string())
        .spawn(move || {
            loop {
                if sub.stop.load(Ordering::Relaxed) {
                    break;
                }
                let Some(item) = sub.queue.pop(Duration::from_millis(100)) else {
                    continue;
                };
                let header = HeaderInfo {
                    action: item.action.clone(),
                    to: Some(sub.notify_to.clone()),
                    reference_parameters: sub.notify_ref_params.clone(),
                    version_group: Some(item.version_group.clone()),
                    ..HeaderInfo::default()
                };
                let envelope = build_envelope(&header, &item.body);
                let Some(inner) = weak_inner.upgrade() else {
                    break;
                };
                match inner.transport.post(&sub.notify_to, &envelope) {
                    Ok(_) => {
                        sub.notification_counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) if e.is_authoritative() => {
                        log::info!(
                            "[subscriptions] {} rejected authoritatively ({}), deleting",
                            sub.ident,
                            e
                        );
                        inner.remove(&sub.ident);
                        break;
                    }
                    Err(e) => {
                        // Transient: mark failed, stop delivering, no retry.
                        log::warn!(
                            "[subscriptions] delivery to {} failed ({}), marking {} failed",
                            sub.notify_to,
                            e,
                            sub.ident
                        );
                        sub.failed.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::state::{MetricValue, StateKind};
    use crate::biceps::State;
    use crate::soap::TransportError;
    use std::sync::Mutex as StdMutex;

    /// Records every notification; optional scripted failure.
    struct RecordingTransport {
        notifications: StdMutex<Vec<(String, String)>>, // (url, envelope)
        fail_with: StdMutex<Option<TransportError>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                notifications: StdMutex::new(Vec::new()),
                fail_with: StdMutex::new(None),
            })
        }

        fn count(&self) -> usize {
            self.notifications.lock().expect("lock").len()
        }
    }

    impl SoapTransport for RecordingTransport {
        fn post(&self, url: &str, envelope: &str) -> Result<String, TransportError> {
            if let Some(err) = self.fail_with.lock().expect("lock").clone() {
                return Err(err);
            }
            self.notifications
                .lock()
                .expect("lock")
                .push((url.to_string(), envelope.to_string()));
            // Minimal empty 200-style response envelope.
            Ok(build_envelope(
                &HeaderInfo::for_action("urn:response"),
                "",
            ))
        }
    }

    fn subscribe_envelope(filter: &[&str], expires: Option<Duration>) -> String {
        let req = SubscribeRequest::new("http://consumer/notify", filter, expires);
        let header = HeaderInfo {
            action: actions::SUBSCRIBE.to_string(),
            message_id: Some("urn:uuid:sub-req".to_string()),
            ..HeaderInfo::default()
        };
        build_envelope(&header, &req.encode())
    }

    fn manager(transport: Arc<RecordingTransport>) -> (SubscriptionManager, SoapRouter) {
        let config = SdcConfig {
            delivery_lane_depth: 4,
            ..SdcConfig::default()
        };
        let manager = SubscriptionManager::new(transport, config, "http://device/subs");
        let mut router = SoapRouter::new(false);
        manager.register_handlers(&mut router);
        (manager, router)
    }

    fn subscribe(
        router: &SoapRouter,
        filter: &[&str],
        expires: Option<Duration>,
    ) -> SubscribeResponseBody {
        let response = router.handle(&subscribe_envelope(filter, expires));
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        assert_eq!(parsed.action, actions::SUBSCRIBE_RESPONSE);
        parsed
            .with_body(|b, _| b.map(|n| SubscribeResponseBody::decode(&n)))
            .expect("body present")
            .expect("decodes")
    }

    fn metric_change_set(version: u64) -> ChangeSet {
        let mut state = State::new("hr.num", StateKind::NumericMetric { value: None });
        state.version = version;
        state.kind = StateKind::NumericMetric {
            value: Some(MetricValue::numeric(70.0 + version as f64, version)),
        };
        ChangeSet::Metrics {
            version_group: MdibVersionGroup {
                mdib_version: version,
                sequence_id: "urn:uuid:seq".to_string(),
                instance_id: None,
            },
            states: vec![state],
        }
    }

    fn wait_for(mut predicate: impl FnMut() -> bool) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached within 1s");
    }

    #[test]
    fn test_subscribe_grants_clamped_expiration() {
        let transport = RecordingTransport::new();
        let (_manager, router) = manager(transport);
        let response = subscribe(
            &router,
            &[actions::EPISODIC_METRIC_REPORT],
            Some(Duration::from_secs(1_000_000)),
        );
        assert_eq!(
            response.expires,
            crate::config::MAX_SUBSCRIPTION_DURATION,
            "requests above the cap are silently clamped"
        );
        assert_eq!(
            response.manager_ref_params.len(),
            1,
            "exactly one correlation reference parameter"
        );
    }

    #[test]
    fn test_filtered_delivery_and_order(){
        let transport = RecordingTransport::new();
        let (manager, router) = manager(Arc::clone(&transport));
        subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], Some(Duration::from_secs(60)));

        for version in 1..=3 {
            manager.on_change_set(&metric_change_set(version));
        }
        // Context report: outside the filter, must never be delivered.
        manager.notify_raw(
            actions::EPISODIC_CONTEXT_REPORT,
            "<x/>",
            &MdibVersionGroup::new_random(),
            false,
        );
        wait_for(|| transport.count() >= 3);
        thread::sleep(Duration::from_millis(50));
        let notifications = transport.notifications.lock().expect("lock").clone();
        assert_eq!(notifications.len(), 3, "filter keeps the context report out");
        // Per-subscription order equals emission order.
        let versions: Vec<u64> = notifications
            .iter()
            .map(|(_, envelope)| {
                ReceivedEnvelope::parse(envelope, false)
                    .expect("parses")
                    .version_group
                    .expect("version headers present")
                    .mdib_version
            })
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn test_renew_and_get_status() {
        let transport = RecordingTransport::new();
        let (_manager, router) = manager(transport);
        let response = subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], Some(Duration::from_secs(60)));
        let ident = response.manager_ref_params[0].clone();

        let renew_header = HeaderInfo {
            action: actions::RENEW.to_string(),
            message_id: Some("urn:uuid:renew".to_string()),
            reference_parameters: vec![ident.clone()],
            ..HeaderInfo::default()
        };
        let renew = build_envelope(&renew_header, &wire::encode_renew(Duration::from_secs(30)));
        let first = router.handle(&renew);
        let parsed = ReceivedEnvelope::parse(&first, false).expect("parses");
        assert_eq!(parsed.action, actions::RENEW_RESPONSE);
        let granted_first = parsed
            .with_body(|b, _| b.as_ref().and_then(wire::decode_expires))
            .expect("expires");
        // Immediate second renew grants the same duration.
        let second = router.handle(&renew);
        let granted_second = ReceivedEnvelope::parse(&second, false)
            .expect("parses")
            .with_body(|b, _| b.as_ref().and_then(wire::decode_expires))
            .expect("expires");
        assert_eq!(granted_first, granted_second);
    }

    #[test]
    fn test_renew_unknown_subscription_faults() {
        let transport = RecordingTransport::new();
        let (_manager, router) = manager(transport);
        let header = HeaderInfo {
            action: actions::RENEW.to_string(),
            message_id: Some("urn:uuid:renew2".to_string()),
            reference_parameters: vec![RawElement::new(IDENT_NS, IDENT_LOCAL, "bogus")],
            ..HeaderInfo::default()
        };
        let response = router.handle(&build_envelope(&header, &wire::encode_renew(Duration::from_secs(30))));
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        let fault = parsed
            .with_body(|b, _| b.as_ref().and_then(Fault::decode))
            .expect("fault");
        assert!(fault.is_unknown_subscription());
    }

    #[test]
    fn test_unsubscribe_removes() {
        let transport = RecordingTransport::new();
        let (manager, router) = manager(transport);
        let response = subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], None);
        assert_eq!(manager.active_count(), 1);
        let header = HeaderInfo {
            action: actions::UNSUBSCRIBE.to_string(),
            message_id: Some("urn:uuid:unsub".to_string()),
            reference_parameters: response.manager_ref_params.clone(),
            ..HeaderInfo::default()
        };
        let out = router.handle(&build_envelope(&header, &wire::encode_empty("Unsubscribe")));
        let parsed = ReceivedEnvelope::parse(&out, false).expect("parses");
        assert_eq!(parsed.action, actions::UNSUBSCRIBE_RESPONSE);
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_transient_failure_marks_failed_no_retry() {
        let transport = RecordingTransport::new();
        let (manager, router) = manager(Arc::clone(&transport));
        let response = subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], None);
        let ident = response.manager_ref_params[0].text.clone();

        *transport.fail_with.lock().expect("lock") = Some(TransportError::Refused);
        manager.on_change_set(&metric_change_set(1));
        let sub = manager.subscription(&ident).expect("still tracked");
        wait_for(|| sub.is_failed());
        assert_eq!(transport.count(), 0, "nothing delivered, no retry");
        // Failed subscriptions are skipped on the next fan-out.
        manager.on_change_set(&metric_change_set(2));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.count(), 0);
    }

    #[test]
    fn test_end_all_sends_subscription_end() {
        let transport = RecordingTransport::new();
        let (manager, router) = manager(Arc::clone(&transport));
        subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], None);
        manager.end_all();
        assert_eq!(manager.active_count(), 0);
        let notifications = transport.notifications.lock().expect("lock").clone();
        assert_eq!(notifications.len(), 1);
        let parsed = ReceivedEnvelope::parse(&notifications[0].1, false).expect("parses");
        assert_eq!(parsed.action, actions::SUBSCRIPTION_END);
        let status = parsed
            .with_body(|b, _| b.as_ref().and_then(wire::decode_subscription_end_status))
            .expect("status");
        assert_eq!(status, end_status::SOURCE_SHUTTING_DOWN);
    }

    #[test]
    fn test_expiration_sweeper_removes_silently() {
        let transport = RecordingTransport::new();
        let (manager, router) = manager(Arc::clone(&transport));
        let response = subscribe(&router, &[actions::EPISODIC_METRIC_REPORT], Some(Duration::from_millis(10)));
        assert!(response.expires <= Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);
        // Sweep period is 1s; within ~2s the subscription must be gone.
        for _ in 0..40 {
            if manager.active_count() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(manager.active_count(), 0, "expired subscription removed");
        assert_eq!(transport.count(), 0, "expiry sends no end-notification");
    }
}
