// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer-side subscription lifecycle: subscribe, auto-renew,
//! unsubscribe, unknown-subscription recovery.
//!
//! A background renewer fires at `expires - safety_margin` (floored at half
//! the granted interval for short grants). When a renew is answered with an
//! `UnknownSubscription` fault the client transparently creates a fresh
//! subscription on the same event sink and reports a gap, because
//! notifications between expiry and resubscription are lost.

use super::wire::{self, SubscribeRequest, SubscribeResponseBody};
use crate::config::SdcConfig;
use crate::error::{Error, Result};
use crate::names::actions;
use crate::soap::envelope::{HeaderInfo, RawElement};
use crate::soap::SoapClient;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One subscription as seen from the consumer.
pub struct ConsumerSubscription {
    /// Actions subscribed to (ordered set, as sent).
    pub filter: Vec<String>,
    /// Hosted-service URL the Subscribe was posted to.
    event_sink_url: String,
    manager_address: Mutex<String>,
    manager_ref_params: Mutex<Vec<RawElement>>,
    granted: Mutex<Duration>,
    expires_at: Mutex<Instant>,
}

impl ConsumerSubscription {
    /// Remaining lifetime.
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .lock()
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO)
    }

    /// Granted duration of the last subscribe/renew.
    pub fn granted(&self) -> Duration {
        *self.granted.lock()
    }

    fn apply_grant(&self, granted: Duration) {
        *self.granted.lock() = granted;
        *self.expires_at.lock() = Instant::now() + granted;
    }

    fn due_for_renew(&self, margin: Duration) -> bool {
        let granted = *self.granted.lock();
        let margin = margin.min(granted / 2);
        self.remaining() <= margin
    }
}

impl std::fmt::Debug for ConsumerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerSubscription")
            .field("event_sink_url", &self.event_sink_url)
            .field("filter", &self.filter.len())
            .finish()
    }
}

type GapCallback = Box<dyn Fn() + Send + Sync>;

struct ClientInner {
    soap: Arc<SoapClient>,
    /// Delivery endpoint handed to providers (the host's HTTP listener).
    notify_to: String,
    config: SdcConfig,
    subs: RwLock<Vec<Arc<ConsumerSubscription>>>,
    on_gap: RwLock<Option<GapCallback>>,
}

impl ClientInner {
    fn subscribe_on_wire(
        &self,
        event_sink_url: &str,
        filter: &[String],
        expires: Option<Duration>,
    ) -> Result<SubscribeResponseBody> {
        let filter_refs: Vec<&str> = filter.iter().map(String::as_str).collect();
        let request = SubscribeRequest::new(&self.notify_to, &filter_refs, expires);
        let response = self.soap.call(
            event_sink_url,
            HeaderInfo::for_action(actions::SUBSCRIBE),
            &request.encode(),
            false,
        )?;
        response
            .with_body(|body, _| body.map(|n| SubscribeResponseBody::decode(&n)))
            .ok_or_else(|| Error::UnexpectedResponse("empty SubscribeResponse".to_string()))?
            .map_err(Error::UnexpectedResponse)
    }

    fn renew_on_wire(&self, sub: &ConsumerSubscription) -> Result<Duration> {
        let manager_address = sub.manager_address.lock().clone();
        let header = HeaderInfo {
            action: actions::RENEW.to_string(),
            reference_parameters: sub.manager_ref_params.lock().clone(),
            ..HeaderInfo::default()
        };
        let response =
            self.soap
                .call(&manager_address, header, &wire::encode_renew(sub.granted()), true)?;
        response
            .with_body(|body, _| body.as_ref().and_then(wire::decode_expires))
            .ok_or_else(|| Error::UnexpectedResponse("RenewResponse without Expires".to_string()))
    }

    /// Renew one subscription, recovering from `UnknownSubscription` by
    /// resubscribing and reporting a gap.
    fn renew(&self, sub: &Arc<ConsumerSubscription>) -> Result<()> {
        match self.renew_on_wire(sub) {
            Ok(granted) => {
                sub.apply_grant(granted);
                log::debug!(
                    "[subscription-client] renewed {} for {}s",
                    sub.event_sink_url,
                    granted.as_secs()
                );
                Ok(())
            }
            Err(Error::Soap(fault)) if fault.is_unknown_subscription() => {
                log::warn!(
                    "[subscription-client] {} forgot us, resubscribing (gap)",
                    sub.event_sink_url
                );
                let response = self.subscribe_on_wire(
                    &sub.event_sink_url,
                    &sub.filter,
                    Some(sub.granted()),
                )?;
                *sub.manager_address.lock() = response.manager_address.clone();
                *sub.manager_ref_params.lock() = response.manager_ref_params.clone();
                sub.apply_grant(response.expires);
                if let Some(on_gap) = self.on_gap.read().as_ref() {
                    on_gap();
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn renew_due(&self) {
        let due: Vec<Arc<ConsumerSubscription>> = self
            .subs
            .read()
            .iter()
            .filter(|s| s.due_for_renew(self.config.renew_safety_margin))
            .cloned()
            .collect();
        for sub in due {
            if let Err(e) = self.renew(&sub) {
                log::warn!("[subscription-client] renew failed (will retry next tick): {}", e);
            }
        }
    }
}

/// Subscription client: operates N subscriptions against providers.
pub struct SubscriptionClient {
    inner: Arc<ClientInner>,
    stop: Arc<AtomicBool>,
    renewer: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionClient {
    pub fn new(soap: Arc<SoapClient>, notify_to: &str, config: SdcConfig) -> Self {
        let inner = Arc::new(ClientInner {
            soap,
            notify_to: notify_to.to_string(),
            config,
            subs: RwLock::new(Vec::new()),
            on_gap: RwLock::new(None),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        let stop_clone = Arc::clone(&stop);
        let renewer = thread::Builder::new()
            .name("rsdc-sub-renewer".to_string())
            .spawn(move || loop {
                if stop_clone.load(Ordering::Relaxed) {
                    break;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.renew_due();
                drop(inner);
                thread::sleep(Duration::from_millis(200));
            })
            .ok();
        Self {
            inner,
            stop,
            renewer: Mutex::new(renewer),
        }
    }

    /// Gap callback: fired after an unknown-subscription recovery so the
    /// report processor can refetch.
    pub fn on_gap(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_gap.write() = Some(Box::new(callback));
    }

    /// Establish one subscription.
    pub fn subscribe(
        &self,
        event_sink_url: &str,
        filter: &[&str],
        expires: Option<Duration>,
    ) -> Result<Arc<ConsumerSubscription>> {
        let filter: Vec<String> = filter.iter().map(|a| a.to_string()).collect();
        let response = self.inner.subscribe_on_wire(event_sink_url, &filter, expires)?;
        let sub = Arc::new(ConsumerSubscription {
            filter,
            event_sink_url: event_sink_url.to_string(),
            manager_address: Mutex::new(response.manager_address.clone()),
            manager_ref_params: Mutex::new(response.manager_ref_params.clone()),
            granted: Mutex::new(response.expires),
            expires_at: Mutex::new(Instant::now() + response.expires),
        });
        self.inner.subs.write().push(Arc::clone(&sub));
        log::info!(
            "[subscription-client] subscribed at {} ({} action(s), {}s)",
            event_sink_url,
            sub.filter.len(),
            response.expires.as_secs()
        );
        Ok(sub)
    }

    /// Explicit renew (auto-renew handles the periodic case).
    pub fn renew(&self, sub: &Arc<ConsumerSubscription>) -> Result<()> {
        self.inner.renew(sub)
    }

    /// Remaining lifetime as reported by the source.
    pub fn get_status(&self, sub: &Arc<ConsumerSubscription>) -> Result<Duration> {
        let manager_address = sub.manager_address.lock().clone();
        let header = HeaderInfo {
            action: actions::GET_STATUS.to_string(),
            reference_parameters: sub.manager_ref_params.lock().clone(),
            ..HeaderInfo::default()
        };
        let response = self.inner.soap.call(
            &manager_address,
            header,
            &wire::encode_empty("GetStatus"),
            true,
        )?;
        response
            .with_body(|body, _| body.as_ref().and_then(wire::decode_expires))
            .ok_or_else(|| {
                Error::UnexpectedResponse("GetStatusResponse without Expires".to_string())
            })
    }

    /// Unsubscribe everything (consumer teardown). Best effort.
    pub fn unsubscribe_all(&self) {
        let subs: Vec<Arc<ConsumerSubscription>> =
            std::mem::take(&mut *self.inner.subs.write());
        for sub in subs {
            let manager_address = sub.manager_address.lock().clone();
            let header = HeaderInfo {
                action: actions::UNSUBSCRIBE.to_string(),
                reference_parameters: sub.manager_ref_params.lock().clone(),
                ..HeaderInfo::default()
            };
            if let Err(e) = self.inner.soap.call(
                &manager_address,
                header,
                &wire::encode_empty("Unsubscribe"),
                false,
            ) {
                log::debug!("[subscription-client] unsubscribe failed (ignored): {}", e);
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.subs.read().len()
    }
}

impl Drop for SubscriptionClient {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.renewer.lock().take() {
            let _ = handle.join();
        }
    }
}
