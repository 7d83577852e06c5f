// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alert source polling.
//!
//! Hosts that derive alert conditions from external signals implement
//! [`AlertSource`]; the pump polls it and commits the returned state
//! changes as alert transactions. Hosts with their own scheduling can skip
//! this and use `begin_alert` directly.

use crate::biceps::{Handle, StateKind};
use crate::mdib::ProviderMdib;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Host-implemented source of alert state changes.
pub trait AlertSource: Send + Sync {
    /// Alert states that changed since the last poll, as
    /// `(descriptor_handle, new_state_kind)`. Only alert kinds are legal;
    /// anything else fails the commit and is logged. An empty result skips
    /// the tick.
    fn next_alert_states(&self) -> Vec<(Handle, StateKind)>;
}

/// Background pump committing alert transactions at a fixed poll period.
pub struct AlertPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlertPump {
    pub fn spawn(
        mdib: Arc<ProviderMdib>,
        source: Arc<dyn AlertSource>,
        period: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("rsdc-alert-pump".to_string())
            .spawn(move || pump_loop(&mdib, &source, period, &stop_clone))
            .ok();
        Self { stop, handle }
    }

    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AlertPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn pump_loop(
    mdib: &Arc<ProviderMdib>,
    source: &Arc<dyn AlertSource>,
    period: Duration,
    stop: &Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let changes = source.next_alert_states();
        if !changes.is_empty() {
            let mut tx = mdib.begin_alert();
            let mut staged_any = false;
            for (handle, kind) in changes {
                match tx.state_mut(&handle) {
                    Ok(state) => {
                        state.kind = kind;
                        staged_any = true;
                    }
                    Err(e) => log::warn!("[alert-pump] skipping {}: {}", handle, e),
                }
            }
            if staged_any {
                if let Err(e) = tx.commit() {
                    log::warn!("[alert-pump] commit failed: {}", e);
                }
            }
        }
        let sleep_end = Instant::now() + period;
        while Instant::now() < sleep_end {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(10).min(period));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::descriptor::{Descriptor, DescriptorKind};
    use parking_lot::Mutex;

    struct OneShotAlarm {
        fired: Mutex<bool>,
    }

    impl AlertSource for OneShotAlarm {
        fn next_alert_states(&self) -> Vec<(Handle, StateKind)> {
            let mut fired = self.fired.lock();
            if *fired {
                return Vec::new();
            }
            *fired = true;
            vec![(
                "alert.hi".to_string(),
                StateKind::AlertCondition {
                    activation: "On".to_string(),
                    presence: true,
                },
            )]
        }
    }

    #[test]
    fn test_alert_pump_commits_presence() {
        let mdib = Arc::new(ProviderMdib::new());
        let mut tx = mdib.begin_descriptor();
        tx.create(Descriptor::new("mds0", None, DescriptorKind::Mds)).expect("mds");
        tx.create(Descriptor::new("alerts", Some("mds0"), DescriptorKind::AlertSystem))
            .expect("alert system");
        tx.create(Descriptor::new(
            "alert.hi",
            Some("alerts"),
            DescriptorKind::AlertCondition {
                sources: vec!["mds0".to_string()],
                priority: "Hi".to_string(),
            },
        ))
        .expect("alert condition");
        tx.commit().expect("initial commit");

        let pump = AlertPump::spawn(
            Arc::clone(&mdib),
            Arc::new(OneShotAlarm {
                fired: Mutex::new(false),
            }),
            Duration::from_millis(10),
        );
        for _ in 0..100 {
            if matches!(
                mdib.read().state("alert.hi").map(|s| s.kind.clone()),
                Some(StateKind::AlertCondition { presence: true, .. })
            ) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        pump.shutdown();
        match &mdib.read().state("alert.hi").expect("state").kind {
            StateKind::AlertCondition { presence, .. } => assert!(presence),
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
