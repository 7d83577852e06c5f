// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waveform source pump.
//!
//! Pulls one sample bundle per tick from the host's [`WaveformSource`] and
//! commits it as a waveform transaction. The cadence is configurable and
//! not protocol-visible; the resulting reports ride the ordinary
//! `WaveformStream` action, flagged lossy in the fan-out.

use crate::biceps::state::SampleArrayValue;
use crate::biceps::Handle;
use crate::mdib::ProviderMdib;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Host-implemented source of real-time sample arrays.
pub trait WaveformSource: Send + Sync {
    /// Next bundle: one sample array per waveform handle. An empty bundle
    /// skips the tick.
    fn next_sample_bundle(&self) -> Vec<(Handle, SampleArrayValue)>;
}

/// Background pump committing waveform transactions at a fixed cadence.
pub struct WaveformPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WaveformPump {
    pub fn spawn(
        mdib: Arc<ProviderMdib>,
        source: Arc<dyn WaveformSource>,
        period: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("rsdc-waveform-pump".to_string())
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

impl Drop for WaveformPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn pump_loop(
    mdib: &Arc<ProviderMdib>,
    source: &Arc<dyn WaveformSource>,
    period: Duration,
    stop: &Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let bundle = source.next_sample_bundle();
        if !bundle.is_empty() {
            let mut tx = mdib.begin_waveform();
            for (handle, samples) in bundle {
                tx.set_samples(&handle, samples);
            }
            if let Err(e) = tx.commit() {
                // Recoverable (e.g. descriptor removed mid-flight): log and
                // keep pumping.
                log::warn!("[waveform-pump] commit failed: {}", e);
            }
        }
        // Chunked sleep for responsive shutdown.
        let sleep_end = Instant::now() + period;
        while Instant::now() < sleep_end {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            thread::sleep(Duration::from_millis(10).min(period));
        }
    }
}
