// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded per-subscription delivery queue.
//!
//! Single-lane FIFO: one producer side (the fan-out, called under the MDIB
//! commit lock) and one consumer (the lane worker thread). On overflow the
//! oldest waveform notification is sacrificed first; only when no waveform
//! is queued does the push fail, which terminates the subscription with
//! `DeliveryFailure` upstream.

use crate::biceps::MdibVersionGroup;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// One queued notification (body pre-encoded, envelope built by the lane).
#[derive(Debug, Clone)]
pub(crate) struct LaneItem {
    pub action: String,
    pub body: String,
    pub version_group: MdibVersionGroup,
    pub is_waveform: bool,
}

/// Push outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueResult {
    Queued,
    /// Queued, but the oldest waveform notification was dropped to make room.
    QueuedDroppedWaveform,
    /// Queue full of non-droppable traffic; subscription must be terminated.
    Overflow,
}

pub(crate) struct DeliveryQueue {
    inner: Mutex<VecDeque<LaneItem>>,
    cv: Condvar,
    cap: usize,
}

impl DeliveryQueue {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cv: Condvar::new(),
            cap,
        }
    }

    pub(crate) fn push(&self, item: LaneItem) -> EnqueueResult {
        let mut q = self.inner.lock();
        let mut dropped_waveform = false;
        if q.len() >= self.cap {
            match q.iter().position(|i| i.is_waveform) {
                Some(idx) => {
                    q.remove(idx);
                    dropped_waveform = true;
                }
                None => return EnqueueResult::Overflow,
            }
        }
        q.push_back(item);
        drop(q);
        self.cv.notify_one();
        if dropped_waveform {
            EnqueueResult::QueuedDroppedWaveform
        } else {
            EnqueueResult::Queued
        }
    }

    /// Blocking pop with timeout (lane worker heartbeat).
    pub(crate) fn pop(&self, timeout: Duration) -> Option<LaneItem> {
        let mut q = self.inner.lock();
        if q.is_empty() {
            self.cv.wait_for(&mut q, timeout);
        }
        q.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(action: &str, is_waveform: bool) -> LaneItem {
        LaneItem {
            action: action.to_string(),
            body: String::new(),
            version_group: MdibVersionGroup::new_random(),
            is_waveform,
        }
    }

    #[test]
    fn test_fifo_order() {
        let q = DeliveryQueue::new(4);
        for i in 0..3 {
            assert_eq!(q.push(item(&format!("a{}", i), false)), EnqueueResult::Queued);
        }
        for i in 0..3 {
            let got = q.pop(Duration::from_millis(1)).expect("item queued");
            assert_eq!(got.action, format!("a{}", i));
        }
    }

    #[test]
    fn test_overflow_drops_oldest_waveform_first() {
        let q = DeliveryQueue::new(3);
        q.push(item("wf0", true));
        q.push(item("m1", false));
        q.push(item("wf2", true));
        // Full; next push evicts wf0 (oldest waveform), not m1.
        assert_eq!(q.push(item("m3", false)), EnqueueResult::QueuedDroppedWaveform);
        let order: Vec<String> = std::iter::from_fn(|| q.pop(Duration::from_millis(1)))
            .map(|i| i.action)
            .collect();
        assert_eq!(order, vec!["m1", "wf2", "m3"]);
    }

    #[test]
    fn test_overflow_without_waveforms_refuses() {
        let q = DeliveryQueue::new(2);
        q.push(item("m0", false));
        q.push(item("m1", false));
        assert_eq!(q.push(item("m2", false)), EnqueueResult::Overflow);
        assert_eq!(q.len(), 2, "refused push leaves the queue intact");
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let q = DeliveryQueue::new(2);
        assert!(q.pop(Duration::from_millis(5)).is_none());
    }
}
