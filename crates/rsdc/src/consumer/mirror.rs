// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Consumer MDIB mirror and the report processor.
//!
//! The mirror is an [`Mdib`] fed exclusively by decoded reports; every apply
//! happens inside one critical section so observers always see per-report
//! consistent snapshots.
//!
//! The report processor enforces stream continuity:
//!
//! 1. bootstrap pins `(sequence_id, instance_id)` and the next expected
//!    `mdib_version` after a `GetMdib`,
//! 2. in-order reports apply immediately, replays are discarded,
//! 3. out-of-order reports wait in a bounded reorder buffer; when the hole
//!    is not filled within the reorder window (or the buffer overflows) gap
//!    recovery refetches the MDIB - except for waveform-only holes, which
//!    are skipped and counted (waveforms are lossy by contract, never
//!    re-requested).

use crate::biceps::reports::{DecodedMdib, Modification, ReportBody};
use crate::biceps::{Handle, MdibVersionGroup};
use crate::error::{Error, Result};
use crate::mdib::{Mdib, MdibSnapshot};
use crate::names::actions;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local MDIB mirror.
pub struct ConsumerMdib {
    mdib: Mdib,
}

impl ConsumerMdib {
    pub fn new() -> Self {
        Self { mdib: Mdib::empty() }
    }

    /// Current mirrored snapshot (lock-free).
    pub fn read(&self) -> Arc<MdibSnapshot> {
        self.mdib.read()
    }

    /// Replace the whole mirror from a `GetMdib` result.
    pub(crate) fn reset_from(
        &self,
        version_group: MdibVersionGroup,
        decoded: DecodedMdib,
    ) -> Result<()> {
        let mut descriptors = std::collections::HashMap::new();
        let mut desc_order = Vec::new();
        for d in decoded.descriptors {
            desc_order.push(d.handle.clone());
            descriptors.insert(d.handle.clone(), d);
        }
        let mut states = std::collections::HashMap::new();
        for s in decoded.states {
            states.insert(s.descriptor_handle.clone(), s);
        }
        let mut context_states = std::collections::HashMap::new();
        let mut ctx_order = Vec::new();
        for s in decoded.context_states {
            ctx_order.push(s.handle.clone());
            context_states.insert(s.handle.clone(), s);
        }
        let snapshot = MdibSnapshot::build(
            version_group,
            descriptors,
            states,
            context_states,
            desc_order,
            ctx_order,
        )?;
        let _guard = self.mdib.lock_commit();
        self.mdib.publish(snapshot);
        Ok(())
    }

    /// Apply one decoded report atomically.
    pub(crate) fn apply_report(
        &self,
        version_group: &MdibVersionGroup,
        body: &ReportBody,
    ) -> Result<()> {
        let _guard = self.mdib.lock_commit();
        let current = self.mdib.read();
        let mut descriptors = current.descriptors_table().clone();
        let mut states = current.states_table().clone();
        let mut context_states = current.context_states_table().clone();
        let mut desc_order = current.desc_order_vec().clone();
        let mut ctx_order = current.ctx_order_vec().clone();

        match body {
            ReportBody::Metrics(updated)
            | ReportBody::Alerts(updated)
            | ReportBody::Components(updated)
            | ReportBody::Operational(updated)
            | ReportBody::Waveform(updated) => {
                for state in updated {
                    if !descriptors.contains_key(&state.descriptor_handle) {
                        return Err(Error::UnknownHandle(state.descriptor_handle.clone()));
                    }
                    states.insert(state.descriptor_handle.clone(), state.clone());
                }
            }
            ReportBody::Contexts(updated) => {
                for state in updated {
                    if !descriptors.contains_key(&state.descriptor_handle) {
                        return Err(Error::UnknownHandle(state.descriptor_handle.clone()));
                    }
                    if !context_states.contains_key(&state.handle) {
                        ctx_order.push(state.handle.clone());
                    }
                    context_states.insert(state.handle.clone(), state.clone());
                }
            }
            ReportBody::Description(parts) => {
                for part in parts {
                    let handle = part.descriptor.handle.clone();
                    match part.modification {
                        Modification::Deleted => {
                            let mut doomed: HashSet<Handle> = HashSet::new();
                            let mut stack = vec![handle.clone()];
                            while let Some(h) = stack.pop() {
                                if doomed.insert(h.clone()) {
                                    stack.extend(current.children(&h).iter().cloned());
                                }
                            }
                            for h in &doomed {
                                descriptors.remove(h);
                                states.remove(h);
                            }
                            let doomed_ctx: Vec<Handle> = context_states
                                .values()
                                .filter(|cs| doomed.contains(&cs.descriptor_handle))
                                .map(|cs| cs.handle.clone())
                                .collect();
                            for h in &doomed_ctx {
                                context_states.remove(h);
                            }
                            ctx_order.retain(|h| !doomed_ctx.contains(h));
                            desc_order.retain(|h| !doomed.contains(h));
                        }
                        Modification::Created | Modification::Updated => {
                            if !descriptors.contains_key(&handle) {
                                desc_order.push(handle.clone());
                            }
                            descriptors.insert(handle.clone(), part.descriptor.clone());
                            for s in &part.states {
                                states.insert(s.descriptor_handle.clone(), s.clone());
                            }
                            for s in &part.context_states {
                                if !context_states.contains_key(&s.handle) {
                                    ctx_order.push(s.handle.clone());
                                }
                                context_states.insert(s.handle.clone(), s.clone());
                            }
                        }
                    }
                }
            }
            ReportBody::OperationInvoked(_) | ReportBody::SystemError(_) => {
                // Stateless reports never reach the mirror.
            }
        }

        let snapshot = MdibSnapshot::build(
            version_group.clone(),
            descriptors,
            states,
            context_states,
            desc_order,
            ctx_order,
        )?;
        self.mdib.publish(snapshot);
        Ok(())
    }
}

impl Default for ConsumerMdib {
    fn default() -> Self {
        Self::new()
    }
}

/// One decoded notification entering the processor.
#[derive(Debug, Clone)]
pub struct IncomingReport {
    pub action: String,
    pub version_group: MdibVersionGroup,
    pub body: ReportBody,
}

impl IncomingReport {
    fn is_waveform(&self) -> bool {
        self.action == actions::WAVEFORM_STREAM
    }
}

/// Stream statistics surfaced to the host.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub applied: AtomicU64,
    pub discarded_stale: AtomicU64,
    pub waveform_dropped: AtomicU64,
    pub refetches: AtomicU64,
}

impl StreamStats {
    /// (applied, discarded_stale, waveform_dropped, refetches)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.applied.load(Ordering::Relaxed),
            self.discarded_stale.load(Ordering::Relaxed),
            self.waveform_dropped.load(Ordering::Relaxed),
            self.refetches.load(Ordering::Relaxed),
        )
    }
}

struct ProcessorState {
    /// `(sequence_id, instance_id)` pinned at bootstrap.
    bootstrap: Option<(String, Option<u64>)>,
    /// Next expected mdib version; 0 while not bootstrapped.
    expected: u64,
    /// Out-of-order buffer keyed by mdib version.
    pending: BTreeMap<u64, (Instant, IncomingReport)>,
    /// True while a refetch is in flight; arrivals are dropped.
    recovering: bool,
}

type Observer = Box<dyn Fn(&IncomingReport) + Send + Sync>;
type RefetchFn = Box<dyn Fn() + Send + Sync>;

/// Continuity-enforcing report processor.
pub struct ReportProcessor {
    mirror: Arc<ConsumerMdib>,
    state: Mutex<ProcessorState>,
    reorder_window: Duration,
    reorder_depth: usize,
    refetch: RwLock<Option<RefetchFn>>,
    pre_apply: RwLock<Vec<Observer>>,
    post_apply: RwLock<Vec<Observer>>,
    stats: StreamStats,
}

impl ReportProcessor {
    pub fn new(mirror: Arc<ConsumerMdib>, reorder_window: Duration, reorder_depth: usize) -> Self {
        Self {
            mirror,
            state: Mutex::new(ProcessorState {
                bootstrap: None,
                expected: 0,
                pending: BTreeMap::new(),
                recovering: false,
            }),
            reorder_window,
            reorder_depth,
            refetch: RwLock::new(None),
            pre_apply: RwLock::new(Vec::new()),
            post_apply: RwLock::new(Vec::new()),
            stats: StreamStats::default(),
        }
    }

    /// Install the gap-recovery action (a `GetMdib` refetch).
    pub fn set_refetch(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.refetch.write() = Some(Box::new(f));
    }

    /// Called before a report is applied to the mirror.
    pub fn on_before_apply(&self, f: impl Fn(&IncomingReport) + Send + Sync + 'static) {
        self.pre_apply.write().push(Box::new(f));
    }

    /// Called after a report has been applied to the mirror.
    pub fn on_applied(&self, f: impl Fn(&IncomingReport) + Send + Sync + 'static) {
        self.post_apply.write().push(Box::new(f));
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// (Re)start the stream after a `GetMdib`: pin the continuity ids and
    /// the next expected version, drain buffered notifications that are
    /// already usable.
    pub fn bootstrap(&self, version_group: &MdibVersionGroup) {
        let mut to_apply = Vec::new();
        {
            let mut state = self.state.lock();
            state.bootstrap = Some((
                version_group.sequence_id.clone(),
                version_group.instance_id,
            ));
            state.expected = version_group.mdib_version + 1;
            state.recovering = false;
            // Buffered pre-bootstrap notifications: apply the usable tail.
            let pending = std::mem::take(&mut state.pending);
            for (version, (_, report)) in pending {
                if report.version_group.sequence_id != version_group.sequence_id {
                    continue;
                }
                if version == state.expected {
                    state.expected += 1;
                    to_apply.push(report);
                } else if version > state.expected {
                    state.pending.insert(version, (Instant::now(), report));
                }
            }
        }
        for report in to_apply {
            self.apply(&report);
        }
        log::info!(
            "[report-processor] bootstrapped at version {} (sequence {})",
            version_group.mdib_version,
            version_group.sequence_id
        );
    }

    /// Feed one notification.
    pub fn on_report(&self, report: IncomingReport) {
        let mut recovery = false;
        let mut to_apply: Vec<IncomingReport> = Vec::new();
        {
            let mut state = self.state.lock();
            if state.recovering {
                return;
            }
            let Some((sequence_id, instance_id)) = state.bootstrap.clone() else {
                // Not bootstrapped yet: hold on to it (bounded).
                let version = report.version_group.mdib_version;
                if state.pending.len() < self.reorder_depth {
                    state.pending.insert(version, (Instant::now(), report));
                }
                return;
            };
            // Provider restart: sequence or instance changed.
            if report.version_group.sequence_id != sequence_id
                || report.version_group.instance_id != instance_id
            {
                log::warn!(
                    "[report-processor] sequence/instance changed ({} -> {}), resynchronizing",
                    sequence_id,
                    report.version_group.sequence_id
                );
                recovery = true;
            } else {
                let version = report.version_group.mdib_version;
                if version < state.expected {
                    // Replay or stale: applying twice must be a no-op.
                    self.stats.discarded_stale.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "[report-processor] discarding stale version {} (expected {})",
                        version,
                        state.expected
                    );
                } else if version == state.expected {
                    state.expected += 1;
                    to_apply.push(report);
                    // The hole may have been plugging the buffer.
                    while let Some(entry) = {
                        let expected = state.expected;
                        state.pending.remove(&expected)
                    } {
                        state.expected += 1;
                        to_apply.push(entry.1);
                    }
                } else {
                    state.pending.insert(version, (Instant::now(), report));
                    if state.pending.len() > self.reorder_depth {
                        recovery = !self.try_skip_waveform_hole(&mut state, &mut to_apply);
                    }
                }
            }
            if recovery {
                self.enter_recovery(&mut state);
            } else {
                // Re-check the reorder window opportunistically.
                recovery = self.check_window(&mut state, &mut to_apply);
            }
        }
        for report in &to_apply {
            self.apply(report);
        }
        if recovery {
            self.run_refetch();
        }
    }

    /// Periodic housekeeping: reorder-window expiry without new arrivals.
    pub fn tick(&self) {
        let mut to_apply = Vec::new();
        let recovery = {
            let mut state = self.state.lock();
            if state.recovering || state.bootstrap.is_none() {
                false
            } else {
                self.check_window(&mut state, &mut to_apply)
            }
        };
        for report in &to_apply {
            self.apply(report);
        }
        if recovery {
            self.run_refetch();
        }
    }

    /// Window check; returns true when gap recovery is required. May push
    /// reports to apply when a waveform hole was skipped.
    fn check_window(
        &self,
        state: &mut ProcessorState,
        to_apply: &mut Vec<IncomingReport>,
    ) -> bool {
        let Some((oldest_version, arrived)) =
            state.pending.iter().next().map(|(v, e)| (*v, e.0))
        else {
            return false;
        };
        if arrived.elapsed() < self.reorder_window {
            return false;
        }
        log::warn!(
            "[report-processor] version {} missing beyond reorder window (expected {})",
            state.expected,
            oldest_version
        );
        if self.try_skip_waveform_hole(state, to_apply) {
            false
        } else {
            self.enter_recovery(state);
            true
        }
    }

    /// A hole directly followed by nothing but waveform reports is a lossy
    /// waveform drop, not a gap: advance past it, count the loss, and drain
    /// what is now in order.
    fn try_skip_waveform_hole(
        &self,
        state: &mut ProcessorState,
        to_apply: &mut Vec<IncomingReport>,
    ) -> bool {
        if !state.pending.values().all(|(_, r)| r.is_waveform()) {
            return false;
        }
        let Some(lowest) = state.pending.keys().next().copied() else {
            return false;
        };
        let skipped = lowest - state.expected;
        self.stats
            .waveform_dropped
            .fetch_add(skipped, Ordering::Relaxed);
        log::debug!(
            "[report-processor] skipping {} dropped waveform version(s)",
            skipped
        );
        state.expected = lowest;
        while let Some(entry) = state.pending.remove(&state.expected) {
            state.expected += 1;
            to_apply.push(entry.1);
        }
        true
    }

    fn enter_recovery(&self, state: &mut ProcessorState) {
        state.recovering = true;
        state.pending.clear();
        self.stats.refetches.fetch_add(1, Ordering::Relaxed);
    }

    fn run_refetch(&self) {
        log::info!("[report-processor] gap detected, refetching MDIB");
        if let Some(refetch) = self.refetch.read().as_ref() {
            refetch();
        }
    }

    fn apply(&self, report: &IncomingReport) {
        for observer in self.pre_apply.read().iter() {
            observer(report);
        }
        match self.mirror.apply_report(&report.version_group, &report.body) {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                for observer in self.post_apply.read().iter() {
                    observer(report);
                }
            }
            Err(e) => {
                log::warn!("[report-processor] apply failed ({}), resynchronizing", e);
                {
                    let mut state = self.state.lock();
                    self.enter_recovery(&mut state);
                }
                self.run_refetch();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::descriptor::{Descriptor, DescriptorKind, MetricCommon};
    use crate::biceps::state::{MetricValue, State, StateKind};
    use crate::xml::Decimal;
    use std::sync::atomic::AtomicU64;

    fn base_mdib() -> DecodedMdib {
        let mut decoded = DecodedMdib::default();
        decoded.descriptors.push(Descriptor::new("mds0", None, DescriptorKind::Mds));
        decoded
            .descriptors
            .push(Descriptor::new("vmd0", Some("mds0"), DescriptorKind::Vmd));
        decoded
            .descriptors
            .push(Descriptor::new("chan0", Some("vmd0"), DescriptorKind::Channel));
        decoded.descriptors.push(Descriptor::new(
            "hr.num",
            Some("chan0"),
            DescriptorKind::NumericMetric {
                common: MetricCommon::measurement("264864"),
                resolution: Decimal::from(1.0),
            },
        ));
        for handle in ["mds0", "vmd0", "chan0", "hr.num"] {
            let kind = StateKind::default_for(
                &decoded
                    .descriptors
                    .iter()
                    .find(|d| d.handle == handle)
                    .expect("descriptor")
                    .kind,
            )
            .expect("single state kind");
            decoded.states.push(State::new(handle, kind));
        }
        decoded
    }

    fn vg(version: u64) -> MdibVersionGroup {
        MdibVersionGroup {
            mdib_version: version,
            sequence_id: "urn:uuid:seq-1".to_string(),
            instance_id: None,
        }
    }

    fn metric_report(version: u64, value: f64) -> IncomingReport {
        let mut state = State::new("hr.num", StateKind::NumericMetric { value: None });
        state.version = version;
        state.kind = StateKind::NumericMetric {
            value: Some(MetricValue::numeric(value, version)),
        };
        IncomingReport {
            action: actions::EPISODIC_METRIC_REPORT.to_string(),
            version_group: vg(version),
            body: ReportBody::Metrics(vec![state]),
        }
    }

    fn waveform_report(version: u64) -> IncomingReport {
        IncomingReport {
            action: actions::WAVEFORM_STREAM.to_string(),
            version_group: vg(version),
            body: ReportBody::Waveform(Vec::new()),
        }
    }

    fn rig(window_ms: u64) -> (Arc<ConsumerMdib>, Arc<ReportProcessor>, Arc<AtomicU64>) {
        let mirror = Arc::new(ConsumerMdib::new());
        mirror.reset_from(vg(10), base_mdib()).expect("valid initial mdib");
        let processor = Arc::new(ReportProcessor::new(
            Arc::clone(&mirror),
            Duration::from_millis(window_ms),
            5,
        ));
        let refetches = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&refetches);
        processor.set_refetch(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        processor.bootstrap(&vg(10));
        (mirror, processor, refetches)
    }

    fn metric_value(mirror: &ConsumerMdib) -> Option<f64> {
        match &mirror.read().state("hr.num")?.kind {
            StateKind::NumericMetric { value: Some(v) } => v.value.as_ref().map(|d| d.as_f64()),
            _ => None,
        }
    }

    #[test]
    fn test_in_order_apply() {
        let (mirror, processor, refetches) = rig(50);
        processor.on_report(metric_report(11, 72.0));
        processor.on_report(metric_report(12, 73.0));
        assert_eq!(metric_value(&mirror), Some(73.0));
        assert_eq!(mirror.read().mdib_version(), 12);
        assert_eq!(refetches.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_replay_is_noop() {
        let (mirror, processor, _) = rig(50);
        processor.on_report(metric_report(11, 72.0));
        processor.on_report(metric_report(11, 99.0));
        assert_eq!(metric_value(&mirror), Some(72.0), "replay must not change the mirror");
        let (_, stale, _, _) = processor.stats().snapshot();
        assert_eq!(stale, 1);
    }

    #[test]
    fn test_reorder_buffer_fills_hole() {
        let (mirror, processor, refetches) = rig(1000);
        processor.on_report(metric_report(12, 73.0)); // hole at 11
        assert_eq!(metric_value(&mirror), None, "12 held back until 11 arrives");
        processor.on_report(metric_report(11, 72.0));
        assert_eq!(metric_value(&mirror), Some(73.0), "both applied in order");
        assert_eq!(mirror.read().mdib_version(), 12);
        assert_eq!(refetches.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_gap_beyond_window_triggers_exactly_one_refetch() {
        let (_mirror, processor, refetches) = rig(20);
        processor.on_report(metric_report(12, 73.0)); // hole at 11, never filled
        std::thread::sleep(Duration::from_millis(40));
        processor.tick();
        assert_eq!(refetches.load(Ordering::Relaxed), 1);
        // Further traffic while recovering is dropped, no second refetch.
        processor.on_report(metric_report(13, 74.0));
        processor.tick();
        assert_eq!(refetches.load(Ordering::Relaxed), 1, "exactly one GetMdib refetch");
    }

    #[test]
    fn test_sequence_change_triggers_recovery() {
        let (_mirror, processor, refetches) = rig(1000);
        let mut report = metric_report(11, 72.0);
        report.version_group.sequence_id = "urn:uuid:other-sequence".to_string();
        processor.on_report(report);
        assert_eq!(refetches.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_waveform_hole_skipped_without_refetch() {
        let (mirror, processor, refetches) = rig(20);
        // Version 11 (a waveform) was dropped by the provider lane; 12 and
        // 13 are waveforms that did arrive.
        processor.on_report(waveform_report(12));
        processor.on_report(waveform_report(13));
        std::thread::sleep(Duration::from_millis(40));
        processor.tick();
        assert_eq!(refetches.load(Ordering::Relaxed), 0, "waveform losses are not re-requested");
        let (_, _, dropped, _) = processor.stats().snapshot();
        assert_eq!(dropped, 1, "one dropped waveform version counted");
        assert_eq!(mirror.read().mdib_version(), 13);
    }

    #[test]
    fn test_bootstrap_drains_buffered_notifications() {
        let mirror = Arc::new(ConsumerMdib::new());
        let processor = ReportProcessor::new(Arc::clone(&mirror), Duration::from_millis(50), 5);
        // Notifications arrive before the GetMdib result (S2 ordering).
        processor.on_report(metric_report(11, 72.0));
        processor.on_report(metric_report(9, 60.0)); // older than the snapshot will be
        mirror.reset_from(vg(10), base_mdib()).expect("valid initial mdib");
        processor.bootstrap(&vg(10));
        assert_eq!(metric_value(&mirror), Some(72.0), "buffered 11 applied after bootstrap");
        assert_eq!(mirror.read().mdib_version(), 11);
    }

    #[test]
    fn test_post_apply_observer_sees_report() {
        let (_mirror, processor, _) = rig(50);
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = Arc::clone(&seen);
        processor.on_applied(move |report| {
            seen_clone.store(report.version_group.mdib_version, Ordering::Relaxed);
        });
        processor.on_report(metric_report(11, 72.0));
        assert_eq!(seen.load(Ordering::Relaxed), 11);
    }
}
