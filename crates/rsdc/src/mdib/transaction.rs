// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction manager: the only write path into a provider MDIB.
//!
//! Each transaction stages clone-on-first-touch proxies of the entities the
//! caller touches. `commit()` runs under the MDIB commit lock (the single
//! serialization point): it re-validates against the current committed
//! snapshot, bumps `mdib_version` by one, bumps the versions of touched
//! entities, rebuilds derived indices, swaps the snapshot, and emits the
//! typed change-set to the registered listeners - all before the lock is
//! released, so emission order equals commit order.
//!
//! Validation failure is atomic rollback: the staged clones are dropped and
//! nothing observable happened.

use super::changeset::ChangeSet;
use super::{Mdib, MdibSnapshot};
use crate::biceps::reports::{DescriptionPart, Modification};
use crate::biceps::state::SampleArrayValue;
use crate::biceps::{
    ContextAssociation, ContextState, Descriptor, Handle, MdibVersionGroup, State, StateKind,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Transaction families. One family per change-set bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Descriptor,
    Metric,
    Alert,
    Component,
    Operational,
    Context,
    Waveform,
}

/// Which state-transaction family a state kind belongs to.
fn family_of(kind: &StateKind) -> Option<TransactionKind> {
    Some(match kind {
        StateKind::NumericMetric { .. }
        | StateKind::StringMetric { .. }
        | StateKind::EnumStringMetric { .. } => TransactionKind::Metric,
        StateKind::RealTimeSampleArrayMetric { .. } => TransactionKind::Waveform,
        StateKind::AlertSystem { .. }
        | StateKind::AlertCondition { .. }
        | StateKind::AlertSignal { .. } => TransactionKind::Alert,
        StateKind::Component { .. } | StateKind::SystemContext | StateKind::Sco => {
            TransactionKind::Component
        }
        StateKind::Operation { .. } => TransactionKind::Operational,
    })
}

type ChangeListener = Box<dyn Fn(&ChangeSet) + Send + Sync>;

/// Provider-side MDIB access: read snapshots, begin transactions, observe
/// committed change-sets.
pub struct ProviderMdib {
    mdib: Arc<Mdib>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl ProviderMdib {
    /// Empty MDIB with a fresh sequence id.
    pub fn new() -> Self {
        Self {
            mdib: Arc::new(Mdib::empty()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Start from pre-built tables (initial construction path).
    pub fn from_snapshot(snapshot: MdibSnapshot) -> Self {
        Self {
            mdib: Arc::new(Mdib::new(snapshot)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current committed snapshot (lock-free).
    pub fn read(&self) -> Arc<MdibSnapshot> {
        self.mdib.read()
    }

    /// Register a change-set listener. Listeners run synchronously under
    /// the commit lock, in registration order.
    pub fn on_change(&self, listener: impl Fn(&ChangeSet) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Begin a transaction of the given state family.
    pub fn begin_metric(&self) -> StateTransaction<'_> {
        StateTransaction::new(self, TransactionKind::Metric)
    }

    pub fn begin_alert(&self) -> StateTransaction<'_> {
        StateTransaction::new(self, TransactionKind::Alert)
    }

    pub fn begin_component(&self) -> StateTransaction<'_> {
        StateTransaction::new(self, TransactionKind::Component)
    }

    pub fn begin_operational(&self) -> StateTransaction<'_> {
        StateTransaction::new(self, TransactionKind::Operational)
    }

    pub fn begin_context(&self) -> ContextTransaction<'_> {
        ContextTransaction {
            owner: self,
            staged: HashMap::new(),
            touch_order: Vec::new(),
        }
    }

    pub fn begin_waveform(&self) -> WaveformTransaction<'_> {
        WaveformTransaction {
            owner: self,
            staged: Vec::new(),
        }
    }

    pub fn begin_descriptor(&self) -> DescriptorTransaction<'_> {
        DescriptorTransaction {
            owner: self,
            created: Vec::new(),
            created_states: HashMap::new(),
            updated: HashMap::new(),
            deleted: Vec::new(),
        }
    }

    fn emit(&self, change_set: &ChangeSet) {
        for listener in self.listeners.read().iter() {
            listener(change_set);
        }
    }

    /// Shared commit tail: build, validate, publish, emit. Caller passes a
    /// closure that applies its staged edits to the cloned tables and
    /// returns the change-set for the new version group.
    fn commit_with<F>(&self, apply: F) -> Result<MdibVersionGroup>
    where
        F: FnOnce(
            &MdibSnapshot,
            &MdibVersionGroup,
            &mut HashMap<Handle, Descriptor>,
            &mut HashMap<Handle, State>,
            &mut HashMap<Handle, ContextState>,
            &mut Vec<Handle>,
            &mut Vec<Handle>,
        ) -> Result<ChangeSet>,
    {
        let _guard = self.mdib.lock_commit();
        let current = self.mdib.read();

        let version_group = MdibVersionGroup {
            mdib_version: current.mdib_version() + 1,
            sequence_id: current.version_group().sequence_id.clone(),
            instance_id: current.version_group().instance_id,
        };

        let mut descriptors = current.descriptors_table().clone();
        let mut states = current.states_table().clone();
        let mut context_states = current.context_states_table().clone();
        let mut desc_order = current.desc_order_vec().clone();
        let mut ctx_order = current.ctx_order_vec().clone();

        let change_set = apply(
            &current,
            &version_group,
            &mut descriptors,
            &mut states,
            &mut context_states,
            &mut desc_order,
            &mut ctx_order,
        )?;

        let snapshot = MdibSnapshot::build(
            version_group.clone(),
            descriptors,
            states,
            context_states,
            desc_order,
            ctx_order,
        )?;

        self.mdib.publish(snapshot);
        log::debug!(
            "[mdib] committed version {} ({:?})",
            version_group.mdib_version,
            change_set.action()
        );
        self.emit(&change_set);
        Ok(version_group)
    }
}

impl Default for ProviderMdib {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProviderMdib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMdib").field("mdib", &self.mdib).finish()
    }
}

/// Transaction over single-states of one family (metric, alert, component,
/// operational).
pub struct StateTransaction<'a> {
    owner: &'a ProviderMdib,
    kind: TransactionKind,
    staged: HashMap<Handle, State>,
    touch_order: Vec<Handle>,
}

impl<'a> StateTransaction<'a> {
    fn new(owner: &'a ProviderMdib, kind: TransactionKind) -> Self {
        Self {
            owner,
            kind,
            staged: HashMap::new(),
            touch_order: Vec::new(),
        }
    }

    /// Mutable proxy for one state, cloned from the committed MDIB on first
    /// touch. The clone's preserved source form is invalidated right away:
    /// asking for a mutable proxy IS the typed mutation.
    pub fn state_mut(&mut self, handle: &str) -> Result<&mut State> {
        if !self.staged.contains_key(handle) {
            let snapshot = self.owner.read();
            let committed = snapshot
                .state(handle)
                .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
            if family_of(&committed.kind) != Some(self.kind) {
                return Err(Error::InvalidState(format!(
                    "state {} does not belong to a {:?} transaction",
                    handle, self.kind
                )));
            }
            let mut clone = committed.clone();
            clone.invalidate_source();
            self.staged.insert(handle.to_string(), clone);
            self.touch_order.push(handle.to_string());
        }
        Ok(self.staged.get_mut(handle).expect("staged above"))
    }

    /// True when nothing has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Validate and commit. Consumes the transaction; on error nothing is
    /// published and no listener runs.
    pub fn commit(self) -> Result<MdibVersionGroup> {
        if self.staged.is_empty() {
            return Err(Error::InvalidState("empty transaction".to_string()));
        }
        let kind = self.kind;
        let staged = self.staged;
        let touch_order = self.touch_order;
        self.owner.commit_with(move |current, vg, _descriptors, states, _ctx, _do, _co| {
            let mut changed = Vec::with_capacity(staged.len());
            for handle in &touch_order {
                let mut state = staged.get(handle).expect("touched handle staged").clone();
                let committed = current
                    .state(handle)
                    .ok_or_else(|| Error::UnknownHandle(handle.clone()))?;
                let descriptor = current
                    .descriptor(handle)
                    .ok_or_else(|| Error::UnknownHandle(handle.clone()))?;
                state.version = committed.version + 1;
                state.descriptor_version = descriptor.version;
                states.insert(handle.clone(), state.clone());
                changed.push(state);
            }
            Ok(match kind {
                TransactionKind::Metric => ChangeSet::Metrics {
                    version_group: vg.clone(),
                    states: changed,
                },
                TransactionKind::Alert => ChangeSet::Alerts {
                    version_group: vg.clone(),
                    states: changed,
                },
                TransactionKind::Component => ChangeSet::Components {
                    version_group: vg.clone(),
                    states: changed,
                },
                TransactionKind::Operational => ChangeSet::Operational {
                    version_group: vg.clone(),
                    states: changed,
                },
                _ => unreachable!("StateTransaction only covers state families"),
            })
        })
    }
}

/// Transaction over context states (multi-instance).
pub struct ContextTransaction<'a> {
    owner: &'a ProviderMdib,
    staged: HashMap<Handle, ContextState>,
    touch_order: Vec<Handle>,
}

impl ContextTransaction<'_> {
    /// Mutable proxy for an existing context state (by its own handle).
    pub fn context_state_mut(&mut self, state_handle: &str) -> Result<&mut ContextState> {
        if !self.staged.contains_key(state_handle) {
            let snapshot = self.owner.read();
            let committed = snapshot
                .context_state(state_handle)
                .ok_or_else(|| Error::UnknownHandle(state_handle.to_string()))?;
            let mut clone = committed.clone();
            clone.invalidate_source();
            self.staged.insert(state_handle.to_string(), clone);
            self.touch_order.push(state_handle.to_string());
        }
        Ok(self.staged.get_mut(state_handle).expect("staged above"))
    }

    /// Stage a new context state. The handle must be unused.
    pub fn create_context_state(&mut self, state: ContextState) -> Result<&mut ContextState> {
        let snapshot = self.owner.read();
        if snapshot.context_state(&state.handle).is_some()
            || self.staged.contains_key(&state.handle)
        {
            return Err(Error::Consistency(format!(
                "context state handle {} already in use",
                state.handle
            )));
        }
        let descriptor = snapshot
            .descriptor(&state.descriptor_handle)
            .ok_or_else(|| Error::UnknownHandle(state.descriptor_handle.clone()))?;
        if !state.kind.matches_descriptor(&descriptor.kind) {
            return Err(Error::Consistency(format!(
                "context state {} does not match descriptor {}",
                state.handle, state.descriptor_handle
            )));
        }
        let handle = state.handle.clone();
        self.staged.insert(handle.clone(), state);
        self.touch_order.push(handle.clone());
        Ok(self.staged.get_mut(&handle).expect("staged above"))
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Commit. Handles binding/unbinding version stamping and the singleton
    /// association rule: associating a patient/location context
    /// auto-disassociates the previously associated state of the same
    /// descriptor.
    pub fn commit(self) -> Result<MdibVersionGroup> {
        if self.staged.is_empty() {
            return Err(Error::InvalidState("empty transaction".to_string()));
        }
        let staged = self.staged;
        let touch_order = self.touch_order;
        self.owner.commit_with(move |current, vg, _descriptors, _states, context_states, _do, ctx_order| {
            let mut changed: Vec<ContextState> = Vec::new();
            for handle in &touch_order {
                let mut state = staged.get(handle).expect("touched handle staged").clone();
                let committed = current.context_state(handle);
                let was_assoc = committed
                    .map(|c| c.association == ContextAssociation::Assoc)
                    .unwrap_or(false);
                let descriptor = current
                    .descriptor(&state.descriptor_handle)
                    .ok_or_else(|| Error::UnknownHandle(state.descriptor_handle.clone()))?;

                state.version = committed.map(|c| c.version + 1).unwrap_or(0);
                state.descriptor_version = descriptor.version;

                let becomes_assoc =
                    state.association == ContextAssociation::Assoc && !was_assoc;
                if becomes_assoc {
                    state.binding_mdib_version = Some(vg.mdib_version);
                    // Singleton rule: push the previous association out.
                    if state.kind.requires_singleton_association() {
                        let others: Vec<Handle> = current
                            .context_states_of(&state.descriptor_handle)
                            .iter()
                            .filter(|other| {
                                other.handle != *handle
                                    && other.association == ContextAssociation::Assoc
                                    && !staged.contains_key(&other.handle)
                            })
                            .map(|other| other.handle.clone())
                            .collect();
                        for other_handle in others {
                            if let Some(other) = context_states.get_mut(&other_handle) {
                                other.invalidate_source();
                                other.association = ContextAssociation::Dis;
                                other.unbinding_mdib_version = Some(vg.mdib_version);
                                other.version += 1;
                                changed.push(other.clone());
                            }
                        }
                    }
                }
                if was_assoc && state.association != ContextAssociation::Assoc {
                    state.unbinding_mdib_version = Some(vg.mdib_version);
                }

                if committed.is_none() {
                    ctx_order.push(handle.clone());
                }
                context_states.insert(handle.clone(), state.clone());
                changed.push(state);
            }
            Ok(ChangeSet::Contexts {
                version_group: vg.clone(),
                states: changed,
            })
        })
    }
}

/// Transaction bundling one real-time sample array per waveform handle.
pub struct WaveformTransaction<'a> {
    owner: &'a ProviderMdib,
    staged: Vec<(Handle, SampleArrayValue)>,
}

impl WaveformTransaction<'_> {
    /// Stage a sample array for one waveform descriptor.
    pub fn set_samples(&mut self, handle: &str, samples: SampleArrayValue) {
        self.staged.push((handle.to_string(), samples));
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn commit(self) -> Result<MdibVersionGroup> {
        if self.staged.is_empty() {
            return Err(Error::InvalidState("empty transaction".to_string()));
        }
        let staged = self.staged;
        self.owner.commit_with(move |current, vg, _descriptors, states, _ctx, _do, _co| {
            let mut changed = Vec::with_capacity(staged.len());
            for (handle, samples) in staged {
                let committed = current
                    .state(&handle)
                    .ok_or_else(|| Error::UnknownHandle(handle.clone()))?;
                let StateKind::RealTimeSampleArrayMetric { .. } = &committed.kind else {
                    return Err(Error::InvalidState(format!(
                        "{} is not a waveform state",
                        handle
                    )));
                };
                let descriptor = current
                    .descriptor(&handle)
                    .ok_or_else(|| Error::UnknownHandle(handle.clone()))?;
                let mut state = committed.clone();
                state.invalidate_source();
                state.kind = StateKind::RealTimeSampleArrayMetric {
                    samples: Some(samples),
                };
                state.version = committed.version + 1;
                state.descriptor_version = descriptor.version;
                states.insert(handle.clone(), state.clone());
                changed.push(state);
            }
            Ok(ChangeSet::Waveforms {
                version_group: vg.clone(),
                states: changed,
            })
        })
    }
}

/// Transaction over the descriptor tree: create, update, delete.
pub struct DescriptorTransaction<'a> {
    owner: &'a ProviderMdib,
    /// Creation order matters for the children index.
    created: Vec<Descriptor>,
    /// Explicit initial states for created descriptors.
    created_states: HashMap<Handle, State>,
    updated: HashMap<Handle, Descriptor>,
    deleted: Vec<Handle>,
}

impl DescriptorTransaction<'_> {
    /// Stage a descriptor creation. Single-state descriptors get a default
    /// state unless [`set_initial_state`](Self::set_initial_state) provides
    /// one.
    pub fn create(&mut self, descriptor: Descriptor) -> Result<()> {
        let snapshot = self.owner.read();
        let handle = &descriptor.handle;
        if snapshot.descriptor(handle).is_some()
            || self.created.iter().any(|d| &d.handle == handle)
        {
            return Err(Error::Consistency(format!("duplicate handle {}", handle)));
        }
        if let Some(parent) = &descriptor.parent {
            let parent_known = snapshot.descriptor(parent).is_some()
                || self.created.iter().any(|d| &d.handle == parent);
            if !parent_known {
                return Err(Error::UnknownHandle(parent.clone()));
            }
        }
        self.created.push(descriptor);
        Ok(())
    }

    /// Provide the initial state of a created descriptor.
    pub fn set_initial_state(&mut self, state: State) {
        self.created_states.insert(state.descriptor_handle.clone(), state);
    }

    /// Mutable proxy for an existing descriptor.
    pub fn descriptor_mut(&mut self, handle: &str) -> Result<&mut Descriptor> {
        if !self.updated.contains_key(handle) {
            let snapshot = self.owner.read();
            let committed = snapshot
                .descriptor(handle)
                .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
            let mut clone = committed.clone();
            clone.invalidate_source();
            self.updated.insert(handle.to_string(), clone);
        }
        Ok(self.updated.get_mut(handle).expect("staged above"))
    }

    /// Stage a deletion. Children and attached states are cascade-deleted
    /// at commit.
    pub fn delete(&mut self, handle: &str) -> Result<()> {
        if self.owner.read().descriptor(handle).is_none() {
            return Err(Error::UnknownHandle(handle.to_string()));
        }
        self.deleted.push(handle.to_string());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn commit(self) -> Result<MdibVersionGroup> {
        if self.is_empty() {
            return Err(Error::InvalidState("empty transaction".to_string()));
        }
        let created = self.created;
        let mut created_states = self.created_states;
        let updated = self.updated;
        let deleted = self.deleted;
        self.owner.commit_with(move |current, vg, descriptors, states, context_states, desc_order, ctx_order| {
            let mut parts: Vec<DescriptionPart> = Vec::new();

            // Deletions first: collect each subtree from the committed tree.
            let mut doomed: HashSet<Handle> = HashSet::new();
            for root in &deleted {
                let mut stack = vec![root.clone()];
                while let Some(handle) = stack.pop() {
                    if doomed.insert(handle.clone()) {
                        stack.extend(current.children(&handle).iter().cloned());
                    }
                }
            }
            for handle in &doomed {
                if let Some(descriptor) = descriptors.remove(handle) {
                    states.remove(handle);
                    let ctx_handles: Vec<Handle> = context_states
                        .values()
                        .filter(|cs| &cs.descriptor_handle == handle)
                        .map(|cs| cs.handle.clone())
                        .collect();
                    for ch in &ctx_handles {
                        context_states.remove(ch);
                    }
                    ctx_order.retain(|h| !ctx_handles.contains(h));
                    parts.push(DescriptionPart {
                        modification: Modification::Deleted,
                        descriptor,
                        states: Vec::new(),
                        context_states: Vec::new(),
                    });
                }
            }
            desc_order.retain(|h| !doomed.contains(h));

            // Updates: bump descriptor version and re-stamp the state.
            for (handle, staged) in &updated {
                if doomed.contains(handle) {
                    continue;
                }
                let committed = current
                    .descriptor(handle)
                    .ok_or_else(|| Error::UnknownHandle(handle.clone()))?;
                let mut descriptor = staged.clone();
                descriptor.version = committed.version + 1;
                descriptors.insert(handle.clone(), descriptor.clone());
                let mut part_states = Vec::new();
                if let Some(state) = states.get_mut(handle) {
                    state.invalidate_source();
                    state.version += 1;
                    state.descriptor_version = descriptor.version;
                    part_states.push(state.clone());
                }
                parts.push(DescriptionPart {
                    modification: Modification::Updated,
                    descriptor,
                    states: part_states,
                    context_states: Vec::new(),
                });
            }

            // Creations, in staging order.
            for descriptor in created {
                let handle = descriptor.handle.clone();
                let state = match created_states.remove(&handle) {
                    Some(mut s) => {
                        s.descriptor_handle = handle.clone();
                        Some(s)
                    }
                    None => StateKind::default_for(&descriptor.kind)
                        .map(|kind| State::new(&handle, kind)),
                };
                let mut part_states = Vec::new();
                if let Some(mut s) = state {
                    if !s.kind.matches_descriptor(&descriptor.kind) {
                        return Err(Error::Consistency(format!(
                            "initial state kind mismatch for {}",
                            handle
                        )));
                    }
                    s.version = 0;
                    s.descriptor_version = descriptor.version;
                    states.insert(handle.clone(), s.clone());
                    part_states.push(s);
                }
                descriptors.insert(handle.clone(), descriptor.clone());
                desc_order.push(handle.clone());
                parts.push(DescriptionPart {
                    modification: Modification::Created,
                    descriptor,
                    states: part_states,
                    context_states: Vec::new(),
                });
            }

            Ok(ChangeSet::Description {
                version_group: vg.clone(),
                parts,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::descriptor::{DescriptorKind, MetricCommon};
    use crate::biceps::state::{ContextKind, MetricValue, PatientDemographics};
    use crate::xml::Decimal;
    use parking_lot::Mutex;

    fn provider_with_metric() -> ProviderMdib {
        let provider = ProviderMdib::new();
        let mut tx = provider.begin_descriptor();
        tx.create(Descriptor::new("mds0", None, DescriptorKind::Mds)).expect("create mds");
        tx.create(Descriptor::new("vmd0", Some("mds0"), DescriptorKind::Vmd)).expect("create vmd");
        tx.create(Descriptor::new("chan0", Some("vmd0"), DescriptorKind::Channel))
            .expect("create channel");
        tx.create(Descriptor::new(
            "hr.num",
            Some("chan0"),
            DescriptorKind::NumericMetric {
                common: MetricCommon::measurement("264864"),
                resolution: Decimal::from(1.0),
            },
        ))
        .expect("create metric");
        tx.create(Descriptor::new("sysctx", Some("mds0"), DescriptorKind::SystemContext))
            .expect("create system context");
        tx.create(Descriptor::new("pat", Some("sysctx"), DescriptorKind::PatientContext))
            .expect("create patient context");
        tx.commit().expect("initial commit");
        provider
    }

    #[test]
    fn test_mdib_version_increments_by_one() {
        let provider = provider_with_metric();
        let v0 = provider.read().mdib_version();
        let mut tx = provider.begin_metric();
        let state = tx.state_mut("hr.num").expect("metric exists");
        state.kind = StateKind::NumericMetric {
            value: Some(MetricValue::numeric(72.0, 1)),
        };
        let vg = tx.commit().expect("commit");
        assert_eq!(vg.mdib_version, v0 + 1);
        assert_eq!(provider.read().mdib_version(), v0 + 1);
    }

    #[test]
    fn test_state_version_bumps_and_value_lands() {
        let provider = provider_with_metric();
        let before = provider.read().state("hr.num").expect("state").version;
        let mut tx = provider.begin_metric();
        tx.state_mut("hr.num").expect("metric").kind = StateKind::NumericMetric {
            value: Some(MetricValue::numeric(72.0, 99)),
        };
        tx.commit().expect("commit");
        let snap = provider.read();
        let state = snap.state("hr.num").expect("state");
        assert_eq!(state.version, before + 1);
        match &state.kind {
            StateKind::NumericMetric { value: Some(v) } => {
                assert_eq!(v.value.as_ref().expect("value").as_f64(), 72.0);
            }
            other => panic!("unexpected state kind: {:?}", other),
        }
    }

    #[test]
    fn test_wrong_family_rejected() {
        let provider = provider_with_metric();
        let mut tx = provider.begin_alert();
        assert!(matches!(tx.state_mut("hr.num"), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_unknown_handle_rolls_back() {
        let provider = provider_with_metric();
        let v0 = provider.read().mdib_version();
        let mut tx = provider.begin_metric();
        assert!(tx.state_mut("nope").is_err());
        // Nothing observable happened.
        assert_eq!(provider.read().mdib_version(), v0);
    }

    #[test]
    fn test_emission_order_matches_commit_order() {
        let provider = provider_with_metric();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        provider.on_change(move |cs| {
            seen_clone.lock().push(cs.version_group().mdib_version);
        });
        for i in 0..5 {
            let mut tx = provider.begin_metric();
            tx.state_mut("hr.num").expect("metric").kind = StateKind::NumericMetric {
                value: Some(MetricValue::numeric(f64::from(i), i as u64)),
            };
            tx.commit().expect("commit");
        }
        let versions = seen.lock().clone();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted, "emission order must equal commit order");
        assert_eq!(versions.len(), 5);
    }

    #[test]
    fn test_context_association_singleton() {
        let provider = provider_with_metric();

        let mut tx = provider.begin_context();
        let mut cs = ContextState::new(
            "pat.1",
            "pat",
            ContextKind::Patient(PatientDemographics::default()),
        );
        cs.association = ContextAssociation::Assoc;
        tx.create_context_state(cs).expect("create");
        let vg1 = tx.commit().expect("commit");

        let snap = provider.read();
        let state = snap.context_state("pat.1").expect("created");
        assert_eq!(state.association, ContextAssociation::Assoc);
        assert_eq!(state.binding_mdib_version, Some(vg1.mdib_version));

        // Associating a second patient pushes the first to Dis.
        let mut tx = provider.begin_context();
        let mut cs = ContextState::new(
            "pat.2",
            "pat",
            ContextKind::Patient(PatientDemographics::default()),
        );
        cs.association = ContextAssociation::Assoc;
        tx.create_context_state(cs).expect("create");
        let vg2 = tx.commit().expect("commit");

        let snap = provider.read();
        let old = snap.context_state("pat.1").expect("still present");
        assert_eq!(old.association, ContextAssociation::Dis);
        assert_eq!(old.unbinding_mdib_version, Some(vg2.mdib_version));
        let newer = snap.context_state("pat.2").expect("present");
        assert_eq!(newer.association, ContextAssociation::Assoc);
        let associated: Vec<_> = snap
            .context_states_of("pat")
            .into_iter()
            .filter(|c| c.association == ContextAssociation::Assoc)
            .collect();
        assert_eq!(associated.len(), 1, "exactly one associated patient");
    }

    #[test]
    fn test_descriptor_delete_cascades() {
        let provider = provider_with_metric();
        let mut tx = provider.begin_descriptor();
        tx.delete("vmd0").expect("delete");
        tx.commit().expect("commit");
        let snap = provider.read();
        assert!(snap.descriptor("vmd0").is_none());
        assert!(snap.descriptor("chan0").is_none(), "child deleted");
        assert!(snap.descriptor("hr.num").is_none(), "grandchild deleted");
        assert!(snap.state("hr.num").is_none(), "state deleted with descriptor");
        assert!(snap.descriptor("mds0").is_some(), "siblings untouched");
    }

    #[test]
    fn test_waveform_transaction() {
        let provider = provider_with_metric();
        let mut tx = provider.begin_descriptor();
        tx.create(Descriptor::new(
            "ecg",
            Some("chan0"),
            DescriptorKind::RealTimeSampleArrayMetric {
                common: MetricCommon::measurement("131328"),
                resolution: Decimal::from(0.01),
                sample_period: std::time::Duration::from_millis(4),
            },
        ))
        .expect("create waveform");
        tx.commit().expect("commit");

        let mut tx = provider.begin_waveform();
        tx.set_samples(
            "ecg",
            SampleArrayValue {
                samples: vec![Decimal::from(0.1), Decimal::from(0.2)],
                determination_time: Some(1),
                validity: crate::biceps::Validity::Valid,
            },
        );
        tx.commit().expect("commit waveform");
        let snap = provider.read();
        match &snap.state("ecg").expect("state").kind {
            StateKind::RealTimeSampleArrayMetric { samples: Some(v) } => {
                assert_eq!(v.samples.len(), 2);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
