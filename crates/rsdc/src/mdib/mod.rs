// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MDIB store: versioned, indexed holder of descriptors and states.
//!
//! Readers are lock-free: the committed state lives in an immutable
//! [`MdibSnapshot`] behind an `ArcSwap`, so a reader that overlaps a commit
//! observes either the whole pre- or the whole post-state. All writes go
//! through the transaction manager in [`transaction`]; the swap entry points
//! are `pub(crate)` on purpose - a direct write is a programming error.
//!
//! Indices (children-of, metric-code, context-by-descriptor) are derived
//! data, rebuilt when a snapshot is constructed and validated against the
//! MDIB invariants at the same time.

pub mod changeset;
pub mod transaction;

pub use changeset::ChangeSet;
pub use transaction::{
    ContextTransaction, DescriptorTransaction, ProviderMdib, StateTransaction, TransactionKind,
    WaveformTransaction,
};

use crate::biceps::{ContextAssociation, ContextState, Descriptor, Handle, MdibVersionGroup, State};
use crate::error::{Error, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable view of a committed MDIB.
#[derive(Debug, Clone)]
pub struct MdibSnapshot {
    version_group: MdibVersionGroup,
    descriptors: HashMap<Handle, Descriptor>,
    /// Single-states keyed by descriptor handle.
    states: HashMap<Handle, State>,
    /// Context states keyed by their own handle.
    context_states: HashMap<Handle, ContextState>,
    /// Descriptor handles in insertion (document) order.
    desc_order: Vec<Handle>,
    /// Context state handles in insertion order.
    ctx_order: Vec<Handle>,
    // Derived indices.
    roots: Vec<Handle>,
    children: HashMap<Handle, Vec<Handle>>,
    ctx_by_descriptor: HashMap<Handle, Vec<Handle>>,
    by_code: HashMap<String, Vec<Handle>>,
}

impl MdibSnapshot {
    /// Empty MDIB with a fresh sequence id.
    pub fn empty() -> Self {
        Self {
            version_group: MdibVersionGroup::new_random(),
            descriptors: HashMap::new(),
            states: HashMap::new(),
            context_states: HashMap::new(),
            desc_order: Vec::new(),
            ctx_order: Vec::new(),
            roots: Vec::new(),
            children: HashMap::new(),
            ctx_by_descriptor: HashMap::new(),
            by_code: HashMap::new(),
        }
    }

    /// Build a snapshot from raw tables, rebuilding indices and enforcing
    /// the MDIB invariants. Any violation fails the whole build.
    pub fn build(
        version_group: MdibVersionGroup,
        descriptors: HashMap<Handle, Descriptor>,
        states: HashMap<Handle, State>,
        context_states: HashMap<Handle, ContextState>,
        desc_order: Vec<Handle>,
        ctx_order: Vec<Handle>,
    ) -> Result<Self> {
        // Invariant 2: every non-root parent resolves.
        for d in descriptors.values() {
            if let Some(parent) = &d.parent {
                if !descriptors.contains_key(parent) {
                    return Err(Error::Consistency(format!(
                        "descriptor {} has dangling parent {}",
                        d.handle, parent
                    )));
                }
            }
        }
        // Invariant 1+3: states match existing descriptors; single-state
        // descriptors carry exactly one state.
        for (handle, state) in &states {
            let d = descriptors.get(handle).ok_or_else(|| {
                Error::Consistency(format!("state for unknown descriptor {}", handle))
            })?;
            if !state.kind.matches_descriptor(&d.kind) {
                return Err(Error::Consistency(format!(
                    "state kind mismatch for descriptor {}",
                    handle
                )));
            }
        }
        for d in descriptors.values() {
            if d.is_single_state() && !states.contains_key(&d.handle) {
                return Err(Error::Consistency(format!(
                    "single-state descriptor {} has no state",
                    d.handle
                )));
            }
        }
        // Context states: descriptor exists, kind matches, handles unique
        // against descriptor table.
        for cs in context_states.values() {
            let d = descriptors.get(&cs.descriptor_handle).ok_or_else(|| {
                Error::Consistency(format!(
                    "context state {} for unknown descriptor {}",
                    cs.handle, cs.descriptor_handle
                ))
            })?;
            if !cs.kind.matches_descriptor(&d.kind) {
                return Err(Error::Consistency(format!(
                    "context state kind mismatch for {}",
                    cs.handle
                )));
            }
            if descriptors.contains_key(&cs.handle) {
                return Err(Error::Consistency(format!(
                    "context state handle {} collides with a descriptor",
                    cs.handle
                )));
            }
        }
        // Invariant 4: singleton association per (descriptor, kind).
        let mut assoc_seen: HashMap<&str, u32> = HashMap::new();
        for cs in context_states.values() {
            if cs.association == ContextAssociation::Assoc
                && cs.kind.requires_singleton_association()
            {
                let count = assoc_seen.entry(cs.descriptor_handle.as_str()).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(Error::Consistency(format!(
                        "more than one associated context state for {}",
                        cs.descriptor_handle
                    )));
                }
            }
        }

        // Derived indices, insertion order preserved.
        let mut roots = Vec::new();
        let mut children: HashMap<Handle, Vec<Handle>> = HashMap::new();
        let mut by_code: HashMap<String, Vec<Handle>> = HashMap::new();
        for handle in &desc_order {
            let Some(d) = descriptors.get(handle) else {
                continue;
            };
            match &d.parent {
                None => roots.push(handle.clone()),
                Some(parent) => children.entry(parent.clone()).or_default().push(handle.clone()),
            }
            if d.kind.is_metric() {
                if let Some(code) = &d.code {
                    by_code.entry(code.code.clone()).or_default().push(handle.clone());
                }
            }
        }
        let mut ctx_by_descriptor: HashMap<Handle, Vec<Handle>> = HashMap::new();
        for handle in &ctx_order {
            if let Some(cs) = context_states.get(handle) {
                ctx_by_descriptor
                    .entry(cs.descriptor_handle.clone())
                    .or_default()
                    .push(handle.clone());
            }
        }

        Ok(Self {
            version_group,
            descriptors,
            states,
            context_states,
            desc_order,
            ctx_order,
            roots,
            children,
            ctx_by_descriptor,
            by_code,
        })
    }

    pub fn version_group(&self) -> &MdibVersionGroup {
        &self.version_group
    }

    pub fn mdib_version(&self) -> u64 {
        self.version_group.mdib_version
    }

    pub fn descriptor(&self, handle: &str) -> Option<&Descriptor> {
        self.descriptors.get(handle)
    }

    /// Single-state (by descriptor handle) or context state (by own handle).
    pub fn state(&self, handle: &str) -> Option<&State> {
        self.states.get(handle)
    }

    pub fn context_state(&self, handle: &str) -> Option<&ContextState> {
        self.context_states.get(handle)
    }

    /// Context states of one descriptor, insertion order.
    pub fn context_states_of(&self, descriptor_handle: &str) -> Vec<&ContextState> {
        self.ctx_by_descriptor
            .get(descriptor_handle)
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(|h| self.context_states.get(h))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Child descriptor handles, insertion order (matches source XML order
    /// when the MDIB was loaded from a document).
    pub fn children(&self, handle: &str) -> &[Handle] {
        self.children.get(handle).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Root (MDS) handles.
    pub fn roots(&self) -> &[Handle] {
        &self.roots
    }

    /// Metric handles by type code.
    pub fn handles_by_code(&self, code: &str) -> &[Handle] {
        self.by_code.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All single-states in descriptor insertion order.
    pub fn states_in_order(&self) -> impl Iterator<Item = (&Handle, &State)> {
        self.desc_order
            .iter()
            .filter_map(|h| self.states.get(h).map(|s| (h, s)))
    }

    /// All context states in insertion order.
    pub fn context_states_in_order(&self) -> impl Iterator<Item = &ContextState> {
        self.ctx_order.iter().filter_map(|h| self.context_states.get(h))
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    // Internal accessors for the transaction manager.
    pub(crate) fn descriptors_table(&self) -> &HashMap<Handle, Descriptor> {
        &self.descriptors
    }

    pub(crate) fn states_table(&self) -> &HashMap<Handle, State> {
        &self.states
    }

    pub(crate) fn context_states_table(&self) -> &HashMap<Handle, ContextState> {
        &self.context_states
    }

    pub(crate) fn desc_order_vec(&self) -> &Vec<Handle> {
        &self.desc_order
    }

    pub(crate) fn ctx_order_vec(&self) -> &Vec<Handle> {
        &self.ctx_order
    }
}

/// Shared MDIB: lock-free snapshot reads, serialized commits.
pub struct Mdib {
    snapshot: ArcSwap<MdibSnapshot>,
    /// The single serialization point: at most one commit at a time.
    commit_lock: Mutex<()>,
}

impl Mdib {
    pub fn new(snapshot: MdibSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn empty() -> Self {
        Self::new(MdibSnapshot::empty())
    }

    /// Current committed snapshot (lock-free).
    pub fn read(&self) -> Arc<MdibSnapshot> {
        self.snapshot.load_full()
    }

    /// Acquire the commit lock. Held for the whole validate-build-swap-emit
    /// sequence of a transaction.
    pub(crate) fn lock_commit(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }

    /// Publish a new committed snapshot. Caller must hold the commit lock.
    pub(crate) fn publish(&self, snapshot: MdibSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl std::fmt::Debug for Mdib {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot.load();
        f.debug_struct("Mdib")
            .field("mdib_version", &snap.mdib_version())
            .field("descriptors", &snap.descriptor_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biceps::descriptor::DescriptorKind;
    use crate::biceps::state::StateKind;
    use crate::biceps::{ContextKind, PatientDemographics};

    fn descriptor(handle: &str, parent: Option<&str>, kind: DescriptorKind) -> Descriptor {
        Descriptor::new(handle, parent, kind)
    }

    fn tables() -> (
        HashMap<Handle, Descriptor>,
        HashMap<Handle, State>,
        Vec<Handle>,
    ) {
        let mut descriptors = HashMap::new();
        let mut states = HashMap::new();
        let mut order = Vec::new();
        for (handle, parent, kind) in [
            ("mds0", None, DescriptorKind::Mds),
            ("vmd0", Some("mds0"), DescriptorKind::Vmd),
            ("chan0", Some("vmd0"), DescriptorKind::Channel),
        ] {
            let d = descriptor(handle, parent, kind);
            let state_kind = StateKind::default_for(&d.kind).expect("single-state kind");
            states.insert(handle.to_string(), State::new(handle, state_kind));
            descriptors.insert(handle.to_string(), d);
            order.push(handle.to_string());
        }
        (descriptors, states, order)
    }

    #[test]
    fn test_build_and_indices() {
        let (descriptors, states, order) = tables();
        let snap = MdibSnapshot::build(
            MdibVersionGroup::new_random(),
            descriptors,
            states,
            HashMap::new(),
            order,
            Vec::new(),
        )
        .expect("valid MDIB");
        assert_eq!(snap.roots(), &["mds0".to_string()]);
        assert_eq!(snap.children("mds0"), &["vmd0".to_string()]);
        assert_eq!(snap.children("vmd0"), &["chan0".to_string()]);
        assert!(snap.children("chan0").is_empty());
    }

    #[test]
    fn test_dangling_parent_rejected() {
        let (mut descriptors, mut states, mut order) = tables();
        let d = descriptor("orphan", Some("nowhere"), DescriptorKind::Vmd);
        states.insert(
            "orphan".to_string(),
            State::new("orphan", StateKind::default_for(&d.kind).expect("kind")),
        );
        descriptors.insert("orphan".to_string(), d);
        order.push("orphan".to_string());
        let result = MdibSnapshot::build(
            MdibVersionGroup::new_random(),
            descriptors,
            states,
            HashMap::new(),
            order,
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::Consistency(_))));
    }

    #[test]
    fn test_missing_single_state_rejected() {
        let (mut descriptors, states, mut order) = tables();
        descriptors.insert(
            "lonely".to_string(),
            descriptor("lonely", Some("mds0"), DescriptorKind::Vmd),
        );
        order.push("lonely".to_string());
        let result = MdibSnapshot::build(
            MdibVersionGroup::new_random(),
            descriptors,
            states,
            HashMap::new(),
            order,
            Vec::new(),
        );
        assert!(matches!(result, Err(Error::Consistency(_))));
    }

    #[test]
    fn test_double_association_rejected() {
        let (mut descriptors, states, mut order) = tables();
        descriptors.insert(
            "sysctx".to_string(),
            descriptor("sysctx", Some("mds0"), DescriptorKind::SystemContext),
        );
        let mut sysctx_state = HashMap::new();
        sysctx_state.extend(states);
        sysctx_state.insert(
            "sysctx".to_string(),
            State::new("sysctx", StateKind::SystemContext),
        );
        descriptors.insert(
            "pat".to_string(),
            descriptor("pat", Some("sysctx"), DescriptorKind::PatientContext),
        );
        order.push("sysctx".to_string());
        order.push("pat".to_string());

        let mut context_states = HashMap::new();
        let mut ctx_order = Vec::new();
        for handle in ["pat.1", "pat.2"] {
            let mut cs = ContextState::new(
                handle,
                "pat",
                ContextKind::Patient(PatientDemographics::default()),
            );
            cs.association = ContextAssociation::Assoc;
            context_states.insert(handle.to_string(), cs);
            ctx_order.push(handle.to_string());
        }
        let result = MdibSnapshot::build(
            MdibVersionGroup::new_random(),
            descriptors,
            sysctx_state,
            context_states,
            order,
            ctx_order,
        );
        assert!(matches!(result, Err(Error::Consistency(_))));
    }

    #[test]
    fn test_read_is_stable_across_publish() {
        let (descriptors, states, order) = tables();
        let vg = MdibVersionGroup::new_random();
        let snap = MdibSnapshot::build(
            vg.clone(),
            descriptors,
            states,
            HashMap::new(),
            order,
            Vec::new(),
        )
        .expect("valid MDIB");
        let mdib = Mdib::new(snap);

        let before = mdib.read();
        let mut next = (*before).clone();
        next.version_group.mdib_version += 1;
        {
            let _guard = mdib.lock_commit();
            mdib.publish(next);
        }
        // The old Arc still sees the old version; a fresh read sees the new.
        assert_eq!(before.mdib_version(), vg.mdib_version);
        assert_eq!(mdib.read().mdib_version(), vg.mdib_version + 1);
    }
}
