// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! BICEPS participant model as plain Rust data.
//!
//! The deep descriptor/state inheritance tree of the standard is flattened
//! into one sum type per family: shared header fields live in a common
//! struct, kind-specific payload in the variant. Entities carry no back
//! pointer to their MDIB; they are plain data looked up by handle.
//!
//! XML mapping lives in [`codec`] (entities) and [`reports`] (message-model
//! bodies).

pub mod codec;
pub mod descriptor;
pub mod reports;
pub mod state;

pub use descriptor::{Descriptor, DescriptorKind, MetricCommon, OperationKind};
pub use state::{
    ContextAssociation, ContextKind, ContextState, LocationDetail, MetricValue, PatientDemographics,
    SampleArrayValue, State, StateKind, Validity,
};

/// Stable string identifier of a descriptor or state.
pub type Handle = String;

/// The version triple carried in every report and MDIB-bearing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdibVersionGroup {
    /// Bumped by exactly one per committed transaction.
    pub mdib_version: u64,
    /// Provider continuity id; changes mean the consumer must resynchronize.
    pub sequence_id: String,
    /// Optional provider re-identification tag.
    pub instance_id: Option<u64>,
}

impl MdibVersionGroup {
    /// Fresh group with a random sequence id, version 0.
    pub fn new_random() -> Self {
        Self {
            mdib_version: 0,
            sequence_id: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            instance_id: None,
        }
    }
}

/// Coded value from a coding system (defaults to the 11073 nomenclature).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedValue {
    pub code: String,
    pub coding_system: Option<String>,
}

impl CodedValue {
    /// Code in the implied default coding system.
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            coding_system: None,
        }
    }
}

/// Instance identifier (`Root`/`Extension` pair).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceIdentifier {
    pub root: Option<String>,
    pub extension: Option<String>,
}
