// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State family: runtime values attached to descriptors.
//!
//! Single-states are identified by their descriptor handle; context states
//! are multi-instance and carry their own handle plus association tracking.

use super::{DescriptorKind, Handle, InstanceIdentifier};
use crate::xml::{Decimal, Timestamp};
use std::sync::Arc;

/// Measurement validity (`pm:MetricQuality/@Validity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    Questionable,
    /// Measurement ongoing, value not yet usable.
    Ong,
}

impl Validity {
    pub fn as_wire(self) -> &'static str {
        match self {
            Validity::Valid => "Vld",
            Validity::Invalid => "Inv",
            Validity::Questionable => "Qst",
            Validity::Ong => "Ong",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        Some(match text {
            "Vld" => Validity::Valid,
            "Inv" => Validity::Invalid,
            "Qst" => Validity::Questionable,
            "Ong" => Validity::Ong,
            _ => return None,
        })
    }
}

/// Numeric or string metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Numeric value (numeric metrics) - lexical form preserved.
    pub value: Option<Decimal>,
    /// String value (string/enum metrics).
    pub string_value: Option<String>,
    pub determination_time: Option<Timestamp>,
    pub validity: Validity,
}

impl MetricValue {
    pub fn numeric(value: f64, determination_time: Timestamp) -> Self {
        Self {
            value: Some(Decimal::from(value)),
            string_value: None,
            determination_time: Some(determination_time),
            validity: Validity::Valid,
        }
    }

    pub fn string(value: &str, determination_time: Timestamp) -> Self {
        Self {
            value: None,
            string_value: Some(value.to_string()),
            determination_time: Some(determination_time),
            validity: Validity::Valid,
        }
    }
}

/// One real-time sample array observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleArrayValue {
    pub samples: Vec<Decimal>,
    pub determination_time: Option<Timestamp>,
    pub validity: Validity,
}

/// Single-state attached to exactly one descriptor.
#[derive(Debug, Clone)]
pub struct State {
    pub descriptor_handle: Handle,
    /// Version of the descriptor this state was emitted against.
    pub descriptor_version: u64,
    /// Strictly non-decreasing; bumped by one on every change.
    pub version: u64,
    pub kind: StateKind,
    /// Serialized source form, invalidated on typed mutation.
    pub(crate) source: Option<Arc<str>>,
}

impl State {
    pub fn new(descriptor_handle: &str, kind: StateKind) -> Self {
        Self {
            descriptor_handle: descriptor_handle.to_string(),
            descriptor_version: 0,
            version: 0,
            kind,
            source: None,
        }
    }

    pub(crate) fn invalidate_source(&mut self) {
        self.source = None;
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor_handle == other.descriptor_handle
            && self.descriptor_version == other.descriptor_version
            && self.version == other.version
            && self.kind == other.kind
    }
}

/// Kind tag plus payload for single-states.
#[derive(Debug, Clone, PartialEq)]
pub enum StateKind {
    /// MDS/VMD/Channel/Battery/Clock component state.
    Component {
        /// `On`, `NotRdy`, `StndBy`, `Off`, `Shtdn`, `Fail` (wire text).
        activation: String,
    },
    NumericMetric {
        value: Option<MetricValue>,
    },
    StringMetric {
        value: Option<MetricValue>,
    },
    EnumStringMetric {
        value: Option<MetricValue>,
    },
    RealTimeSampleArrayMetric {
        samples: Option<SampleArrayValue>,
    },
    AlertSystem {
        /// `On`, `Off`, `Psd` (wire text).
        activation: String,
    },
    AlertCondition {
        activation: String,
        presence: bool,
    },
    AlertSignal {
        activation: String,
        /// `On`, `Off`, `Latch`, `Ack` (wire text).
        presence: String,
    },
    Operation {
        /// `En`, `Dis`, `NA` (wire text).
        operating_mode: String,
    },
    SystemContext,
    Sco,
}

impl StateKind {
    /// Does this state kind belong to the given descriptor kind?
    ///
    /// MDIB invariant 1 ("every state references an existing descriptor of
    /// the matching kind") is enforced with this table at commit time.
    pub fn matches_descriptor(&self, d: &DescriptorKind) -> bool {
        match self {
            StateKind::Component { .. } => matches!(
                d,
                DescriptorKind::Mds
                    | DescriptorKind::Vmd
                    | DescriptorKind::Channel
                    | DescriptorKind::Battery
                    | DescriptorKind::Clock
            ),
            StateKind::NumericMetric { .. } => matches!(d, DescriptorKind::NumericMetric { .. }),
            StateKind::StringMetric { .. } => matches!(d, DescriptorKind::StringMetric { .. }),
            StateKind::EnumStringMetric { .. } => {
                matches!(d, DescriptorKind::EnumStringMetric { .. })
            }
            StateKind::RealTimeSampleArrayMetric { .. } => {
                matches!(d, DescriptorKind::RealTimeSampleArrayMetric { .. })
            }
            StateKind::AlertSystem { .. } => matches!(d, DescriptorKind::AlertSystem),
            StateKind::AlertCondition { .. } => matches!(d, DescriptorKind::AlertCondition { .. }),
            StateKind::AlertSignal { .. } => matches!(d, DescriptorKind::AlertSignal { .. }),
            StateKind::Operation { .. } => matches!(d, DescriptorKind::Operation { .. }),
            StateKind::SystemContext => matches!(d, DescriptorKind::SystemContext),
            StateKind::Sco => matches!(d, DescriptorKind::Sco),
        }
    }

    /// Default state for a freshly created descriptor.
    pub fn default_for(d: &DescriptorKind) -> Option<StateKind> {
        Some(match d {
            DescriptorKind::Mds
            | DescriptorKind::Vmd
            | DescriptorKind::Channel
            | DescriptorKind::Battery
            | DescriptorKind::Clock => StateKind::Component {
                activation: "On".to_string(),
            },
            DescriptorKind::NumericMetric { .. } => StateKind::NumericMetric { value: None },
            DescriptorKind::StringMetric { .. } => StateKind::StringMetric { value: None },
            DescriptorKind::EnumStringMetric { .. } => StateKind::EnumStringMetric { value: None },
            DescriptorKind::RealTimeSampleArrayMetric { .. } => {
                StateKind::RealTimeSampleArrayMetric { samples: None }
            }
            DescriptorKind::AlertSystem => StateKind::AlertSystem {
                activation: "On".to_string(),
            },
            DescriptorKind::AlertCondition { .. } => StateKind::AlertCondition {
                activation: "On".to_string(),
                presence: false,
            },
            DescriptorKind::AlertSignal { .. } => StateKind::AlertSignal {
                activation: "On".to_string(),
                presence: "Off".to_string(),
            },
            DescriptorKind::Operation { .. } => StateKind::Operation {
                operating_mode: "En".to_string(),
            },
            DescriptorKind::SystemContext => StateKind::SystemContext,
            DescriptorKind::Sco => StateKind::Sco,
            // Context descriptors have no single-state.
            DescriptorKind::PatientContext
            | DescriptorKind::LocationContext
            | DescriptorKind::EnsembleContext => return None,
        })
    }
}

/// Context association lifecycle (`No -> Pre -> Assoc -> Dis`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAssociation {
    No,
    Pre,
    Assoc,
    Dis,
}

impl ContextAssociation {
    pub fn as_wire(self) -> &'static str {
        match self {
            ContextAssociation::No => "No",
            ContextAssociation::Pre => "Pre",
            ContextAssociation::Assoc => "Assoc",
            ContextAssociation::Dis => "Dis",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        Some(match text {
            "No" => ContextAssociation::No,
            "Pre" => ContextAssociation::Pre,
            "Assoc" => ContextAssociation::Assoc,
            "Dis" => ContextAssociation::Dis,
            _ => return None,
        })
    }
}

/// Patient demographics subset carried by a patient context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatientDemographics {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// `M`, `F`, `Unkn` (wire text).
    pub sex: Option<String>,
}

/// Location fields carried by a location context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocationDetail {
    pub facility: Option<String>,
    pub building: Option<String>,
    pub floor: Option<String>,
    pub point_of_care: Option<String>,
    pub room: Option<String>,
    pub bed: Option<String>,
}

/// Kind-specific payload of a context state.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextKind {
    Patient(PatientDemographics),
    Location(LocationDetail),
    Ensemble,
}

impl ContextKind {
    /// Does this context kind belong to the given descriptor kind?
    pub fn matches_descriptor(&self, d: &DescriptorKind) -> bool {
        match self {
            ContextKind::Patient(_) => matches!(d, DescriptorKind::PatientContext),
            ContextKind::Location(_) => matches!(d, DescriptorKind::LocationContext),
            ContextKind::Ensemble => matches!(d, DescriptorKind::EnsembleContext),
        }
    }

    /// Kinds that allow at most one `Assoc` state per descriptor.
    pub fn requires_singleton_association(&self) -> bool {
        matches!(self, ContextKind::Patient(_) | ContextKind::Location(_))
    }
}

/// Multi-instance state of a context descriptor.
#[derive(Debug, Clone)]
pub struct ContextState {
    /// Own handle, distinct from the descriptor handle.
    pub handle: Handle,
    pub descriptor_handle: Handle,
    pub descriptor_version: u64,
    pub version: u64,
    pub association: ContextAssociation,
    /// MDIB version at which the state moved to `Assoc`.
    pub binding_mdib_version: Option<u64>,
    /// MDIB version at which the state left `Assoc`.
    pub unbinding_mdib_version: Option<u64>,
    pub identifications: Vec<InstanceIdentifier>,
    pub kind: ContextKind,
    pub(crate) source: Option<Arc<str>>,
}

impl ContextState {
    pub fn new(handle: &str, descriptor_handle: &str, kind: ContextKind) -> Self {
        Self {
            handle: handle.to_string(),
            descriptor_handle: descriptor_handle.to_string(),
            descriptor_version: 0,
            version: 0,
            association: ContextAssociation::No,
            binding_mdib_version: None,
            unbinding_mdib_version: None,
            identifications: Vec::new(),
            kind,
            source: None,
        }
    }

    pub(crate) fn invalidate_source(&mut self) {
        self.source = None;
    }
}

impl PartialEq for ContextState {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
            && self.descriptor_handle == other.descriptor_handle
            && self.descriptor_version == other.descriptor_version
            && self.version == other.version
            && self.association == other.association
            && self.binding_mdib_version == other.binding_mdib_version
            && self.unbinding_mdib_version == other.unbinding_mdib_version
            && self.identifications == other.identifications
            && self.kind == other.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_kind_matches_descriptor() {
        let metric_state = StateKind::NumericMetric { value: None };
        let metric_desc = DescriptorKind::NumericMetric {
            common: crate::biceps::MetricCommon::measurement("bpm"),
            resolution: Decimal::from(1.0),
        };
        assert!(metric_state.matches_descriptor(&metric_desc));
        assert!(!metric_state.matches_descriptor(&DescriptorKind::Mds));
    }

    #[test]
    fn test_default_state_exists_for_single_state_kinds() {
        assert!(StateKind::default_for(&DescriptorKind::Mds).is_some());
        assert!(StateKind::default_for(&DescriptorKind::PatientContext).is_none());
    }

    #[test]
    fn test_association_wire_roundtrip() {
        for a in [
            ContextAssociation::No,
            ContextAssociation::Pre,
            ContextAssociation::Assoc,
            ContextAssociation::Dis,
        ] {
            assert_eq!(ContextAssociation::from_wire(a.as_wire()), Some(a));
        }
    }

    #[test]
    fn test_singleton_association_rule() {
        assert!(ContextKind::Patient(PatientDemographics::default()).requires_singleton_association());
        assert!(ContextKind::Location(LocationDetail::default()).requires_singleton_association());
        assert!(!ContextKind::Ensemble.requires_singleton_association());
    }
}
