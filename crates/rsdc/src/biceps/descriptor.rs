// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Descriptor family: structural nodes of the MDIB tree.

use super::{CodedValue, Handle};
use crate::xml::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// One structural node (MDS, VMD, Channel, Metric, Alert, SCO, Context, ...).
///
/// Hierarchy is expressed through `parent`; child ordering lives in the MDIB
/// store's children index so insertion order survives round trips.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub handle: Handle,
    /// `None` only for the MDS root.
    pub parent: Option<Handle>,
    /// Strictly non-decreasing; bumped by one on every change.
    pub version: u64,
    /// Type code of the element, if any.
    pub code: Option<CodedValue>,
    pub kind: DescriptorKind,
    /// Serialized source form, kept verbatim until a typed mutation
    /// invalidates it. Never compared; presentation only.
    pub(crate) source: Option<Arc<str>>,
}

impl Descriptor {
    /// New descriptor with version 0 and no preserved source.
    pub fn new(handle: &str, parent: Option<&str>, kind: DescriptorKind) -> Self {
        Self {
            handle: handle.to_string(),
            parent: parent.map(str::to_string),
            version: 0,
            code: None,
            kind,
            source: None,
        }
    }

    /// Attach a type code (builder style).
    pub fn with_code(mut self, code: CodedValue) -> Self {
        self.code = Some(code);
        self
    }

    /// Drop the preserved source form after a typed mutation.
    pub(crate) fn invalidate_source(&mut self) {
        self.source = None;
    }

    /// True for descriptors whose states are multi-instance context states.
    pub fn is_context(&self) -> bool {
        matches!(
            self.kind,
            DescriptorKind::PatientContext
                | DescriptorKind::LocationContext
                | DescriptorKind::EnsembleContext
        )
    }

    /// True for descriptors that carry exactly one state.
    pub fn is_single_state(&self) -> bool {
        !self.is_context()
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        // `source` is presentation, not identity.
        self.handle == other.handle
            && self.parent == other.parent
            && self.version == other.version
            && self.code == other.code
            && self.kind == other.kind
    }
}

/// Shared fields of all metric descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricCommon {
    pub unit: CodedValue,
    /// `Msrmt`, `Set`, `Clc`, ... (kept as wire text).
    pub category: String,
    /// `Intr`, `Cont`, ... (kept as wire text).
    pub availability: String,
}

impl MetricCommon {
    pub fn measurement(unit: &str) -> Self {
        Self {
            unit: CodedValue::new(unit),
            category: "Msrmt".to_string(),
            availability: "Cont".to_string(),
        }
    }
}

/// Operation descriptor kinds hosted by an SCO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SetValue,
    SetString,
    Activate,
    SetContextState,
    SetMetricState,
    SetComponentState,
    SetAlertState,
}

impl OperationKind {
    /// `xsi:type` local name of the descriptor.
    pub fn descriptor_type_name(self) -> &'static str {
        match self {
            OperationKind::SetValue => "SetValueOperationDescriptor",
            OperationKind::SetString => "SetStringOperationDescriptor",
            OperationKind::Activate => "ActivateOperationDescriptor",
            OperationKind::SetContextState => "SetContextStateOperationDescriptor",
            OperationKind::SetMetricState => "SetMetricStateOperationDescriptor",
            OperationKind::SetComponentState => "SetComponentStateOperationDescriptor",
            OperationKind::SetAlertState => "SetAlertStateOperationDescriptor",
        }
    }

    /// Reverse of [`descriptor_type_name`](Self::descriptor_type_name).
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "SetValueOperationDescriptor" => OperationKind::SetValue,
            "SetStringOperationDescriptor" => OperationKind::SetString,
            "ActivateOperationDescriptor" => OperationKind::Activate,
            "SetContextStateOperationDescriptor" => OperationKind::SetContextState,
            "SetMetricStateOperationDescriptor" => OperationKind::SetMetricState,
            "SetComponentStateOperationDescriptor" => OperationKind::SetComponentState,
            "SetAlertStateOperationDescriptor" => OperationKind::SetAlertState,
            _ => return None,
        })
    }
}

/// Kind tag plus kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorKind {
    Mds,
    Vmd,
    Channel,
    NumericMetric {
        common: MetricCommon,
        resolution: Decimal,
    },
    StringMetric {
        common: MetricCommon,
    },
    EnumStringMetric {
        common: MetricCommon,
        allowed_values: Vec<String>,
    },
    RealTimeSampleArrayMetric {
        common: MetricCommon,
        resolution: Decimal,
        sample_period: Duration,
    },
    AlertSystem,
    AlertCondition {
        /// Handles of the descriptors this condition watches.
        sources: Vec<Handle>,
        /// `Lo`, `Me`, `Hi` (kept as wire text).
        priority: String,
    },
    AlertSignal {
        condition_signaled: Handle,
        /// `Aud`, `Vis`, `Tan`, `Oth` (kept as wire text).
        manifestation: String,
    },
    Sco,
    Operation {
        op: OperationKind,
        /// Descriptor or state this operation acts on.
        operation_target: Handle,
    },
    SystemContext,
    PatientContext,
    LocationContext,
    EnsembleContext,
    Battery,
    Clock,
}

impl DescriptorKind {
    /// True when both values are the same variant (payload ignored).
    pub fn same_kind(&self, other: &DescriptorKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// True for the four metric variants.
    pub fn is_metric(&self) -> bool {
        matches!(
            self,
            DescriptorKind::NumericMetric { .. }
                | DescriptorKind::StringMetric { .. }
                | DescriptorKind::EnumStringMetric { .. }
                | DescriptorKind::RealTimeSampleArrayMetric { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_classification() {
        let pat = Descriptor::new("pat", Some("sysctx"), DescriptorKind::PatientContext);
        assert!(pat.is_context());
        assert!(!pat.is_single_state());

        let mds = Descriptor::new("mds0", None, DescriptorKind::Mds);
        assert!(mds.is_single_state());
    }

    #[test]
    fn test_source_not_part_of_equality() {
        let mut a = Descriptor::new("h", None, DescriptorKind::Mds);
        let b = a.clone();
        a.source = Some(Arc::from("<pm:Mds Handle=\"h\"/>"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_operation_kind_type_names_roundtrip() {
        for op in [
            OperationKind::SetValue,
            OperationKind::SetString,
            OperationKind::Activate,
            OperationKind::SetContextState,
            OperationKind::SetMetricState,
            OperationKind::SetComponentState,
            OperationKind::SetAlertState,
        ] {
            assert_eq!(OperationKind::from_type_name(op.descriptor_type_name()), Some(op));
        }
    }
}
