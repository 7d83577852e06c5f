// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML mapping of descriptors and states.
//!
//! Encoding is prefix-based: fragments use `pm:`/`xsi:` and expect the
//! caller (envelope or report builder) to declare those prefixes. Decoding
//! dispatches on the element local name, then on `xsi:type` where one slot
//! hosts several kinds (metrics, operations, states). No runtime registry;
//! the dispatch tables below are the compile-time counterpart of the
//! original's per-QName class registries.
//!
//! States and context states keep their serialized source form: an entity
//! decoded from XML and never mutated re-encodes byte-identically via the
//! preserved blob.

use super::descriptor::{Descriptor, DescriptorKind, MetricCommon, OperationKind};
use super::state::{
    ContextAssociation, ContextKind, ContextState, LocationDetail, MetricValue,
    PatientDemographics, SampleArrayValue, State, StateKind, Validity,
};
use super::{CodedValue, InstanceIdentifier};
use crate::xml::value::{format_duration, parse_duration};
use crate::xml::{Decimal, XmlWriter};
use std::sync::Arc;
use std::time::Duration;

/// Decoded state of either flavor.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyState {
    Single(State),
    Context(ContextState),
}

// ========================================================================
// Attribute helpers
// ========================================================================

fn req_attr<'a>(node: &roxmltree::Node<'a, '_>, name: &str) -> Result<&'a str, String> {
    node.attribute(name)
        .ok_or_else(|| format!("<{}> missing @{}", node.tag_name().name(), name))
}

fn opt_u64(node: &roxmltree::Node, name: &str) -> Result<Option<u64>, String> {
    match node.attribute(name) {
        None => Ok(None),
        Some(text) => text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("@{} is not an unsigned integer: {}", name, text)),
    }
}

fn u64_attr_or(node: &roxmltree::Node, name: &str, default: u64) -> Result<u64, String> {
    Ok(opt_u64(node, name)?.unwrap_or(default))
}

/// Strip the prefix from an `xsi:type` value (`pm:NumericMetricState` ->
/// `NumericMetricState`).
fn xsi_type_local<'a>(node: &roxmltree::Node<'a, '_>) -> Option<&'a str> {
    node.attribute((crate::names::ns::XSI, "type"))
        .map(|t| t.rsplit(':').next().unwrap_or(t))
}

fn capture(node: &roxmltree::Node, raw: &str) -> Option<Arc<str>> {
    let range = node.range();
    raw.get(range).map(Arc::from)
}

// ========================================================================
// CodedValue / Identification
// ========================================================================

fn encode_coded_value(w: &mut XmlWriter, elem: &str, cv: &CodedValue) {
    w.open(elem);
    w.attr("Code", &cv.code);
    w.attr_opt("CodingSystem", cv.coding_system.as_deref());
    w.close();
}

fn decode_coded_value(node: &roxmltree::Node) -> Result<CodedValue, String> {
    Ok(CodedValue {
        code: req_attr(node, "Code")?.to_string(),
        coding_system: node.attribute("CodingSystem").map(str::to_string),
    })
}

fn encode_identification(w: &mut XmlWriter, id: &InstanceIdentifier) {
    w.open("pm:Identification");
    w.attr_opt("Root", id.root.as_deref());
    w.attr_opt("Extension", id.extension.as_deref());
    w.close();
}

// ========================================================================
// Descriptor encoding
// ========================================================================

/// Element slot name for a descriptor kind (without prefix).
pub fn descriptor_slot_name(kind: &DescriptorKind) -> &'static str {
    match kind {
        DescriptorKind::Mds => "Mds",
        DescriptorKind::Vmd => "Vmd",
        DescriptorKind::Channel => "Channel",
        DescriptorKind::NumericMetric { .. }
        | DescriptorKind::StringMetric { .. }
        | DescriptorKind::EnumStringMetric { .. }
        | DescriptorKind::RealTimeSampleArrayMetric { .. } => "Metric",
        DescriptorKind::AlertSystem => "AlertSystem",
        DescriptorKind::AlertCondition { .. } => "AlertCondition",
        DescriptorKind::AlertSignal { .. } => "AlertSignal",
        DescriptorKind::Sco => "Sco",
        DescriptorKind::Operation { .. } => "Operation",
        DescriptorKind::SystemContext => "SystemContext",
        DescriptorKind::PatientContext => "PatientContext",
        DescriptorKind::LocationContext => "LocationContext",
        DescriptorKind::EnsembleContext => "EnsembleContext",
        DescriptorKind::Battery => "Battery",
        DescriptorKind::Clock => "Clock",
    }
}

fn metric_xsi_type(kind: &DescriptorKind) -> Option<&'static str> {
    Some(match kind {
        DescriptorKind::NumericMetric { .. } => "pm:NumericMetricDescriptor",
        DescriptorKind::StringMetric { .. } => "pm:StringMetricDescriptor",
        DescriptorKind::EnumStringMetric { .. } => "pm:EnumStringMetricDescriptor",
        DescriptorKind::RealTimeSampleArrayMetric { .. } => {
            "pm:RealTimeSampleArrayMetricDescriptor"
        }
        _ => return None,
    })
}

/// Encode one descriptor element.
///
/// `with_parent_attr` adds `@ParentHandle` (flat report form); nested
/// MdDescription form expresses the parent through element nesting instead.
/// Child descriptors are NOT written here; the tree walker in `reports`
/// appends them before the closing tag via `open_descriptor`/`close`.
pub fn encode_descriptor(w: &mut XmlWriter, d: &Descriptor, with_parent_attr: bool) {
    open_descriptor(w, d, with_parent_attr);
    w.close();
}

/// Open a descriptor element, write attributes and payload children, leave
/// the element open so a tree walker can nest child descriptors.
pub fn open_descriptor(w: &mut XmlWriter, d: &Descriptor, with_parent_attr: bool) {
    let slot = descriptor_slot_name(&d.kind);
    w.open(&format!("pm:{}", slot));
    if let Some(t) = metric_xsi_type(&d.kind) {
        w.attr("xsi:type", t);
    }
    if let DescriptorKind::Operation { op, .. } = &d.kind {
        w.attr("xsi:type", &format!("pm:{}", op.descriptor_type_name()));
    }
    w.attr("Handle", &d.handle);
    w.attr("DescriptorVersion", &d.version.to_string());
    if with_parent_attr {
        w.attr_opt("ParentHandle", d.parent.as_deref());
    }
    match &d.kind {
        DescriptorKind::NumericMetric { common, resolution } => {
            metric_attrs(w, common, Some(resolution), None);
        }
        DescriptorKind::StringMetric { common } => metric_attrs(w, common, None, None),
        DescriptorKind::EnumStringMetric { common, .. } => metric_attrs(w, common, None, None),
        DescriptorKind::RealTimeSampleArrayMetric {
            common,
            resolution,
            sample_period,
        } => metric_attrs(w, common, Some(resolution), Some(*sample_period)),
        DescriptorKind::AlertCondition { priority, .. } => {
            w.attr("Priority", priority);
        }
        DescriptorKind::AlertSignal {
            condition_signaled,
            manifestation,
        } => {
            w.attr("ConditionSignaled", condition_signaled);
            w.attr("Manifestation", manifestation);
        }
        DescriptorKind::Operation {
            operation_target, ..
        } => {
            w.attr("OperationTarget", operation_target);
        }
        _ => {}
    }
    // Payload children.
    if let Some(code) = &d.code {
        encode_coded_value(w, "pm:Type", code);
    }
    match &d.kind {
        DescriptorKind::NumericMetric { common, .. }
        | DescriptorKind::StringMetric { common }
        | DescriptorKind::EnumStringMetric { common, .. }
        | DescriptorKind::RealTimeSampleArrayMetric { common, .. } => {
            encode_coded_value(w, "pm:Unit", &common.unit);
        }
        DescriptorKind::AlertCondition { sources, .. } => {
            for s in sources {
                w.leaf_text("pm:Source", s);
            }
        }
        _ => {}
    }
    if let DescriptorKind::EnumStringMetric { allowed_values, .. } = &d.kind {
        for v in allowed_values {
            w.open("pm:AllowedValue");
            w.leaf_text("pm:Value", v);
            w.close();
        }
    }
}

fn metric_attrs(
    w: &mut XmlWriter,
    common: &MetricCommon,
    resolution: Option<&Decimal>,
    sample_period: Option<Duration>,
) {
    w.attr("MetricCategory", &common.category);
    w.attr("MetricAvailability", &common.availability);
    if let Some(res) = resolution {
        w.attr("Resolution", res.as_text());
    }
    if let Some(period) = sample_period {
        w.attr("SamplePeriod", &format_duration(period));
    }
}

// ========================================================================
// Descriptor decoding
// ========================================================================

/// Element local names that are descriptor slots (everything else inside a
/// descriptor element is payload).
pub const DESCRIPTOR_SLOTS: &[&str] = &[
    "Mds",
    "Vmd",
    "Channel",
    "Metric",
    "AlertSystem",
    "AlertCondition",
    "AlertSignal",
    "Sco",
    "Operation",
    "SystemContext",
    "PatientContext",
    "LocationContext",
    "EnsembleContext",
    "Battery",
    "Clock",
];

/// Child elements of `node` that are themselves descriptors, document order.
pub fn descriptor_children<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
) -> Vec<roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|n| n.is_element() && DESCRIPTOR_SLOTS.contains(&n.tag_name().name()))
        .collect()
}

fn decode_metric_common(node: &roxmltree::Node) -> Result<MetricCommon, String> {
    let unit = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Unit")
        .map(|n| decode_coded_value(&n))
        .transpose()?
        .ok_or_else(|| format!("metric {} missing pm:Unit", node.attribute("Handle").unwrap_or("?")))?;
    Ok(MetricCommon {
        unit,
        category: node.attribute("MetricCategory").unwrap_or("Unspec").to_string(),
        availability: node.attribute("MetricAvailability").unwrap_or("Intr").to_string(),
    })
}

fn decode_descriptor_kind(node: &roxmltree::Node) -> Result<DescriptorKind, String> {
    let slot = node.tag_name().name();
    Ok(match slot {
        "Mds" => DescriptorKind::Mds,
        "Vmd" => DescriptorKind::Vmd,
        "Channel" => DescriptorKind::Channel,
        "AlertSystem" => DescriptorKind::AlertSystem,
        "AlertCondition" => DescriptorKind::AlertCondition {
            sources: node
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() == "Source")
                .filter_map(|n| n.text().map(str::to_string))
                .collect(),
            priority: node.attribute("Priority").unwrap_or("Me").to_string(),
        },
        "AlertSignal" => DescriptorKind::AlertSignal {
            condition_signaled: req_attr(node, "ConditionSignaled")?.to_string(),
            manifestation: node.attribute("Manifestation").unwrap_or("Oth").to_string(),
        },
        "Sco" => DescriptorKind::Sco,
        "SystemContext" => DescriptorKind::SystemContext,
        "PatientContext" => DescriptorKind::PatientContext,
        "LocationContext" => DescriptorKind::LocationContext,
        "EnsembleContext" => DescriptorKind::EnsembleContext,
        "Battery" => DescriptorKind::Battery,
        "Clock" => DescriptorKind::Clock,
        "Operation" => {
            let type_name = xsi_type_local(node)
                .ok_or_else(|| "pm:Operation without xsi:type".to_string())?;
            let op = OperationKind::from_type_name(type_name)
                .ok_or_else(|| format!("unknown operation descriptor type: {}", type_name))?;
            DescriptorKind::Operation {
                op,
                operation_target: req_attr(node, "OperationTarget")?.to_string(),
            }
        }
        "Metric" => {
            let type_name = xsi_type_local(node)
                .ok_or_else(|| "pm:Metric without xsi:type".to_string())?;
            let common = decode_metric_common(node)?;
            match type_name {
                "NumericMetricDescriptor" => DescriptorKind::NumericMetric {
                    common,
                    resolution: node
                        .attribute("Resolution")
                        .and_then(Decimal::parse)
                        .unwrap_or_else(|| Decimal::from(1.0)),
                },
                "StringMetricDescriptor" => DescriptorKind::StringMetric { common },
                "EnumStringMetricDescriptor" => DescriptorKind::EnumStringMetric {
                    common,
                    allowed_values: node
                        .descendants()
                        .filter(|n| {
                            n.is_element()
                                && n.tag_name().name() == "Value"
                                && n.parent_element()
                                    .map(|p| p.tag_name().name() == "AllowedValue")
                                    .unwrap_or(false)
                        })
                        .filter_map(|n| n.text().map(str::to_string))
                        .collect(),
                },
                "RealTimeSampleArrayMetricDescriptor" => {
                    DescriptorKind::RealTimeSampleArrayMetric {
                        common,
                        resolution: node
                            .attribute("Resolution")
                            .and_then(Decimal::parse)
                            .unwrap_or_else(|| Decimal::from(1.0)),
                        sample_period: node
                            .attribute("SamplePeriod")
                            .and_then(parse_duration)
                            .unwrap_or(Duration::from_millis(10)),
                    }
                }
                other => return Err(format!("unknown metric descriptor type: {}", other)),
            }
        }
        other => return Err(format!("not a descriptor element: {}", other)),
    })
}

/// Decode a single descriptor element.
///
/// `parent` overrides `@ParentHandle` when the caller walks a nested tree.
/// `raw` enables source-form capture and must be `Some` only for flat
/// (report) elements, never for nested MdDescription nodes whose range
/// would include child descriptors.
pub fn decode_descriptor(
    node: &roxmltree::Node,
    parent: Option<&str>,
    raw: Option<&str>,
) -> Result<Descriptor, String> {
    let kind = decode_descriptor_kind(node)?;
    let code = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Type")
        .map(|n| decode_coded_value(&n))
        .transpose()?;
    Ok(Descriptor {
        handle: req_attr(node, "Handle")?.to_string(),
        parent: parent
            .map(str::to_string)
            .or_else(|| node.attribute("ParentHandle").map(str::to_string)),
        version: u64_attr_or(node, "DescriptorVersion", 0)?,
        code,
        kind,
        source: raw.and_then(|r| capture(node, r)),
    })
}

// ========================================================================
// State encoding
// ========================================================================

fn component_state_type_name(hint: Option<&DescriptorKind>) -> &'static str {
    match hint {
        Some(DescriptorKind::Mds) => "pm:MdsState",
        Some(DescriptorKind::Vmd) => "pm:VmdState",
        Some(DescriptorKind::Channel) => "pm:ChannelState",
        Some(DescriptorKind::Battery) => "pm:BatteryState",
        Some(DescriptorKind::Clock) => "pm:ClockState",
        _ => "pm:ComponentState",
    }
}

fn operation_state_type_name(hint: Option<&DescriptorKind>) -> &'static str {
    match hint {
        Some(DescriptorKind::Operation { op, .. }) => match op {
            OperationKind::SetValue => "pm:SetValueOperationState",
            OperationKind::SetString => "pm:SetStringOperationState",
            OperationKind::Activate => "pm:ActivateOperationState",
            OperationKind::SetContextState => "pm:SetContextStateOperationState",
            OperationKind::SetMetricState => "pm:SetMetricStateOperationState",
            OperationKind::SetComponentState => "pm:SetComponentStateOperationState",
            OperationKind::SetAlertState => "pm:SetAlertStateOperationState",
        },
        _ => "pm:OperationState",
    }
}

fn state_xsi_type(kind: &StateKind, hint: Option<&DescriptorKind>) -> &'static str {
    match kind {
        StateKind::Component { .. } => component_state_type_name(hint),
        StateKind::NumericMetric { .. } => "pm:NumericMetricState",
        StateKind::StringMetric { .. } => "pm:StringMetricState",
        StateKind::EnumStringMetric { .. } => "pm:EnumStringMetricState",
        StateKind::RealTimeSampleArrayMetric { .. } => "pm:RealTimeSampleArrayMetricState",
        StateKind::AlertSystem { .. } => "pm:AlertSystemState",
        StateKind::AlertCondition { .. } => "pm:AlertConditionState",
        StateKind::AlertSignal { .. } => "pm:AlertSignalState",
        StateKind::Operation { .. } => operation_state_type_name(hint),
        StateKind::SystemContext => "pm:SystemContextState",
        StateKind::Sco => "pm:ScoState",
    }
}

fn encode_metric_value(w: &mut XmlWriter, v: &MetricValue) {
    w.open("pm:MetricValue");
    if let Some(num) = &v.value {
        w.attr("Value", num.as_text());
    }
    if let Some(s) = &v.string_value {
        w.attr("Value", s);
    }
    if let Some(t) = v.determination_time {
        w.attr("DeterminationTime", &t.to_string());
    }
    w.open("pm:MetricQuality");
    w.attr("Validity", v.validity.as_wire());
    w.close();
    w.close();
}

fn encode_sample_array_value(w: &mut XmlWriter, v: &SampleArrayValue) {
    w.open("pm:MetricValue");
    let samples: Vec<&str> = v.samples.iter().map(Decimal::as_text).collect();
    w.attr("Samples", &samples.join(" "));
    if let Some(t) = v.determination_time {
        w.attr("DeterminationTime", &t.to_string());
    }
    w.open("pm:MetricQuality");
    w.attr("Validity", v.validity.as_wire());
    w.close();
    w.close();
}

/// Encode a single-state as `<{elem} xsi:type="...">`.
///
/// `elem` is the prefixed slot name (`pm:State` in MdState, `msg:MetricState`
/// in reports). `hint` sharpens the `xsi:type` of component and operation
/// states; without it the abstract type name is used.
pub fn encode_state(w: &mut XmlWriter, elem: &str, s: &State, hint: Option<&DescriptorKind>) {
    if let Some(src) = &s.source {
        // Unmodified since decode: re-emit the captured form.
        w.raw(src);
        return;
    }
    w.open(elem);
    w.attr("xsi:type", state_xsi_type(&s.kind, hint));
    w.attr("DescriptorHandle", &s.descriptor_handle);
    w.attr("DescriptorVersion", &s.descriptor_version.to_string());
    w.attr("StateVersion", &s.version.to_string());
    match &s.kind {
        StateKind::Component { activation }
        | StateKind::AlertSystem { activation } => {
            w.attr("ActivationState", activation);
        }
        StateKind::AlertCondition {
            activation,
            presence,
        } => {
            w.attr("ActivationState", activation);
            w.attr("Presence", if *presence { "true" } else { "false" });
        }
        StateKind::AlertSignal {
            activation,
            presence,
        } => {
            w.attr("ActivationState", activation);
            w.attr("Presence", presence);
        }
        StateKind::Operation { operating_mode } => {
            w.attr("OperatingMode", operating_mode);
        }
        _ => {}
    }
    match &s.kind {
        StateKind::NumericMetric { value }
        | StateKind::StringMetric { value }
        | StateKind::EnumStringMetric { value } => {
            if let Some(v) = value {
                encode_metric_value(w, v);
            }
        }
        StateKind::RealTimeSampleArrayMetric { samples } => {
            if let Some(v) = samples {
                encode_sample_array_value(w, v);
            }
        }
        _ => {}
    }
    w.close();
}

/// Encode a context state (same slot convention as [`encode_state`]).
pub fn encode_context_state(w: &mut XmlWriter, elem: &str, s: &ContextState) {
    if let Some(src) = &s.source {
        w.raw(src);
        return;
    }
    let type_name = match &s.kind {
        ContextKind::Patient(_) => "pm:PatientContextState",
        ContextKind::Location(_) => "pm:LocationContextState",
        ContextKind::Ensemble => "pm:EnsembleContextState",
    };
    w.open(elem);
    w.attr("xsi:type", type_name);
    w.attr("Handle", &s.handle);
    w.attr("DescriptorHandle", &s.descriptor_handle);
    w.attr("DescriptorVersion", &s.descriptor_version.to_string());
    w.attr("StateVersion", &s.version.to_string());
    w.attr("ContextAssociation", s.association.as_wire());
    if let Some(v) = s.binding_mdib_version {
        w.attr("BindingMdibVersion", &v.to_string());
    }
    if let Some(v) = s.unbinding_mdib_version {
        w.attr("UnbindingMdibVersion", &v.to_string());
    }
    for id in &s.identifications {
        encode_identification(w, id);
    }
    match &s.kind {
        ContextKind::Patient(p) => {
            w.open("pm:CoreData");
            if let Some(g) = &p.given_name {
                w.leaf_text("pm:Givenname", g);
            }
            if let Some(f) = &p.family_name {
                w.leaf_text("pm:Familyname", f);
            }
            if let Some(sex) = &p.sex {
                w.leaf_text("pm:Sex", sex);
            }
            w.close();
        }
        ContextKind::Location(l) => {
            w.open("pm:LocationDetail");
            w.attr_opt("Facility", l.facility.as_deref());
            w.attr_opt("Building", l.building.as_deref());
            w.attr_opt("Floor", l.floor.as_deref());
            w.attr_opt("PoC", l.point_of_care.as_deref());
            w.attr_opt("Room", l.room.as_deref());
            w.attr_opt("Bed", l.bed.as_deref());
            w.close();
        }
        ContextKind::Ensemble => {}
    }
    w.close();
}

// ========================================================================
// State decoding
// ========================================================================

fn decode_metric_value(node: &roxmltree::Node, numeric: bool) -> Result<MetricValue, String> {
    let validity = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "MetricQuality")
        .and_then(|q| q.attribute("Validity").and_then(Validity::from_wire))
        .unwrap_or(Validity::Valid);
    let determination_time = opt_u64(node, "DeterminationTime")?;
    let raw_value = node.attribute("Value");
    let (value, string_value) = if numeric {
        let value = match raw_value {
            Some(text) => Some(
                Decimal::parse(text).ok_or_else(|| format!("bad decimal value: {}", text))?,
            ),
            None => None,
        };
        (value, None)
    } else {
        (None, raw_value.map(str::to_string))
    };
    Ok(MetricValue {
        value,
        string_value,
        determination_time,
        validity,
    })
}

fn decode_sample_array(node: &roxmltree::Node) -> Result<SampleArrayValue, String> {
    let validity = node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "MetricQuality")
        .and_then(|q| q.attribute("Validity").and_then(Validity::from_wire))
        .unwrap_or(Validity::Valid);
    let samples = match node.attribute("Samples") {
        None => Vec::new(),
        Some(text) => text
            .split_whitespace()
            .map(|t| Decimal::parse(t).ok_or_else(|| format!("bad sample: {}", t)))
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(SampleArrayValue {
        samples,
        determination_time: opt_u64(node, "DeterminationTime")?,
        validity,
    })
}

fn metric_value_child<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == "MetricValue")
}

fn decode_single_state_kind(node: &roxmltree::Node, type_name: &str) -> Result<StateKind, String> {
    Ok(match type_name {
        "MdsState" | "VmdState" | "ChannelState" | "BatteryState" | "ClockState"
        | "ComponentState" => StateKind::Component {
            activation: node.attribute("ActivationState").unwrap_or("On").to_string(),
        },
        "NumericMetricState" => StateKind::NumericMetric {
            value: metric_value_child(node)
                .map(|n| decode_metric_value(&n, true))
                .transpose()?,
        },
        "StringMetricState" => StateKind::StringMetric {
            value: metric_value_child(node)
                .map(|n| decode_metric_value(&n, false))
                .transpose()?,
        },
        "EnumStringMetricState" => StateKind::EnumStringMetric {
            value: metric_value_child(node)
                .map(|n| decode_metric_value(&n, false))
                .transpose()?,
        },
        "RealTimeSampleArrayMetricState" => StateKind::RealTimeSampleArrayMetric {
            samples: metric_value_child(node)
                .map(|n| decode_sample_array(&n))
                .transpose()?,
        },
        "AlertSystemState" => StateKind::AlertSystem {
            activation: node.attribute("ActivationState").unwrap_or("On").to_string(),
        },
        "AlertConditionState" => StateKind::AlertCondition {
            activation: node.attribute("ActivationState").unwrap_or("On").to_string(),
            presence: node.attribute("Presence") == Some("true"),
        },
        "AlertSignalState" => StateKind::AlertSignal {
            activation: node.attribute("ActivationState").unwrap_or("On").to_string(),
            presence: node.attribute("Presence").unwrap_or("Off").to_string(),
        },
        "SystemContextState" => StateKind::SystemContext,
        "ScoState" => StateKind::Sco,
        name if name.ends_with("OperationState") => StateKind::Operation {
            operating_mode: node.attribute("OperatingMode").unwrap_or("En").to_string(),
        },
        other => return Err(format!("unknown state type: {}", other)),
    })
}

fn decode_context_kind(node: &roxmltree::Node, type_name: &str) -> Result<ContextKind, String> {
    Ok(match type_name {
        "PatientContextState" => {
            let core = node
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "CoreData");
            let text_of = |name: &str| -> Option<String> {
                core.and_then(|c| {
                    c.children()
                        .find(|n| n.is_element() && n.tag_name().name() == name)
                        .and_then(|n| n.text().map(str::to_string))
                })
            };
            ContextKind::Patient(PatientDemographics {
                given_name: text_of("Givenname"),
                family_name: text_of("Familyname"),
                sex: text_of("Sex"),
            })
        }
        "LocationContextState" => {
            let detail = node
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "LocationDetail");
            let attr_of = |name: &str| -> Option<String> {
                detail.and_then(|d| d.attribute(name).map(str::to_string))
            };
            ContextKind::Location(LocationDetail {
                facility: attr_of("Facility"),
                building: attr_of("Building"),
                floor: attr_of("Floor"),
                point_of_care: attr_of("PoC"),
                room: attr_of("Room"),
                bed: attr_of("Bed"),
            })
        }
        "EnsembleContextState" => ContextKind::Ensemble,
        other => return Err(format!("unknown context state type: {}", other)),
    })
}

/// Decode a state element of either flavor, dispatching on `xsi:type`.
pub fn decode_any_state(node: &roxmltree::Node, raw: Option<&str>) -> Result<AnyState, String> {
    let type_name = xsi_type_local(node)
        .ok_or_else(|| format!("<{}> without xsi:type", node.tag_name().name()))?;
    if type_name.ends_with("ContextState") && type_name != "SystemContextState" {
        let kind = decode_context_kind(node, type_name)?;
        let identifications = node
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "Identification")
            .map(|n| InstanceIdentifier {
                root: n.attribute("Root").map(str::to_string),
                extension: n.attribute("Extension").map(str::to_string),
            })
            .collect();
        let association = node
            .attribute("ContextAssociation")
            .and_then(ContextAssociation::from_wire)
            .unwrap_or(ContextAssociation::No);
        Ok(AnyState::Context(ContextState {
            handle: req_attr(node, "Handle")?.to_string(),
            descriptor_handle: req_attr(node, "DescriptorHandle")?.to_string(),
            descriptor_version: u64_attr_or(node, "DescriptorVersion", 0)?,
            version: u64_attr_or(node, "StateVersion", 0)?,
            association,
            binding_mdib_version: opt_u64(node, "BindingMdibVersion")?,
            unbinding_mdib_version: opt_u64(node, "UnbindingMdibVersion")?,
            identifications,
            kind,
            source: raw.and_then(|r| capture(node, r)),
        }))
    } else {
        let kind = decode_single_state_kind(node, type_name)?;
        Ok(AnyState::Single(State {
            descriptor_handle: req_attr(node, "DescriptorHandle")?.to_string(),
            descriptor_version: u64_attr_or(node, "DescriptorVersion", 0)?,
            version: u64_attr_or(node, "StateVersion", 0)?,
            kind,
            source: raw.and_then(|r| capture(node, r)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::ns;

    fn wrap(fragment: &str) -> String {
        format!(
            "<root xmlns:pm=\"{}\" xmlns:msg=\"{}\" xmlns:xsi=\"{}\">{}</root>",
            ns::PM,
            ns::MSG,
            ns::XSI,
            fragment
        )
    }

    fn first_element<'a>(doc: &'a roxmltree::Document<'a>) -> roxmltree::Node<'a, 'a> {
        doc.root_element()
            .first_element_child()
            .expect("wrapped fragment has a child")
    }

    fn roundtrip_state(s: &State, hint: Option<&DescriptorKind>) -> State {
        let mut w = XmlWriter::fragment();
        encode_state(&mut w, "pm:State", s, hint);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).expect("well-formed state");
        match decode_any_state(&first_element(&doc), None).expect("decodes") {
            AnyState::Single(state) => state,
            AnyState::Context(_) => panic!("expected single state"),
        }
    }

    #[test]
    fn test_numeric_metric_state_roundtrip() {
        let mut s = State::new("hr.num", StateKind::NumericMetric { value: None });
        s.version = 4;
        s.descriptor_version = 1;
        s.kind = StateKind::NumericMetric {
            value: Some(MetricValue::numeric(72.0, 1700000000000)),
        };
        let back = roundtrip_state(&s, None);
        assert_eq!(back, s);
    }

    #[test]
    fn test_numeric_value_lexical_form_preserved() {
        let xml = wrap(
            "<pm:State xsi:type=\"pm:NumericMetricState\" DescriptorHandle=\"hr\" \
             StateVersion=\"1\"><pm:MetricValue Value=\"72.50\">\
             <pm:MetricQuality Validity=\"Vld\"/></pm:MetricValue></pm:State>",
        );
        let doc = roxmltree::Document::parse(&xml).expect("well-formed");
        let decoded = decode_any_state(&first_element(&doc), Some(&xml)).expect("decodes");
        let AnyState::Single(state) = decoded else {
            panic!("expected single state")
        };
        // Re-encoding an untouched state replays the captured source.
        let mut w = XmlWriter::fragment();
        encode_state(&mut w, "pm:State", &state, None);
        assert!(
            w.finish().contains("Value=\"72.50\""),
            "source text with trailing zero must survive re-encode"
        );
    }

    #[test]
    fn test_context_state_roundtrip() {
        let mut s = ContextState::new(
            "pat.1",
            "pat",
            ContextKind::Patient(PatientDemographics {
                given_name: Some("Anna".to_string()),
                family_name: Some("Larsen".to_string()),
                sex: Some("F".to_string()),
            }),
        );
        s.association = ContextAssociation::Assoc;
        s.binding_mdib_version = Some(12);
        s.identifications.push(InstanceIdentifier {
            root: Some("urn:oid:1.2.3".to_string()),
            extension: Some("mrn-17".to_string()),
        });
        let mut w = XmlWriter::fragment();
        encode_context_state(&mut w, "pm:State", &s);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).expect("well-formed");
        let decoded = decode_any_state(&first_element(&doc), None).expect("decodes");
        assert_eq!(decoded, AnyState::Context(s));
    }

    #[test]
    fn test_sample_array_roundtrip() {
        let mut s = State::new("ecg", StateKind::RealTimeSampleArrayMetric { samples: None });
        s.kind = StateKind::RealTimeSampleArrayMetric {
            samples: Some(SampleArrayValue {
                samples: vec![Decimal::from(0.5), Decimal::from(-1.25), Decimal::from(3i64)],
                determination_time: Some(1700000000123),
                validity: Validity::Valid,
            }),
        };
        let back = roundtrip_state(&s, None);
        assert_eq!(back, s);
    }

    #[test]
    fn test_descriptor_roundtrip_flat() {
        let d = Descriptor::new(
            "hr.num",
            Some("chan0"),
            DescriptorKind::NumericMetric {
                common: MetricCommon::measurement("264864"),
                resolution: Decimal::from(1.0),
            },
        )
        .with_code(CodedValue::new("147842"));
        let mut w = XmlWriter::fragment();
        encode_descriptor(&mut w, &d, true);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).expect("well-formed");
        let back = decode_descriptor(&first_element(&doc), None, None).expect("decodes");
        assert_eq!(back, d);
        assert_eq!(back.parent.as_deref(), Some("chan0"));
    }

    #[test]
    fn test_operation_descriptor_roundtrip() {
        let d = Descriptor::new(
            "op.name",
            Some("sco0"),
            DescriptorKind::Operation {
                op: OperationKind::SetString,
                operation_target: "name.state".to_string(),
            },
        );
        let mut w = XmlWriter::fragment();
        encode_descriptor(&mut w, &d, true);
        let xml = wrap(&w.finish());
        let doc = roxmltree::Document::parse(&xml).expect("well-formed");
        let back = decode_descriptor(&first_element(&doc), None, None).expect("decodes");
        assert_eq!(back, d);
    }

    #[test]
    fn test_unknown_state_type_is_an_error() {
        let xml = wrap(
            "<pm:State xsi:type=\"pm:FancyNewState\" DescriptorHandle=\"x\" StateVersion=\"0\"/>",
        );
        let doc = roxmltree::Document::parse(&xml).expect("well-formed");
        assert!(decode_any_state(&first_element(&doc), None).is_err());
    }
}
