// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message-model bodies: reports, set-service requests, get-service results.
//!
//! Everything here is a body fragment; the SOAP envelope (and its namespace
//! context) is added by the dispatcher. Fragments declare `msg`/`pm`/`xsi`
//! on their root element so they stay self-contained.

use super::codec::{
    decode_any_state, decode_descriptor, descriptor_children, encode_context_state,
    encode_descriptor, encode_state, open_descriptor, AnyState,
};
use super::{CodedValue, ContextState, Descriptor, Handle, MdibVersionGroup, State};
use crate::mdib::MdibSnapshot;
use crate::names::{actions, ns};
use crate::xml::{Decimal, XmlWriter};

/// Invocation lifecycle of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Wait,
    Start,
    Fin,
    Fail,
}

impl InvocationState {
    pub fn as_wire(self) -> &'static str {
        match self {
            InvocationState::Wait => "Wait",
            InvocationState::Start => "Start",
            InvocationState::Fin => "Fin",
            InvocationState::Fail => "Fail",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        Some(match text {
            "Wait" => InvocationState::Wait,
            "Start" => InvocationState::Start,
            "Fin" => InvocationState::Fin,
            "Fail" => InvocationState::Fail,
            _ => return None,
        })
    }

    /// Terminal states end the asynchronous lifecycle.
    pub fn is_final(self) -> bool {
        matches!(self, InvocationState::Fin | InvocationState::Fail)
    }
}

/// `msg:InvocationInfo` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationInfo {
    pub transaction_id: u64,
    pub state: InvocationState,
    /// `Unspec`, `Unkn`, `Inv`, `Oth` when `state == Fail`.
    pub error: Option<String>,
    pub error_message: Option<String>,
}

impl InvocationInfo {
    pub fn ok(transaction_id: u64, state: InvocationState) -> Self {
        Self {
            transaction_id,
            state,
            error: None,
            error_message: None,
        }
    }

    pub fn failed(transaction_id: u64, error: &str, message: Option<&str>) -> Self {
        Self {
            transaction_id,
            state: InvocationState::Fail,
            error: Some(error.to_string()),
            error_message: message.map(str::to_string),
        }
    }
}

/// One part of an `OperationInvokedReport`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReportPart {
    pub operation_handle: Handle,
    /// Descriptor/state actually affected; mandatory on the final report.
    pub operation_target: Option<Handle>,
    pub info: InvocationInfo,
}

/// Descriptor modification kind (`msg:ReportPart/@ModificationType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modification {
    Created,
    Updated,
    Deleted,
}

impl Modification {
    pub fn as_wire(self) -> &'static str {
        match self {
            Modification::Created => "Crt",
            Modification::Updated => "Upt",
            Modification::Deleted => "Del",
        }
    }

    pub fn from_wire(text: &str) -> Option<Self> {
        Some(match text {
            "Crt" => Modification::Created,
            "Upt" => Modification::Updated,
            "Del" => Modification::Deleted,
            _ => return None,
        })
    }
}

/// One part of a `DescriptionModificationReport`: one descriptor (flat form)
/// plus its current states.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionPart {
    pub modification: Modification,
    pub descriptor: Descriptor,
    pub states: Vec<State>,
    pub context_states: Vec<ContextState>,
}

/// `msg:SystemErrorReport` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemError {
    pub code: CodedValue,
    pub info: Option<String>,
}

/// Typed body of any subscription-delivered report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportBody {
    Metrics(Vec<State>),
    Alerts(Vec<State>),
    Components(Vec<State>),
    Operational(Vec<State>),
    Contexts(Vec<ContextState>),
    Waveform(Vec<State>),
    Description(Vec<DescriptionPart>),
    OperationInvoked(Vec<InvocationReportPart>),
    SystemError(Vec<SystemError>),
}

impl ReportBody {
    /// Report element local name for an action URI.
    pub fn element_name(action: &str) -> Option<&'static str> {
        Some(match action {
            actions::EPISODIC_METRIC_REPORT => "EpisodicMetricReport",
            actions::EPISODIC_ALERT_REPORT => "EpisodicAlertReport",
            actions::EPISODIC_COMPONENT_REPORT => "EpisodicComponentReport",
            actions::EPISODIC_OPERATIONAL_STATE_REPORT => "EpisodicOperationalStateReport",
            actions::EPISODIC_CONTEXT_REPORT => "EpisodicContextReport",
            actions::DESCRIPTION_MODIFICATION_REPORT => "DescriptionModificationReport",
            actions::WAVEFORM_STREAM => "WaveformStream",
            actions::OPERATION_INVOKED_REPORT => "OperationInvokedReport",
            actions::SYSTEM_ERROR_REPORT => "SystemErrorReport",
            _ => return None,
        })
    }

    /// Per-family state slot inside a report part.
    fn state_slot(action: &str) -> &'static str {
        match action {
            actions::EPISODIC_METRIC_REPORT => "msg:MetricState",
            actions::EPISODIC_ALERT_REPORT => "msg:AlertState",
            actions::EPISODIC_COMPONENT_REPORT => "msg:ComponentState",
            actions::EPISODIC_OPERATIONAL_STATE_REPORT => "msg:OperationState",
            actions::EPISODIC_CONTEXT_REPORT => "msg:ContextState",
            _ => "msg:State",
        }
    }
}

fn open_report_root(w: &mut XmlWriter, elem: &str, vg: &MdibVersionGroup) {
    w.open(&format!("msg:{}", elem));
    w.attr("xmlns:msg", ns::MSG);
    w.attr("xmlns:pm", ns::PM);
    w.attr("xmlns:xsi", ns::XSI);
    write_version_group(w, vg);
}

/// Write the version attributes shared by reports and get-responses.
pub fn write_version_group(w: &mut XmlWriter, vg: &MdibVersionGroup) {
    w.attr("MdibVersion", &vg.mdib_version.to_string());
    w.attr("SequenceId", &vg.sequence_id);
    if let Some(id) = vg.instance_id {
        w.attr("InstanceId", &id.to_string());
    }
}

/// Read the version attributes back.
pub fn read_version_group(node: &roxmltree::Node) -> Result<MdibVersionGroup, String> {
    let mdib_version = node
        .attribute("MdibVersion")
        .ok_or_else(|| format!("<{}> missing @MdibVersion", node.tag_name().name()))?
        .parse::<u64>()
        .map_err(|_| "@MdibVersion is not an unsigned integer".to_string())?;
    let sequence_id = node
        .attribute("SequenceId")
        .ok_or_else(|| format!("<{}> missing @SequenceId", node.tag_name().name()))?
        .to_string();
    let instance_id = match node.attribute("InstanceId") {
        None => None,
        Some(text) => Some(
            text.parse::<u64>()
                .map_err(|_| "@InstanceId is not an unsigned integer".to_string())?,
        ),
    };
    Ok(MdibVersionGroup {
        mdib_version,
        sequence_id,
        instance_id,
    })
}

/// Encode a report body fragment for `action`.
pub fn encode_report(action: &str, body: &ReportBody, vg: &MdibVersionGroup) -> String {
    let elem = ReportBody::element_name(action).unwrap_or("EpisodicMetricReport");
    let mut w = XmlWriter::fragment();
    open_report_root(&mut w, elem, vg);
    match body {
        ReportBody::Metrics(states)
        | ReportBody::Alerts(states)
        | ReportBody::Components(states)
        | ReportBody::Operational(states) => {
            w.open("msg:ReportPart");
            for s in states {
                encode_state(&mut w, ReportBody::state_slot(action), s, None);
            }
            w.close();
        }
        ReportBody::Contexts(states) => {
            w.open("msg:ReportPart");
            for s in states {
                encode_context_state(&mut w, "msg:ContextState", s);
            }
            w.close();
        }
        ReportBody::Waveform(states) => {
            for s in states {
                encode_state(&mut w, "msg:State", s, None);
            }
        }
        ReportBody::Description(parts) => {
            for part in parts {
                w.open("msg:ReportPart");
                w.attr("ModificationType", part.modification.as_wire());
                w.attr_opt("ParentDescriptor", part.descriptor.parent.as_deref());
                encode_descriptor(&mut w, &part.descriptor, true);
                for s in &part.states {
                    encode_state(&mut w, "msg:State", s, None);
                }
                for s in &part.context_states {
                    encode_context_state(&mut w, "msg:State", s);
                }
                w.close();
            }
        }
        ReportBody::OperationInvoked(parts) => {
            for part in parts {
                w.open("msg:ReportPart");
                w.attr("OperationHandleRef", &part.operation_handle);
                w.attr_opt("OperationTargetRef", part.operation_target.as_deref());
                encode_invocation_info(&mut w, &part.info);
                w.open("msg:InvocationSource");
                w.attr("Root", ns::SDC);
                w.attr("Extension", "AnonymousSdcParticipant");
                w.close();
                w.close();
            }
        }
        ReportBody::SystemError(errors) => {
            for e in errors {
                w.open("msg:ReportPart");
                w.open("msg:ErrorCode");
                w.attr("Code", &e.code.code);
                w.attr_opt("CodingSystem", e.code.coding_system.as_deref());
                w.close();
                if let Some(info) = &e.info {
                    w.leaf_text("msg:ErrorInfo", info);
                }
                w.close();
            }
        }
    }
    w.finish()
}

fn encode_invocation_info(w: &mut XmlWriter, info: &InvocationInfo) {
    w.open("msg:InvocationInfo");
    w.attr("TransactionId", &info.transaction_id.to_string());
    w.attr("InvocationState", info.state.as_wire());
    if let Some(error) = &info.error {
        w.leaf_text("msg:InvocationError", error);
    }
    if let Some(message) = &info.error_message {
        w.leaf_text("msg:InvocationErrorMessage", message);
    }
    w.close();
}

fn decode_invocation_info(part: &roxmltree::Node) -> Result<InvocationInfo, String> {
    let info = part
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "InvocationInfo")
        .ok_or_else(|| "ReportPart missing msg:InvocationInfo".to_string())?;
    let transaction_id = info
        .attribute("TransactionId")
        .ok_or_else(|| "InvocationInfo missing @TransactionId".to_string())?
        .parse::<u64>()
        .map_err(|_| "@TransactionId is not an unsigned integer".to_string())?;
    let state = info
        .attribute("InvocationState")
        .and_then(InvocationState::from_wire)
        .ok_or_else(|| "InvocationInfo missing/invalid @InvocationState".to_string())?;
    let text_of = |name: &str| {
        info.children()
            .find(|n| n.is_element() && n.tag_name().name() == name)
            .and_then(|n| n.text().map(str::to_string))
    };
    Ok(InvocationInfo {
        transaction_id,
        state,
        error: text_of("InvocationError"),
        error_message: text_of("InvocationErrorMessage"),
    })
}

fn state_children<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
) -> Vec<roxmltree::Node<'a, 'input>> {
    // Any element child whose xsi:type names a state type. Dispatching on
    // the type (not the slot name) keeps preserved source blobs decodable
    // when they re-surface under their original slot, and keeps descriptor
    // elements (which also carry xsi:type) out of report parts.
    node.children()
        .filter(|n| {
            n.is_element()
                && n.attribute((ns::XSI, "type"))
                    .map(|t| t.rsplit(':').next().unwrap_or(t).ends_with("State"))
                    .unwrap_or(false)
        })
        .collect()
}

/// Decode a report body for `action`. `raw` is the full document text for
/// source-form capture.
pub fn decode_report(
    action: &str,
    report: &roxmltree::Node,
    raw: &str,
) -> Result<ReportBody, String> {
    let parts: Vec<roxmltree::Node> = report
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "ReportPart")
        .collect();
    match action {
        actions::EPISODIC_METRIC_REPORT
        | actions::EPISODIC_ALERT_REPORT
        | actions::EPISODIC_COMPONENT_REPORT
        | actions::EPISODIC_OPERATIONAL_STATE_REPORT => {
            let mut states = Vec::new();
            for part in &parts {
                for child in state_children(part) {
                    match decode_any_state(&child, Some(raw))? {
                        AnyState::Single(s) => states.push(s),
                        AnyState::Context(_) => {
                            return Err("context state in a single-state report".to_string())
                        }
                    }
                }
            }
            Ok(match action {
                actions::EPISODIC_METRIC_REPORT => ReportBody::Metrics(states),
                actions::EPISODIC_ALERT_REPORT => ReportBody::Alerts(states),
                actions::EPISODIC_COMPONENT_REPORT => ReportBody::Components(states),
                _ => ReportBody::Operational(states),
            })
        }
        actions::EPISODIC_CONTEXT_REPORT => {
            let mut states = Vec::new();
            for part in &parts {
                for child in state_children(part) {
                    match decode_any_state(&child, Some(raw))? {
                        AnyState::Context(s) => states.push(s),
                        AnyState::Single(_) => {
                            return Err("single-state in a context report".to_string())
                        }
                    }
                }
            }
            Ok(ReportBody::Contexts(states))
        }
        actions::WAVEFORM_STREAM => {
            let mut states = Vec::new();
            for child in state_children(report) {
                match decode_any_state(&child, Some(raw))? {
                    AnyState::Single(s) => states.push(s),
                    AnyState::Context(_) => {
                        return Err("context state in a waveform stream".to_string())
                    }
                }
            }
            Ok(ReportBody::Waveform(states))
        }
        actions::DESCRIPTION_MODIFICATION_REPORT => {
            let mut out = Vec::new();
            for part in &parts {
                let modification = part
                    .attribute("ModificationType")
                    .and_then(Modification::from_wire)
                    .unwrap_or(Modification::Updated);
                let descriptor_node = descriptor_children(part)
                    .into_iter()
                    .next()
                    .ok_or_else(|| "ReportPart without a descriptor".to_string())?;
                let descriptor = decode_descriptor(&descriptor_node, None, Some(raw))?;
                let mut states = Vec::new();
                let mut context_states = Vec::new();
                for child in state_children(part) {
                    match decode_any_state(&child, Some(raw))? {
                        AnyState::Single(s) => states.push(s),
                        AnyState::Context(s) => context_states.push(s),
                    }
                }
                out.push(DescriptionPart {
                    modification,
                    descriptor,
                    states,
                    context_states,
                });
            }
            Ok(ReportBody::Description(out))
        }
        actions::OPERATION_INVOKED_REPORT => {
            let mut out = Vec::new();
            for part in &parts {
                out.push(InvocationReportPart {
                    operation_handle: part
                        .attribute("OperationHandleRef")
                        .ok_or_else(|| "ReportPart missing @OperationHandleRef".to_string())?
                        .to_string(),
                    operation_target: part.attribute("OperationTargetRef").map(str::to_string),
                    info: decode_invocation_info(part)?,
                });
            }
            Ok(ReportBody::OperationInvoked(out))
        }
        actions::SYSTEM_ERROR_REPORT => {
            let mut out = Vec::new();
            for part in &parts {
                let code = part
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == "ErrorCode")
                    .ok_or_else(|| "ReportPart missing msg:ErrorCode".to_string())?;
                out.push(SystemError {
                    code: CodedValue {
                        code: code
                            .attribute("Code")
                            .ok_or_else(|| "ErrorCode missing @Code".to_string())?
                            .to_string(),
                        coding_system: code.attribute("CodingSystem").map(str::to_string),
                    },
                    info: part
                        .children()
                        .find(|n| n.is_element() && n.tag_name().name() == "ErrorInfo")
                        .and_then(|n| n.text().map(str::to_string)),
                });
            }
            Ok(ReportBody::SystemError(out))
        }
        other => Err(format!("not a report action: {}", other)),
    }
}

// ========================================================================
// GetService bodies
// ========================================================================

/// Fully decoded MDIB contents (flat, document order).
#[derive(Debug, Clone, Default)]
pub struct DecodedMdib {
    pub descriptors: Vec<Descriptor>,
    pub states: Vec<State>,
    pub context_states: Vec<ContextState>,
}

/// Encode a complete `GetMdibResponse` body from a snapshot.
pub fn encode_get_mdib_response(snapshot: &MdibSnapshot) -> String {
    let mut w = XmlWriter::fragment();
    w.open("msg:GetMdibResponse");
    w.attr("xmlns:msg", ns::MSG);
    w.attr("xmlns:pm", ns::PM);
    w.attr("xmlns:xsi", ns::XSI);
    write_version_group(&mut w, snapshot.version_group());
    w.open("msg:Mdib");
    write_version_group(&mut w, snapshot.version_group());

    w.open("pm:MdDescription");
    for root in snapshot.roots() {
        encode_descriptor_tree(&mut w, snapshot, root);
    }
    w.close();

    w.open("pm:MdState");
    encode_md_state_inner(&mut w, snapshot, None);
    w.close();

    w.close(); // msg:Mdib
    w.finish()
}

fn encode_descriptor_tree(w: &mut XmlWriter, snapshot: &MdibSnapshot, handle: &str) {
    let Some(d) = snapshot.descriptor(handle) else {
        return;
    };
    open_descriptor(w, d, false);
    for child in snapshot.children(handle) {
        encode_descriptor_tree(w, snapshot, child);
    }
    w.close();
}

/// Write `pm:State` entries, optionally restricted to `handles`.
fn encode_md_state_inner(w: &mut XmlWriter, snapshot: &MdibSnapshot, handles: Option<&[Handle]>) {
    let wanted = |h: &str| handles.map(|hs| hs.iter().any(|x| x == h)).unwrap_or(true);
    for (handle, state) in snapshot.states_in_order() {
        if wanted(handle) {
            let hint = snapshot.descriptor(handle).map(|d| &d.kind);
            encode_state(w, "pm:State", state, hint);
        }
    }
    for cs in snapshot.context_states_in_order() {
        if wanted(&cs.descriptor_handle) || wanted(&cs.handle) {
            encode_context_state(w, "pm:State", cs);
        }
    }
}

/// Encode a `GetMdStateResponse` body (all states, or the subset named by
/// `handles`).
pub fn encode_get_md_state_response(snapshot: &MdibSnapshot, handles: Option<&[Handle]>) -> String {
    let mut w = XmlWriter::fragment();
    w.open("msg:GetMdStateResponse");
    w.attr("xmlns:msg", ns::MSG);
    w.attr("xmlns:pm", ns::PM);
    w.attr("xmlns:xsi", ns::XSI);
    write_version_group(&mut w, snapshot.version_group());
    w.open("msg:MdState");
    encode_md_state_inner(&mut w, snapshot, handles);
    w.close();
    w.finish()
}

/// Encode a `GetMdDescriptionResponse` body.
pub fn encode_get_md_description_response(snapshot: &MdibSnapshot) -> String {
    let mut w = XmlWriter::fragment();
    w.open("msg:GetMdDescriptionResponse");
    w.attr("xmlns:msg", ns::MSG);
    w.attr("xmlns:pm", ns::PM);
    w.attr("xmlns:xsi", ns::XSI);
    write_version_group(&mut w, snapshot.version_group());
    w.open("msg:MdDescription");
    for root in snapshot.roots() {
        encode_descriptor_tree(&mut w, snapshot, root);
    }
    w.close();
    w.finish()
}

/// Encode a `GetContextStatesResponse` body.
pub fn encode_get_context_states_response(
    snapshot: &MdibSnapshot,
    handles: Option<&[Handle]>,
) -> String {
    let wanted =
        |h: &str, own: &str| handles.map(|hs| hs.iter().any(|x| x == h || x == own)).unwrap_or(true);
    let mut w = XmlWriter::fragment();
    w.open("msg:GetContextStatesResponse");
    w.attr("xmlns:msg", ns::MSG);
    w.attr("xmlns:pm", ns::PM);
    w.attr("xmlns:xsi", ns::XSI);
    write_version_group(&mut w, snapshot.version_group());
    for cs in snapshot.context_states_in_order() {
        if wanted(&cs.descriptor_handle, &cs.handle) {
            encode_context_state(&mut w, "msg:ContextState", cs);
        }
    }
    w.finish()
}

/// Decode the `msg:Mdib` inside a `GetMdibResponse` (or a standalone Mdib
/// document) into flat lists. Parent handles are assigned from nesting.
pub fn decode_mdib(mdib_node: &roxmltree::Node, raw: &str) -> Result<DecodedMdib, String> {
    let mut out = DecodedMdib::default();
    if let Some(description) = mdib_node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "MdDescription")
    {
        for root in descriptor_children(&description) {
            decode_descriptor_tree(&root, None, &mut out)?;
        }
    }
    if let Some(md_state) = mdib_node
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "MdState")
    {
        for child in state_children(&md_state) {
            match decode_any_state(&child, Some(raw))? {
                AnyState::Single(s) => out.states.push(s),
                AnyState::Context(s) => out.context_states.push(s),
            }
        }
    }
    Ok(out)
}

fn decode_descriptor_tree(
    node: &roxmltree::Node,
    parent: Option<&str>,
    out: &mut DecodedMdib,
) -> Result<(), String> {
    // Nested form: no source capture, the range would include children.
    let d = decode_descriptor(node, parent, None)?;
    let handle = d.handle.clone();
    out.descriptors.push(d);
    for child in descriptor_children(node) {
        decode_descriptor_tree(&child, Some(&handle), out)?;
    }
    Ok(())
}

// ========================================================================
// SetService bodies
// ========================================================================

/// Typed set-service request.
#[derive(Debug, Clone, PartialEq)]
pub enum SetRequest {
    SetValue { operation: Handle, value: Decimal },
    SetString { operation: Handle, value: String },
    Activate { operation: Handle, args: Vec<String> },
    SetMetricState { operation: Handle, states: Vec<State> },
    SetComponentState { operation: Handle, states: Vec<State> },
    SetAlertState { operation: Handle, states: Vec<State> },
    SetContextState { operation: Handle, states: Vec<ContextState> },
}

impl SetRequest {
    /// Request action URI.
    pub fn action(&self) -> &'static str {
        match self {
            SetRequest::SetValue { .. } => actions::SET_VALUE,
            SetRequest::SetString { .. } => actions::SET_STRING,
            SetRequest::Activate { .. } => actions::ACTIVATE,
            SetRequest::SetMetricState { .. } => actions::SET_METRIC_STATE,
            SetRequest::SetComponentState { .. } => actions::SET_COMPONENT_STATE,
            SetRequest::SetAlertState { .. } => actions::SET_ALERT_STATE,
            SetRequest::SetContextState { .. } => actions::SET_CONTEXT_STATE,
        }
    }

    /// Handle of the operation descriptor being invoked.
    pub fn operation_handle(&self) -> &str {
        match self {
            SetRequest::SetValue { operation, .. }
            | SetRequest::SetString { operation, .. }
            | SetRequest::Activate { operation, .. }
            | SetRequest::SetMetricState { operation, .. }
            | SetRequest::SetComponentState { operation, .. }
            | SetRequest::SetAlertState { operation, .. }
            | SetRequest::SetContextState { operation, .. } => operation,
        }
    }

    /// Request element local name (`SetValue`, `SetString`, ...); the
    /// response element is this plus `Response`.
    pub fn element_name(&self) -> &'static str {
        match self {
            SetRequest::SetValue { .. } => "SetValue",
            SetRequest::SetString { .. } => "SetString",
            SetRequest::Activate { .. } => "Activate",
            SetRequest::SetMetricState { .. } => "SetMetricState",
            SetRequest::SetComponentState { .. } => "SetComponentState",
            SetRequest::SetAlertState { .. } => "SetAlertState",
            SetRequest::SetContextState { .. } => "SetContextState",
        }
    }

    /// Encode the request body fragment.
    pub fn encode(&self) -> String {
        let mut w = XmlWriter::fragment();
        w.open(&format!("msg:{}", self.element_name()));
        w.attr("xmlns:msg", ns::MSG);
        w.attr("xmlns:pm", ns::PM);
        w.attr("xmlns:xsi", ns::XSI);
        w.attr("OperationHandleRef", self.operation_handle());
        match self {
            SetRequest::SetValue { value, .. } => {
                w.leaf_text("msg:RequestedNumericValue", value.as_text());
            }
            SetRequest::SetString { value, .. } => {
                w.leaf_text("msg:RequestedStringValue", value);
            }
            SetRequest::Activate { args, .. } => {
                for arg in args {
                    w.open("msg:Argument");
                    w.leaf_text("msg:ArgValue", arg);
                    w.close();
                }
            }
            SetRequest::SetMetricState { states, .. } => {
                for s in states {
                    encode_state(&mut w, "msg:ProposedMetricState", s, None);
                }
            }
            SetRequest::SetComponentState { states, .. } => {
                for s in states {
                    encode_state(&mut w, "msg:ProposedComponentState", s, None);
                }
            }
            SetRequest::SetAlertState { states, .. } => {
                for s in states {
                    encode_state(&mut w, "msg:ProposedAlertState", s, None);
                }
            }
            SetRequest::SetContextState { states, .. } => {
                for s in states {
                    encode_context_state(&mut w, "msg:ProposedContextState", s);
                }
            }
        }
        w.finish()
    }

    /// Decode a request body by action URI.
    pub fn decode(action: &str, body: &roxmltree::Node, raw: &str) -> Result<Self, String> {
        let operation = body
            .attribute("OperationHandleRef")
            .ok_or_else(|| "set request missing @OperationHandleRef".to_string())?
            .to_string();
        let text_of = |name: &str| {
            body.children()
                .find(|n| n.is_element() && n.tag_name().name() == name)
                .and_then(|n| n.text().map(str::to_string))
        };
        let single_states = || -> Result<Vec<State>, String> {
            let mut out = Vec::new();
            for child in state_children(body) {
                match decode_any_state(&child, Some(raw))? {
                    AnyState::Single(s) => out.push(s),
                    AnyState::Context(_) => {
                        return Err("context state in a single-state set request".to_string())
                    }
                }
            }
            Ok(out)
        };
        Ok(match action {
            actions::SET_VALUE => SetRequest::SetValue {
                operation,
                value: text_of("RequestedNumericValue")
                    .and_then(|t| Decimal::parse(&t))
                    .ok_or_else(|| "SetValue missing RequestedNumericValue".to_string())?,
            },
            actions::SET_STRING => SetRequest::SetString {
                operation,
                value: text_of("RequestedStringValue")
                    .ok_or_else(|| "SetString missing RequestedStringValue".to_string())?,
            },
            actions::ACTIVATE => SetRequest::Activate {
                operation,
                args: body
                    .descendants()
                    .filter(|n| n.is_element() && n.tag_name().name() == "ArgValue")
                    .filter_map(|n| n.text().map(str::to_string))
                    .collect(),
            },
            actions::SET_METRIC_STATE => SetRequest::SetMetricState {
                operation,
                states: single_states()?,
            },
            actions::SET_COMPONENT_STATE => SetRequest::SetComponentState {
                operation,
                states: single_states()?,
            },
            actions::SET_ALERT_STATE => SetRequest::SetAlertState {
                operation,
                states: single_states()?,
            },
            actions::SET_CONTEXT_STATE => {
                let mut states = Vec::new();
                for child in state_children(body) {
                    match decode_any_state(&child, Some(raw))? {
                        AnyState::Context(s) => states.push(s),
                        AnyState::Single(_) => {
                            return Err("single-state in SetContextState".to_string())
                        }
                    }
                }
                SetRequest::SetContextState { operation, states }
            }
            other => return Err(format!("not a set-service action: {}", other)),
        })
    }
}

/// Immediate response of any set-service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetResponse {
    pub version_group: MdibVersionGroup,
    pub info: InvocationInfo,
}

impl SetResponse {
    /// Encode as `<msg:{RequestName}Response>`.
    pub fn encode(&self, request_element: &str) -> String {
        let mut w = XmlWriter::fragment();
        w.open(&format!("msg:{}Response", request_element));
        w.attr("xmlns:msg", ns::MSG);
        write_version_group(&mut w, &self.version_group);
        encode_invocation_info(&mut w, &self.info);
        w.finish()
    }

    /// Decode from a response body element.
    pub fn decode(body: &roxmltree::Node) -> Result<Self, String> {
        Ok(Self {
            version_group: read_version_group(body)?,
            info: decode_invocation_info(body)?,
        })
    }
}

/// Decode `msg:HandleRef` children (GetMdState / GetContextStates requests).
pub fn decode_handle_refs(body: &roxmltree::Node) -> Vec<Handle> {
    body.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "HandleRef")
        .filter_map(|n| n.text().map(str::to_string))
        .collect()
}

/// Encode a request body with `msg:HandleRef` children.
pub fn encode_handle_refs(element: &str, handles: &[Handle]) -> String {
    let mut w = XmlWriter::fragment();
    w.open(&format!("msg:{}", element));
    w.attr("xmlns:msg", ns::MSG);
    for h in handles {
        w.leaf_text("msg:HandleRef", h);
    }
    w.finish()
}
