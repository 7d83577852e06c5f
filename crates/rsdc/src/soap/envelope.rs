// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP 1.2 envelope build and parse with the WS-Addressing 2005/08 header
//! block, SDC MDIB-version headers and the WS-Discovery AppSequence.

use crate::biceps::MdibVersionGroup;
use crate::error::{Error, Result};
use crate::names::{ns, WSA_ANONYMOUS};
use crate::xml::XmlWriter;

/// Opaque header element echoed back in notifications (reference
/// parameter). Stored shallow: namespace, local name, text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawElement {
    pub ns: String,
    pub local: String,
    pub text: String,
}

impl RawElement {
    pub fn new(ns: &str, local: &str, text: &str) -> Self {
        Self {
            ns: ns.to_string(),
            local: local.to_string(),
            text: text.to_string(),
        }
    }

    /// Serialize as a header element, optionally flagged as a reference
    /// parameter (`wsa:IsReferenceParameter="true"`).
    fn write(&self, w: &mut XmlWriter, as_reference_parameter: bool) {
        w.open(&self.local);
        if !self.ns.is_empty() {
            w.attr("xmlns", &self.ns);
        }
        if as_reference_parameter {
            w.attr("wsa:IsReferenceParameter", "true");
        }
        w.text(&self.text);
        w.close();
    }
}

/// WS-Discovery `AppSequence` header content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppSequence {
    pub instance_id: u64,
    pub message_number: u64,
}

/// Header block of an outgoing message.
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    pub action: String,
    pub to: Option<String>,
    /// Generated (`urn:uuid:...`) when `None`.
    pub message_id: Option<String>,
    pub relates_to: Option<String>,
    pub reply_to: Option<String>,
    /// Echoed with `wsa:IsReferenceParameter="true"`.
    pub reference_parameters: Vec<RawElement>,
    /// SDC MDIB headers on MDIB-carrying messages.
    pub version_group: Option<MdibVersionGroup>,
    /// Discovery messages only.
    pub app_sequence: Option<AppSequence>,
}

impl HeaderInfo {
    pub fn for_action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }

    pub fn with_to(mut self, to: &str) -> Self {
        self.to = Some(to.to_string());
        self
    }
}

/// Build a complete envelope document around a body fragment.
pub fn build_envelope(header: &HeaderInfo, body_fragment: &str) -> String {
    let mut w = XmlWriter::new();
    w.open("s12:Envelope");
    w.attr("xmlns:s12", ns::S12);
    w.attr("xmlns:wsa", ns::WSA);
    w.open("s12:Header");
    w.leaf_text("wsa:Action", &header.action);
    if let Some(to) = &header.to {
        w.leaf_text("wsa:To", to);
    }
    let message_id = header
        .message_id
        .clone()
        .unwrap_or_else(|| format!("urn:uuid:{}", uuid::Uuid::new_v4()));
    w.leaf_text("wsa:MessageID", &message_id);
    if let Some(relates_to) = &header.relates_to {
        w.leaf_text("wsa:RelatesTo", relates_to);
    }
    if let Some(reply_to) = &header.reply_to {
        w.open("wsa:ReplyTo");
        w.leaf_text("wsa:Address", reply_to);
        w.close();
    }
    for param in &header.reference_parameters {
        param.write(&mut w, true);
    }
    if let Some(vg) = &header.version_group {
        w.open("msg:MdibVersionGroup");
        w.attr("xmlns:msg", ns::MSG);
        w.attr("MdibVersion", &vg.mdib_version.to_string());
        w.attr("SequenceId", &vg.sequence_id);
        if let Some(id) = vg.instance_id {
            w.attr("InstanceId", &id.to_string());
        }
        w.close();
    }
    if let Some(seq) = &header.app_sequence {
        w.open("wsd:AppSequence");
        w.attr("xmlns:wsd", ns::WSD);
        w.attr("InstanceId", &seq.instance_id.to_string());
        w.attr("MessageNumber", &seq.message_number.to_string());
        w.close();
    }
    w.close(); // s12:Header
    w.open("s12:Body");
    if !body_fragment.is_empty() {
        w.raw(body_fragment);
    }
    w.close();
    w.finish()
}

/// Parsed inbound envelope. The raw document is retained; body access
/// re-parses on demand so handlers get a borrowed node without self-
/// referential lifetimes.
#[derive(Debug, Clone)]
pub struct ReceivedEnvelope {
    raw: String,
    pub action: String,
    pub message_id: Option<String>,
    pub relates_to: Option<String>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
    pub reference_parameters: Vec<RawElement>,
    pub version_group: Option<MdibVersionGroup>,
    pub app_sequence: Option<AppSequence>,
}

impl ReceivedEnvelope {
    /// Parse an envelope. `strict` additionally requires `wsa:MessageID`
    /// on requests and rejects unknown `mustUnderstand` headers.
    pub fn parse(raw: &str, strict: bool) -> Result<Self> {
        let doc = roxmltree::Document::parse(raw)
            .map_err(|e| Error::Envelope(format!("XML parse error: {}", e)))?;
        let root = doc.root_element();
        if root.tag_name().name() != "Envelope" || root.tag_name().namespace() != Some(ns::S12) {
            return Err(Error::Envelope("not a SOAP 1.2 envelope".to_string()));
        }
        let header = root
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Header");

        let mut action = None;
        let mut message_id = None;
        let mut relates_to = None;
        let mut to = None;
        let mut reply_to = None;
        let mut reference_parameters = Vec::new();
        let mut version_group = None;
        let mut app_sequence = None;

        if let Some(header) = header {
            for child in header.children().filter(|n| n.is_element()) {
                let child_ns = child.tag_name().namespace().unwrap_or("");
                let local = child.tag_name().name();
                match (child_ns, local) {
                    (ns::WSA, "Action") => action = child.text().map(str::to_string),
                    (ns::WSA, "MessageID") => message_id = child.text().map(str::to_string),
                    (ns::WSA, "RelatesTo") => relates_to = child.text().map(str::to_string),
                    (ns::WSA, "To") => to = child.text().map(str::to_string),
                    (ns::WSA, "ReplyTo") => {
                        reply_to = child
                            .children()
                            .find(|n| n.is_element() && n.tag_name().name() == "Address")
                            .and_then(|n| n.text().map(str::to_string));
                    }
                    (ns::MSG, "MdibVersionGroup") => {
                        version_group =
                            crate::biceps::reports::read_version_group(&child).ok();
                    }
                    (ns::WSD, "AppSequence") => {
                        let parse_u64 = |name: &str| {
                            child.attribute(name).and_then(|t| t.parse::<u64>().ok())
                        };
                        if let (Some(instance_id), Some(message_number)) =
                            (parse_u64("InstanceId"), parse_u64("MessageNumber"))
                        {
                            app_sequence = Some(AppSequence {
                                instance_id,
                                message_number,
                            });
                        }
                    }
                    _ => {
                        let is_ref_param = child
                            .attribute((ns::WSA, "IsReferenceParameter"))
                            .map(|v| v == "true" || v == "1")
                            .unwrap_or(false);
                        if is_ref_param {
                            reference_parameters.push(RawElement {
                                ns: child_ns.to_string(),
                                local: local.to_string(),
                                text: child.text().unwrap_or("").to_string(),
                            });
                        } else if strict
                            && child
                                .attribute((ns::S12, "mustUnderstand"))
                                .map(|v| v == "true" || v == "1")
                                .unwrap_or(false)
                        {
                            return Err(Error::Envelope(format!(
                                "unsupported mustUnderstand header: {}",
                                local
                            )));
                        }
                    }
                }
            }
        }

        let action = action.ok_or_else(|| Error::Envelope("missing wsa:Action".to_string()))?;
        if strict && message_id.is_none() && relates_to.is_none() {
            return Err(Error::Envelope("missing wsa:MessageID".to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            action,
            message_id,
            relates_to,
            to,
            reply_to,
            reference_parameters,
            version_group,
            app_sequence,
        })
    }

    /// Raw document text (for source-form capture downstream).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Run `f` on the first element inside `s12:Body` (None for an empty
    /// body) plus the raw text for source capture.
    pub fn with_body<T>(&self, f: impl FnOnce(Option<roxmltree::Node>, &str) -> T) -> T {
        // The document parsed during `parse()`; a failure here cannot
        // happen for a retained raw string.
        match roxmltree::Document::parse(&self.raw) {
            Ok(doc) => {
                let body = doc
                    .root_element()
                    .children()
                    .find(|n| n.is_element() && n.tag_name().name() == "Body")
                    .and_then(|b| b.children().find(|n| n.is_element()));
                f(body, &self.raw)
            }
            Err(_) => f(None, &self.raw),
        }
    }

    /// First reference parameter with the given local name, if any.
    pub fn reference_parameter(&self, local: &str) -> Option<&RawElement> {
        self.reference_parameters.iter().find(|p| p.local == local)
    }

    /// Reply target: `wsa:ReplyTo` or the anonymous address.
    pub fn reply_address(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(WSA_ANONYMOUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::actions;

    #[test]
    fn test_build_and_parse_roundtrip() {
        let header = HeaderInfo {
            action: actions::GET_MDIB.to_string(),
            to: Some("https://device.example/get".to_string()),
            message_id: Some("urn:uuid:aaaa".to_string()),
            reply_to: Some(WSA_ANONYMOUS.to_string()),
            ..HeaderInfo::default()
        };
        let raw = build_envelope(&header, "<msg:GetMdib xmlns:msg=\"x:msg\"/>");
        let parsed = ReceivedEnvelope::parse(&raw, true).expect("parses");
        assert_eq!(parsed.action, actions::GET_MDIB);
        assert_eq!(parsed.message_id.as_deref(), Some("urn:uuid:aaaa"));
        assert_eq!(parsed.to.as_deref(), Some("https://device.example/get"));
        assert_eq!(parsed.reply_address(), WSA_ANONYMOUS);
    }

    #[test]
    fn test_message_id_generated_when_absent() {
        let header = HeaderInfo::for_action(actions::GET_MDIB);
        let raw = build_envelope(&header, "");
        let parsed = ReceivedEnvelope::parse(&raw, false).expect("parses");
        assert!(parsed.message_id.expect("generated").starts_with("urn:uuid:"));
    }

    #[test]
    fn test_reference_parameters_roundtrip() {
        let mut header = HeaderInfo::for_action(actions::RENEW);
        header
            .reference_parameters
            .push(RawElement::new("urn:rsdc:subscription", "ident", "abc123"));
        let raw = build_envelope(&header, "");
        assert!(raw.contains("wsa:IsReferenceParameter=\"true\""));
        let parsed = ReceivedEnvelope::parse(&raw, false).expect("parses");
        let ident = parsed.reference_parameter("ident").expect("echoed");
        assert_eq!(ident.text, "abc123");
        assert_eq!(ident.ns, "urn:rsdc:subscription");
    }

    #[test]
    fn test_version_group_header_roundtrip() {
        let vg = MdibVersionGroup {
            mdib_version: 88,
            sequence_id: "urn:uuid:s".to_string(),
            instance_id: None,
        };
        let mut header = HeaderInfo::for_action(actions::EPISODIC_METRIC_REPORT);
        header.version_group = Some(vg.clone());
        let raw = build_envelope(&header, "");
        let parsed = ReceivedEnvelope::parse(&raw, false).expect("parses");
        assert_eq!(parsed.version_group, Some(vg));
    }

    #[test]
    fn test_app_sequence_roundtrip() {
        let mut header = HeaderInfo::for_action(actions::HELLO);
        header.app_sequence = Some(AppSequence {
            instance_id: 1700000000,
            message_number: 42,
        });
        let raw = build_envelope(&header, "");
        let parsed = ReceivedEnvelope::parse(&raw, false).expect("parses");
        assert_eq!(
            parsed.app_sequence,
            Some(AppSequence {
                instance_id: 1700000000,
                message_number: 42
            })
        );
    }

    #[test]
    fn test_missing_action_rejected() {
        let raw = "<?xml version=\"1.0\"?><s12:Envelope xmlns:s12=\"http://www.w3.org/2003/05/soap-envelope\"><s12:Header/><s12:Body/></s12:Envelope>";
        assert!(matches!(
            ReceivedEnvelope::parse(raw, false),
            Err(Error::Envelope(_))
        ));
    }

    #[test]
    fn test_strict_rejects_unknown_must_understand() {
        let raw = "<?xml version=\"1.0\"?>\
            <s12:Envelope xmlns:s12=\"http://www.w3.org/2003/05/soap-envelope\" \
            xmlns:wsa=\"http://www.w3.org/2005/08/addressing\">\
            <s12:Header><wsa:Action>x:action</wsa:Action>\
            <wsa:MessageID>urn:uuid:m</wsa:MessageID>\
            <x:Strange xmlns:x=\"x:ns\" s12:mustUnderstand=\"true\"/>\
            </s12:Header><s12:Body/></s12:Envelope>";
        assert!(ReceivedEnvelope::parse(raw, true).is_err());
        assert!(ReceivedEnvelope::parse(raw, false).is_ok());
    }
}
