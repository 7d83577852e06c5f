// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SOAP 1.2 fault encoding and the WS-* subcodes the stack produces.

use crate::names::ns;
use crate::xml::XmlWriter;

/// Action URI carried by fault responses (WS-Addressing 2005/08).
pub const FAULT_ACTION: &str = "http://www.w3.org/2005/08/addressing/soap/fault";

/// `s12:Code/s12:Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Sender-side problem (malformed request, unknown action).
    Sender,
    /// Receiver-side problem (internal failure).
    Receiver,
}

impl FaultCode {
    fn as_wire(self) -> &'static str {
        match self {
            FaultCode::Sender => "s12:Sender",
            FaultCode::Receiver => "s12:Receiver",
        }
    }
}

/// SOAP fault descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    /// Prefixed subcode value (`wsa:ActionNotSupported`, `wse:...`).
    pub subcode: Option<String>,
    pub reason: String,
    pub detail: Option<String>,
}

impl Fault {
    pub fn sender(reason: &str) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: None,
            reason: reason.to_string(),
            detail: None,
        }
    }

    pub fn receiver(reason: &str) -> Self {
        Self {
            code: FaultCode::Receiver,
            subcode: None,
            reason: reason.to_string(),
            detail: None,
        }
    }

    /// `wsa:ActionNotSupported` for an unroutable request.
    pub fn action_not_supported(action: &str) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: Some("wsa:ActionNotSupported".to_string()),
            reason: format!("action not supported: {}", action),
            detail: Some(action.to_string()),
        }
    }

    /// WS-Eventing: subscription id is not (or no longer) known.
    pub fn unknown_subscription(id: &str) -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: Some("wse:UnknownSubscription".to_string()),
            reason: "subscription is not known".to_string(),
            detail: Some(id.to_string()),
        }
    }

    /// WS-Eventing: requested expiration is unusable.
    pub fn invalid_expiration_time() -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: Some("wse:InvalidExpirationTime".to_string()),
            reason: "requested expiration is invalid".to_string(),
            detail: None,
        }
    }

    /// WS-Eventing: requested delivery mode not offered.
    pub fn delivery_mode_unavailable() -> Self {
        Self {
            code: FaultCode::Sender,
            subcode: Some("wse:DeliveryModeRequestedUnavailable".to_string()),
            reason: "requested delivery mode is not supported".to_string(),
            detail: None,
        }
    }

    /// WS-Eventing: source cannot process the subscribe request.
    pub fn event_source_unable(reason: &str) -> Self {
        Self {
            code: FaultCode::Receiver,
            subcode: Some("wse:EventSourceUnableToProcess".to_string()),
            reason: reason.to_string(),
            detail: None,
        }
    }

    /// Does this fault carry the given subcode local name?
    pub fn has_subcode(&self, local: &str) -> bool {
        self.subcode
            .as_deref()
            .map(|s| s.rsplit(':').next() == Some(local))
            .unwrap_or(false)
    }

    /// Consumer-side renew handling keys on this.
    pub fn is_unknown_subscription(&self) -> bool {
        self.has_subcode("UnknownSubscription")
    }

    /// Encode as an `s12:Fault` body fragment. The `wsa`/`wse` prefixes for
    /// subcode values are declared locally so the fragment is
    /// self-contained.
    pub fn encode_body(&self) -> String {
        let mut w = XmlWriter::fragment();
        w.open("s12:Fault");
        w.attr("xmlns:s12", ns::S12);
        w.attr("xmlns:wsa", ns::WSA);
        w.attr("xmlns:wse", ns::WSE);
        w.open("s12:Code");
        w.leaf_text("s12:Value", self.code.as_wire());
        if let Some(subcode) = &self.subcode {
            w.open("s12:Subcode");
            w.leaf_text("s12:Value", subcode);
            w.close();
        }
        w.close();
        w.open("s12:Reason");
        w.open("s12:Text");
        w.attr("xml:lang", "en");
        w.text(&self.reason);
        w.close();
        w.close();
        if let Some(detail) = &self.detail {
            w.open("s12:Detail");
            w.text(detail);
            w.close();
        }
        w.close();
        w.finish()
    }

    /// Decode a fault from a body element; `None` when the element is not
    /// an `s12:Fault`.
    pub fn decode(body: &roxmltree::Node) -> Option<Fault> {
        if body.tag_name().name() != "Fault" {
            return None;
        }
        let code_elem = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Code");
        let value_text = |parent: &roxmltree::Node| -> Option<String> {
            parent
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "Value")
                .and_then(|n| n.text().map(str::to_string))
        };
        let code = match code_elem.as_ref().and_then(value_text).as_deref() {
            Some(text) if text.ends_with("Receiver") => FaultCode::Receiver,
            _ => FaultCode::Sender,
        };
        let subcode = code_elem
            .and_then(|c| {
                c.children()
                    .find(|n| n.is_element() && n.tag_name().name() == "Subcode")
            })
            .as_ref()
            .and_then(value_text);
        let reason = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Reason")
            .and_then(|r| {
                r.children()
                    .find(|n| n.is_element() && n.tag_name().name() == "Text")
                    .and_then(|n| n.text().map(str::to_string))
            })
            .unwrap_or_else(|| "unspecified fault".to_string());
        let detail = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Detail")
            .and_then(|n| n.text().map(str::to_string));
        Some(Fault {
            code,
            subcode,
            reason,
            detail,
        })
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subcode {
            Some(subcode) => write!(f, "[{}] {}", subcode, self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(fault: &Fault) -> Fault {
        let body = fault.encode_body();
        let doc = roxmltree::Document::parse(&body).expect("well-formed fault");
        Fault::decode(&doc.root_element()).expect("is a fault")
    }

    #[test]
    fn test_fault_roundtrip() {
        let fault = Fault::action_not_supported("x:unknown");
        let back = roundtrip(&fault);
        assert_eq!(back, fault);
        assert!(back.has_subcode("ActionNotSupported"));
    }

    #[test]
    fn test_unknown_subscription_detected() {
        let back = roundtrip(&Fault::unknown_subscription("sub-1"));
        assert!(back.is_unknown_subscription());
        assert_eq!(back.detail.as_deref(), Some("sub-1"));
    }

    #[test]
    fn test_non_fault_body_is_none() {
        let doc = roxmltree::Document::parse("<other/>").expect("well-formed");
        assert!(Fault::decode(&doc.root_element()).is_none());
    }

    #[test]
    fn test_receiver_code_roundtrip() {
        let back = roundtrip(&Fault::event_source_unable("overloaded"));
        assert_eq!(back.code, FaultCode::Receiver);
    }
}
