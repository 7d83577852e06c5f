// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Eventing body codecs shared by the provider manager and the consumer
//! client.

use crate::names::ns;
use crate::soap::envelope::RawElement;
use crate::xml::value::{format_duration, parse_duration};
use crate::xml::XmlWriter;
use std::time::Duration;

/// Namespace of the provider-generated correlation reference parameter.
pub const IDENT_NS: &str = "urn:rsdc:subscription";

/// Local name of the correlation reference parameter.
pub const IDENT_LOCAL: &str = "ident";

/// The only delivery mode offered (WS-Eventing Push).
pub const DELIVERY_MODE_PUSH: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/eventing/DeliveryModes/Push";

/// Filter dialect: list of action URIs (DPWS 1.1 Sec.5.4).
pub const FILTER_DIALECT_ACTION: &str =
    "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01/Action";

/// `wse:SubscriptionEnd` status codes.
pub mod end_status {
    pub const SOURCE_SHUTTING_DOWN: &str =
        "http://schemas.xmlsoap.org/ws/2004/08/eventing/SourceShuttingDown";
    pub const DELIVERY_FAILURE: &str =
        "http://schemas.xmlsoap.org/ws/2004/08/eventing/DeliveryFailure";
    pub const SOURCE_CANCELLING: &str =
        "http://schemas.xmlsoap.org/ws/2004/08/eventing/SourceCancelling";
}

fn open_wse_root(w: &mut XmlWriter, name: &str) {
    w.open(name);
    w.attr("xmlns:wse", ns::WSE);
    w.attr("xmlns:wsa", ns::WSA);
}

/// Subscribe request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub notify_to: String,
    /// Subscriber-supplied reference parameters, echoed in every
    /// notification.
    pub notify_ref_params: Vec<RawElement>,
    pub end_to: Option<String>,
    pub expires: Option<Duration>,
    /// Ordered action URI set.
    pub filter: Vec<String>,
    /// Delivery mode URI (`None` = Push implied).
    pub delivery_mode: Option<String>,
}

impl SubscribeRequest {
    pub fn new(notify_to: &str, filter: &[&str], expires: Option<Duration>) -> Self {
        Self {
            notify_to: notify_to.to_string(),
            notify_ref_params: Vec::new(),
            end_to: None,
            expires,
            filter: filter.iter().map(|a| a.to_string()).collect(),
            delivery_mode: None,
        }
    }

    pub fn encode(&self) -> String {
        let mut w = XmlWriter::fragment();
        open_wse_root(&mut w, "wse:Subscribe");
        if let Some(end_to) = &self.end_to {
            w.open("wse:EndTo");
            w.leaf_text("wsa:Address", end_to);
            w.close();
        }
        w.open("wse:Delivery");
        w.attr(
            "Mode",
            self.delivery_mode.as_deref().unwrap_or(DELIVERY_MODE_PUSH),
        );
        w.open("wse:NotifyTo");
        w.leaf_text("wsa:Address", &self.notify_to);
        if !self.notify_ref_params.is_empty() {
            w.open("wsa:ReferenceParameters");
            for param in &self.notify_ref_params {
                w.open(&param.local);
                if !param.ns.is_empty() {
                    w.attr("xmlns", &param.ns);
                }
                w.text(&param.text);
                w.close();
            }
            w.close();
        }
        w.close(); // NotifyTo
        w.close(); // Delivery
        if let Some(expires) = self.expires {
            w.leaf_text("wse:Expires", &format_duration(expires));
        }
        if !self.filter.is_empty() {
            w.open("wse:Filter");
            w.attr("Dialect", FILTER_DIALECT_ACTION);
            w.text(&self.filter.join(" "));
            w.close();
        }
        w.finish()
    }

    pub fn decode(body: &roxmltree::Node) -> Result<Self, String> {
        let delivery = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Delivery")
            .ok_or_else(|| "Subscribe missing wse:Delivery".to_string())?;
        let notify_to_node = delivery
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "NotifyTo")
            .ok_or_else(|| "Delivery missing wse:NotifyTo".to_string())?;
        let notify_to = notify_to_node
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Address")
            .and_then(|n| n.text().map(|t| t.trim().to_string()))
            .ok_or_else(|| "NotifyTo missing wsa:Address".to_string())?;
        let notify_ref_params = notify_to_node
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "ReferenceParameters")
            .map(|params| {
                params
                    .children()
                    .filter(|n| n.is_element())
                    .map(|n| RawElement {
                        ns: n.tag_name().namespace().unwrap_or("").to_string(),
                        local: n.tag_name().name().to_string(),
                        text: n.text().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let end_to = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "EndTo")
            .and_then(|e| {
                e.children()
                    .find(|n| n.is_element() && n.tag_name().name() == "Address")
                    .and_then(|n| n.text().map(|t| t.trim().to_string()))
            });
        let expires = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Expires")
            .and_then(|n| n.text())
            .and_then(parse_duration);
        let filter = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Filter")
            .and_then(|n| n.text())
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        Ok(Self {
            notify_to,
            notify_ref_params,
            end_to,
            expires,
            filter,
            delivery_mode: delivery.attribute("Mode").map(str::to_string),
        })
    }
}

/// SubscribeResponse body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponseBody {
    pub manager_address: String,
    /// Manager reference parameters (the correlation ident among them).
    pub manager_ref_params: Vec<RawElement>,
    pub expires: Duration,
}

impl SubscribeResponseBody {
    pub fn encode(&self) -> String {
        let mut w = XmlWriter::fragment();
        open_wse_root(&mut w, "wse:SubscribeResponse");
        write_manager(&mut w, &self.manager_address, &self.manager_ref_params);
        w.leaf_text("wse:Expires", &format_duration(self.expires));
        w.finish()
    }

    pub fn decode(body: &roxmltree::Node) -> Result<Self, String> {
        let manager = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "SubscriptionManager")
            .ok_or_else(|| "SubscribeResponse missing wse:SubscriptionManager".to_string())?;
        let manager_address = manager
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Address")
            .and_then(|n| n.text().map(|t| t.trim().to_string()))
            .ok_or_else(|| "SubscriptionManager missing wsa:Address".to_string())?;
        let manager_ref_params = manager
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "ReferenceParameters")
            .map(|params| {
                params
                    .children()
                    .filter(|n| n.is_element())
                    .map(|n| RawElement {
                        ns: n.tag_name().namespace().unwrap_or("").to_string(),
                        local: n.tag_name().name().to_string(),
                        text: n.text().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let expires = body
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Expires")
            .and_then(|n| n.text())
            .and_then(parse_duration)
            .ok_or_else(|| "SubscribeResponse missing wse:Expires".to_string())?;
        Ok(Self {
            manager_address,
            manager_ref_params,
            expires,
        })
    }
}

fn write_manager(w: &mut XmlWriter, address: &str, ref_params: &[RawElement]) {
    w.open("wse:SubscriptionManager");
    w.leaf_text("wsa:Address", address);
    if !ref_params.is_empty() {
        w.open("wsa:ReferenceParameters");
        for param in ref_params {
            w.open(&param.local);
            if !param.ns.is_empty() {
                w.attr("xmlns", &param.ns);
            }
            w.text(&param.text);
            w.close();
        }
        w.close();
    }
    w.close();
}

/// `wse:Renew` body.
pub fn encode_renew(expires: Duration) -> String {
    let mut w = XmlWriter::fragment();
    open_wse_root(&mut w, "wse:Renew");
    w.leaf_text("wse:Expires", &format_duration(expires));
    w.finish()
}

/// Read `wse:Expires` from any eventing body (Renew, *Response, GetStatus).
pub fn decode_expires(body: &roxmltree::Node) -> Option<Duration> {
    body.children()
        .find(|n| n.is_element() && n.tag_name().name() == "Expires")
        .and_then(|n| n.text())
        .and_then(parse_duration)
}

/// `wse:RenewResponse` / `wse:GetStatusResponse` body.
pub fn encode_expires_response(element: &str, expires: Duration) -> String {
    let mut w = XmlWriter::fragment();
    open_wse_root(&mut w, &format!("wse:{}", element));
    w.leaf_text("wse:Expires", &format_duration(expires));
    w.finish()
}

/// Empty eventing body (`wse:Unsubscribe`, `wse:UnsubscribeResponse`).
pub fn encode_empty(element: &str) -> String {
    let mut w = XmlWriter::fragment();
    open_wse_root(&mut w, &format!("wse:{}", element));
    w.finish()
}

/// `wse:SubscriptionEnd` body.
pub fn encode_subscription_end(
    manager_address: &str,
    manager_ref_params: &[RawElement],
    status: &str,
    reason: &str,
) -> String {
    let mut w = XmlWriter::fragment();
    open_wse_root(&mut w, "wse:SubscriptionEnd");
    write_manager(&mut w, manager_address, manager_ref_params);
    w.leaf_text("wse:Status", status);
    w.open("wse:Reason");
    w.attr("xml:lang", "en");
    w.text(reason);
    w.close();
    w.finish()
}

/// Read the status URI from a `wse:SubscriptionEnd` body.
pub fn decode_subscription_end_status(body: &roxmltree::Node) -> Option<String> {
    body.children()
        .find(|n| n.is_element() && n.tag_name().name() == "Status")
        .and_then(|n| n.text().map(|t| t.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::actions;

    fn parse(xml: &str) -> roxmltree::Document {
        roxmltree::Document::parse(xml).expect("well-formed eventing body")
    }

    #[test]
    fn test_subscribe_roundtrip() {
        let mut req = SubscribeRequest::new(
            "http://consumer:8080/notify",
            &[actions::EPISODIC_METRIC_REPORT, actions::EPISODIC_CONTEXT_REPORT],
            Some(Duration::from_secs(60)),
        );
        req.notify_ref_params.push(RawElement::new("urn:x", "tag", "v1"));
        let xml = req.encode();
        let doc = parse(&xml);
        let back = SubscribeRequest::decode(&doc.root_element()).expect("decodes");
        assert_eq!(back.notify_to, req.notify_to);
        assert_eq!(back.filter, req.filter);
        assert_eq!(back.expires, req.expires);
        assert_eq!(back.notify_ref_params, req.notify_ref_params);
        assert_eq!(back.delivery_mode.as_deref(), Some(DELIVERY_MODE_PUSH));
    }

    #[test]
    fn test_subscribe_response_roundtrip() {
        let body = SubscribeResponseBody {
            manager_address: "http://device/subscriptions".to_string(),
            manager_ref_params: vec![RawElement::new(IDENT_NS, IDENT_LOCAL, "deadbeef")],
            expires: Duration::from_secs(3600),
        };
        let xml = body.encode();
        let doc = parse(&xml);
        let back = SubscribeResponseBody::decode(&doc.root_element()).expect("decodes");
        assert_eq!(back, body);
    }

    #[test]
    fn test_renew_roundtrip() {
        let xml = encode_renew(Duration::from_secs(120));
        let doc = parse(&xml);
        assert_eq!(decode_expires(&doc.root_element()), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_subscription_end_status() {
        let xml = encode_subscription_end(
            "http://device/subscriptions",
            &[],
            end_status::SOURCE_SHUTTING_DOWN,
            "provider stopping",
        );
        let doc = parse(&xml);
        assert_eq!(
            decode_subscription_end_status(&doc.root_element()).as_deref(),
            Some(end_status::SOURCE_SHUTTING_DOWN)
        );
    }
}
