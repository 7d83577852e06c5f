// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request router keyed by `wsa:Action`.
//!
//! Hosted services register one handler per action. For every inbound
//! request the router parses the envelope, locates the handler, and encodes
//! the response with `wsa:RelatesTo` preserving the request's MessageID.
//! Unknown actions produce an `ActionNotSupported` fault; handler faults are
//! encoded the same way, so the transport layer above only ever sees a
//! response envelope string.

use super::envelope::{build_envelope, HeaderInfo, ReceivedEnvelope};
use super::fault::{Fault, FAULT_ACTION};
use crate::biceps::MdibVersionGroup;
use std::collections::HashMap;

/// Typed success result of a handler.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    /// Response action URI.
    pub action: String,
    /// Body fragment (self-contained namespaces).
    pub body: String,
    /// MDIB headers for MDIB-carrying responses.
    pub version_group: Option<MdibVersionGroup>,
}

impl ResponseBody {
    pub fn new(action: &str, body: String) -> Self {
        Self {
            action: action.to_string(),
            body,
            version_group: None,
        }
    }

    pub fn with_version_group(mut self, vg: MdibVersionGroup) -> Self {
        self.version_group = Some(vg);
        self
    }
}

type Handler = Box<dyn Fn(&ReceivedEnvelope) -> Result<ResponseBody, Fault> + Send + Sync>;

/// Action-keyed dispatcher for one provider (all hosted services share it).
pub struct SoapRouter {
    handlers: HashMap<String, Handler>,
    strict: bool,
}

impl SoapRouter {
    pub fn new(strict: bool) -> Self {
        Self {
            handlers: HashMap::new(),
            strict,
        }
    }

    /// Register the handler for one action. Last registration wins; hosted
    /// services are wired once at startup.
    pub fn register(
        &mut self,
        action: &str,
        handler: impl Fn(&ReceivedEnvelope) -> Result<ResponseBody, Fault> + Send + Sync + 'static,
    ) {
        self.handlers.insert(action.to_string(), Box::new(handler));
    }

    /// Registered action URIs (diagnostics).
    pub fn actions(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Handle one request document, producing the full response envelope.
    pub fn handle(&self, raw: &str) -> String {
        let request = match ReceivedEnvelope::parse(raw, self.strict) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::debug!("[dispatch] rejecting malformed request: {}", e);
                return fault_envelope(&Fault::sender(&e.to_string()), None);
            }
        };
        let Some(handler) = self.handlers.get(&request.action) else {
            log::debug!("[dispatch] no handler for action {}", request.action);
            return fault_envelope(
                &Fault::action_not_supported(&request.action),
                request.message_id.as_deref(),
            );
        };
        match handler(&request) {
            Ok(response) => {
                let header = HeaderInfo {
                    action: response.action.clone(),
                    relates_to: request.message_id.clone(),
                    version_group: response.version_group.clone(),
                    ..HeaderInfo::default()
                };
                build_envelope(&header, &response.body)
            }
            Err(fault) => fault_envelope(&fault, request.message_id.as_deref()),
        }
    }
}

impl std::fmt::Debug for SoapRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoapRouter")
            .field("actions", &self.handlers.len())
            .field("strict", &self.strict)
            .finish()
    }
}

/// Encode a fault as a complete response envelope.
pub fn fault_envelope(fault: &Fault, relates_to: Option<&str>) -> String {
    let header = HeaderInfo {
        action: FAULT_ACTION.to_string(),
        relates_to: relates_to.map(str::to_string),
        ..HeaderInfo::default()
    };
    build_envelope(&header, &fault.encode_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::actions;

    fn request(action: &str, message_id: &str) -> String {
        let header = HeaderInfo {
            action: action.to_string(),
            message_id: Some(message_id.to_string()),
            ..HeaderInfo::default()
        };
        build_envelope(&header, "")
    }

    #[test]
    fn test_relates_to_preserved() {
        let mut router = SoapRouter::new(false);
        router.register(actions::GET_MDIB, |_req| {
            Ok(ResponseBody::new(actions::GET_MDIB_RESPONSE, String::new()))
        });
        let response = router.handle(&request(actions::GET_MDIB, "urn:uuid:req-1"));
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        assert_eq!(parsed.action, actions::GET_MDIB_RESPONSE);
        assert_eq!(parsed.relates_to.as_deref(), Some("urn:uuid:req-1"));
    }

    #[test]
    fn test_unknown_action_faults() {
        let router = SoapRouter::new(false);
        let response = router.handle(&request("x:unknown", "urn:uuid:req-2"));
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        assert_eq!(parsed.action, FAULT_ACTION);
        let fault = parsed
            .with_body(|body, _| body.as_ref().and_then(Fault::decode))
            .expect("fault body");
        assert!(fault.has_subcode("ActionNotSupported"));
        assert_eq!(parsed.relates_to.as_deref(), Some("urn:uuid:req-2"));
    }

    #[test]
    fn test_handler_fault_encoded() {
        let mut router = SoapRouter::new(false);
        router.register(actions::RENEW, |_req| Err(Fault::unknown_subscription("s")));
        let response = router.handle(&request(actions::RENEW, "urn:uuid:req-3"));
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        let fault = parsed
            .with_body(|body, _| body.as_ref().and_then(Fault::decode))
            .expect("fault body");
        assert!(fault.is_unknown_subscription());
    }

    #[test]
    fn test_garbage_input_faults_without_panic() {
        let router = SoapRouter::new(false);
        let response = router.handle("not xml at all");
        let parsed = ReceivedEnvelope::parse(&response, false).expect("parses");
        assert_eq!(parsed.action, FAULT_ACTION);
    }
}
