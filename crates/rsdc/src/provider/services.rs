// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hosted-service port types: handler registration on the action router.
//!
//! GetService, SetService, ContextService and ContainmentTreeService are
//! wired here; the eventing services (DescriptionEvent/StateEvent/Context/
//! Waveform) share the WS-Eventing handlers registered by the subscription
//! manager, since subscriptions are correlated by filter, not by endpoint.

use crate::biceps::codec::encode_descriptor;
use crate::biceps::reports::{
    decode_handle_refs, encode_get_context_states_response, encode_get_md_description_response,
    encode_get_md_state_response, encode_get_mdib_response, write_version_group, SetRequest,
};
use crate::mdib::ProviderMdib;
use crate::names::{actions, ns};
use crate::soap::fault::Fault;
use crate::soap::router::{ResponseBody, SoapRouter};
use crate::xml::XmlWriter;
use std::sync::Arc;

use super::sco::ScoRuntime;

/// GetService: GetMdib / GetMdState / GetMdDescription.
pub fn register_get_service(router: &mut SoapRouter, mdib: Arc<ProviderMdib>) {
    let m = Arc::clone(&mdib);
    router.register(actions::GET_MDIB, move |_request| {
        let snapshot = m.read();
        Ok(
            ResponseBody::new(actions::GET_MDIB_RESPONSE, encode_get_mdib_response(&snapshot))
                .with_version_group(snapshot.version_group().clone()),
        )
    });
    let m = Arc::clone(&mdib);
    router.register(actions::GET_MD_STATE, move |request| {
        let handles = request.with_body(|body, _| {
            body.map(|n| decode_handle_refs(&n)).unwrap_or_default()
        });
        let snapshot = m.read();
        let filter = if handles.is_empty() {
            None
        } else {
            Some(handles.as_slice())
        };
        Ok(ResponseBody::new(
            actions::GET_MD_STATE_RESPONSE,
            encode_get_md_state_response(&snapshot, filter),
        )
        .with_version_group(snapshot.version_group().clone()))
    });
    let m = mdib;
    router.register(actions::GET_MD_DESCRIPTION, move |_request| {
        let snapshot = m.read();
        Ok(ResponseBody::new(
            actions::GET_MD_DESCRIPTION_RESPONSE,
            encode_get_md_description_response(&snapshot),
        )
        .with_version_group(snapshot.version_group().clone()))
    });
}

/// SetService: the six state-writing operations plus Activate, all routed
/// through the SCO.
pub fn register_set_service(router: &mut SoapRouter, sco: Arc<ScoRuntime>) {
    for action in [
        actions::SET_VALUE,
        actions::SET_STRING,
        actions::ACTIVATE,
        actions::SET_METRIC_STATE,
        actions::SET_COMPONENT_STATE,
        actions::SET_ALERT_STATE,
    ] {
        let sco = Arc::clone(&sco);
        router.register(action, move |request| handle_set(&sco, action, request));
    }
}

/// ContextService: GetContextStates + SetContextState.
pub fn register_context_service(
    router: &mut SoapRouter,
    mdib: Arc<ProviderMdib>,
    sco: Arc<ScoRuntime>,
) {
    router.register(actions::GET_CONTEXT_STATES, move |request| {
        let handles = request.with_body(|body, _| {
            body.map(|n| decode_handle_refs(&n)).unwrap_or_default()
        });
        let snapshot = mdib.read();
        let filter = if handles.is_empty() {
            None
        } else {
            Some(handles.as_slice())
        };
        Ok(ResponseBody::new(
            actions::GET_CONTEXT_STATES_RESPONSE,
            encode_get_context_states_response(&snapshot, filter),
        )
        .with_version_group(snapshot.version_group().clone()))
    });
    router.register(actions::SET_CONTEXT_STATE, move |request| {
        handle_set(&sco, actions::SET_CONTEXT_STATE, request)
    });
}

/// ContainmentTreeService: GetDescriptor + GetContainmentTree.
pub fn register_containment_tree_service(router: &mut SoapRouter, mdib: Arc<ProviderMdib>) {
    let m = Arc::clone(&mdib);
    router.register(actions::GET_DESCRIPTOR, move |request| {
        let handles = request.with_body(|body, _| {
            body.map(|n| decode_handle_refs(&n)).unwrap_or_default()
        });
        let snapshot = m.read();
        let mut w = XmlWriter::fragment();
        w.open("msg:GetDescriptorResponse");
        w.attr("xmlns:msg", ns::MSG);
        w.attr("xmlns:pm", ns::PM);
        w.attr("xmlns:xsi", ns::XSI);
        write_version_group(&mut w, snapshot.version_group());
        for handle in &handles {
            if let Some(descriptor) = snapshot.descriptor(handle) {
                encode_descriptor(&mut w, descriptor, true);
            }
        }
        Ok(ResponseBody::new(actions::GET_DESCRIPTOR_RESPONSE, w.finish())
            .with_version_group(snapshot.version_group().clone()))
    });
    router.register(actions::GET_CONTAINMENT_TREE, move |request| {
        let handles = request.with_body(|body, _| {
            body.map(|n| decode_handle_refs(&n)).unwrap_or_default()
        });
        let snapshot = mdib.read();
        // Entries for the children of the requested handles (roots when
        // none are given), one level deep.
        let parents: Vec<String> = if handles.is_empty() {
            snapshot.roots().to_vec()
        } else {
            handles
        };
        let mut w = XmlWriter::fragment();
        w.open("msg:GetContainmentTreeResponse");
        w.attr("xmlns:msg", ns::MSG);
        write_version_group(&mut w, snapshot.version_group());
        w.open("msg:ContainmentTree");
        for parent in &parents {
            if let Some(descriptor) = snapshot.descriptor(parent) {
                w.open("msg:Entry");
                w.attr("HandleRef", &descriptor.handle);
                if let Some(p) = &descriptor.parent {
                    w.attr("ParentHandleRef", p);
                }
                w.attr(
                    "ChildrenCount",
                    &snapshot.children(parent).len().to_string(),
                );
                w.close();
            }
        }
        w.close();
        Ok(
            ResponseBody::new(actions::GET_CONTAINMENT_TREE_RESPONSE, w.finish())
                .with_version_group(snapshot.version_group().clone()),
        )
    });
}

fn handle_set(
    sco: &Arc<ScoRuntime>,
    action: &'static str,
    request: &crate::soap::envelope::ReceivedEnvelope,
) -> Result<ResponseBody, Fault> {
    let set_request = request
        .with_body(|body, raw| {
            body.map(|n| SetRequest::decode(action, &n, raw))
                .unwrap_or_else(|| Err("empty set request body".to_string()))
        })
        .map_err(|e| Fault::sender(&e))?;
    let element = set_request.element_name();
    let response = sco.handle_set_request(set_request);
    let version_group = response.version_group.clone();
    let response_action = match action {
        actions::SET_VALUE => actions::SET_VALUE_RESPONSE,
        actions::SET_STRING => actions::SET_STRING_RESPONSE,
        actions::ACTIVATE => actions::ACTIVATE_RESPONSE,
        actions::SET_METRIC_STATE => actions::SET_METRIC_STATE_RESPONSE,
        actions::SET_COMPONENT_STATE => actions::SET_COMPONENT_STATE_RESPONSE,
        actions::SET_ALERT_STATE => actions::SET_ALERT_STATE_RESPONSE,
        actions::SET_CONTEXT_STATE => actions::SET_CONTEXT_STATE_RESPONSE,
        _ => actions::SET_VALUE_RESPONSE,
    };
    Ok(ResponseBody::new(response_action, response.encode(element))
        .with_version_group(version_group))
}
