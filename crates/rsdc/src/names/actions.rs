// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Central definition of all action URIs used on the wire.
//!
//! BICEPS service actions hang off the SDC glue namespace
//! (`.../11073-20701-2018/<Service>/<Operation>`); WS-Eventing and
//! WS-Discovery actions hang off their own namespaces. Routing, subscription
//! filtering and report classification all compare against these constants,
//! so they must stay byte-exact.

// ========================================================================
// GetService
// ========================================================================
pub const GET_MDIB: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdib";
pub const GET_MDIB_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdibResponse";
pub const GET_MD_STATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdState";
pub const GET_MD_STATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdStateResponse";
pub const GET_MD_DESCRIPTION: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdDescription";
pub const GET_MD_DESCRIPTION_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/GetService/GetMdDescriptionResponse";

// ========================================================================
// SetService
// ========================================================================
pub const SET_VALUE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetValue";
pub const SET_VALUE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetValueResponse";
pub const SET_STRING: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetString";
pub const SET_STRING_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetStringResponse";
pub const ACTIVATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/Activate";
pub const ACTIVATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/ActivateResponse";
pub const SET_METRIC_STATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetMetricState";
pub const SET_METRIC_STATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetMetricStateResponse";
pub const SET_COMPONENT_STATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetComponentState";
pub const SET_COMPONENT_STATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetComponentStateResponse";
pub const SET_ALERT_STATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetAlertState";
pub const SET_ALERT_STATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/SetAlertStateResponse";
pub const OPERATION_INVOKED_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/SetService/OperationInvokedReport";

// ========================================================================
// StateEventService
// ========================================================================
pub const EPISODIC_METRIC_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/EpisodicMetricReport";
pub const EPISODIC_ALERT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/EpisodicAlertReport";
pub const EPISODIC_COMPONENT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/EpisodicComponentReport";
pub const EPISODIC_OPERATIONAL_STATE_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/EpisodicOperationalStateReport";
pub const PERIODIC_METRIC_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/PeriodicMetricReport";
pub const PERIODIC_ALERT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/PeriodicAlertReport";
pub const PERIODIC_COMPONENT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/PeriodicComponentReport";
pub const PERIODIC_OPERATIONAL_STATE_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/PeriodicOperationalStateReport";
pub const SYSTEM_ERROR_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/StateEventService/SystemErrorReport";

// ========================================================================
// DescriptionEventService / ContextService / WaveformService
// ========================================================================
pub const DESCRIPTION_MODIFICATION_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/DescriptionEventService/DescriptionModificationReport";
pub const EPISODIC_CONTEXT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/EpisodicContextReport";
pub const PERIODIC_CONTEXT_REPORT: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/PeriodicContextReport";
pub const GET_CONTEXT_STATES: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/GetContextStates";
pub const GET_CONTEXT_STATES_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/GetContextStatesResponse";
pub const SET_CONTEXT_STATE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/SetContextState";
pub const SET_CONTEXT_STATE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContextService/SetContextStateResponse";
pub const WAVEFORM_STREAM: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/WaveformService/WaveformStream";

// ========================================================================
// ContainmentTreeService
// ========================================================================
pub const GET_DESCRIPTOR: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContainmentTreeService/GetDescriptor";
pub const GET_DESCRIPTOR_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContainmentTreeService/GetDescriptorResponse";
pub const GET_CONTAINMENT_TREE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContainmentTreeService/GetContainmentTree";
pub const GET_CONTAINMENT_TREE_RESPONSE: &str =
    "http://standards.ieee.org/downloads/11073/11073-20701-2018/ContainmentTreeService/GetContainmentTreeResponse";

// ========================================================================
// WS-Eventing
// ========================================================================
pub const SUBSCRIBE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/Subscribe";
pub const SUBSCRIBE_RESPONSE: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/eventing/SubscribeResponse";
pub const RENEW: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/Renew";
pub const RENEW_RESPONSE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/RenewResponse";
pub const GET_STATUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/GetStatus";
pub const GET_STATUS_RESPONSE: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/eventing/GetStatusResponse";
pub const UNSUBSCRIBE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing/Unsubscribe";
pub const UNSUBSCRIBE_RESPONSE: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/eventing/UnsubscribeResponse";
pub const SUBSCRIPTION_END: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/eventing/SubscriptionEnd";

// ========================================================================
// WS-Discovery 2005/04
// ========================================================================
pub const HELLO: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Hello";
pub const BYE: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Bye";
pub const PROBE: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe";
pub const PROBE_MATCHES: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches";
pub const RESOLVE: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/Resolve";
pub const RESOLVE_MATCHES: &str =
    "http://schemas.xmlsoap.org/ws/2005/04/discovery/ResolveMatches";

/// Actions a consumer typically subscribes to for full mirror coverage.
pub const ALL_EPISODIC_REPORTS: &[&str] = &[
    EPISODIC_METRIC_REPORT,
    EPISODIC_ALERT_REPORT,
    EPISODIC_COMPONENT_REPORT,
    EPISODIC_OPERATIONAL_STATE_REPORT,
    EPISODIC_CONTEXT_REPORT,
    DESCRIPTION_MODIFICATION_REPORT,
    OPERATION_INVOKED_REPORT,
    SYSTEM_ERROR_REPORT,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::ns;

    #[test]
    fn test_service_actions_share_sdc_base() {
        for action in [GET_MDIB, SET_VALUE, EPISODIC_METRIC_REPORT, WAVEFORM_STREAM] {
            assert!(
                action.starts_with(ns::SDC),
                "action not rooted in SDC namespace: {}",
                action
            );
        }
    }

    #[test]
    fn test_response_action_is_request_action_plus_suffix() {
        assert_eq!(GET_MDIB_RESPONSE, format!("{}Response", GET_MDIB));
        assert_eq!(SET_STRING_RESPONSE, format!("{}Response", SET_STRING));
    }

    #[test]
    fn test_discovery_actions_use_2005_04_namespace() {
        for action in [HELLO, BYE, PROBE, PROBE_MATCHES, RESOLVE, RESOLVE_MATCHES] {
            assert!(action.starts_with(ns::WSD), "wrong namespace: {}", action);
        }
    }
}
