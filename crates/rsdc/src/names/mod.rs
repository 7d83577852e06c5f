// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Canonical names: XML namespaces, qualified names, action URIs.
//!
//! Every namespace URI and wire name used by the stack lives here, keyed by
//! its conventional prefix. The BICEPS/WS-* action table is in [`actions`].

pub mod actions;

/// Namespace URIs with their canonical prefixes.
pub mod ns {
    /// SOAP 1.2 envelope (`s12`).
    pub const S12: &str = "http://www.w3.org/2003/05/soap-envelope";
    /// WS-Addressing 2005/08 (`wsa`).
    pub const WSA: &str = "http://www.w3.org/2005/08/addressing";
    /// WS-Eventing (`wse`).
    pub const WSE: &str = "http://schemas.xmlsoap.org/ws/2004/08/eventing";
    /// WS-Discovery 2005/04 (`wsd`).
    pub const WSD: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
    /// DPWS 1.1 (`dpws`).
    pub const DPWS: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01";
    /// MDPWS - medical DPWS extensions (`mdpws`).
    pub const MDPWS: &str = "http://standards.ieee.org/downloads/11073/11073-20702-2016";
    /// BICEPS message model (`msg`).
    pub const MSG: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/message";
    /// BICEPS participant model (`pm`).
    pub const PM: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/participant";
    /// BICEPS extension point (`ext`).
    pub const EXT: &str = "http://standards.ieee.org/downloads/11073/11073-10207-2017/extension";
    /// SDC glue standard; also the base of all BICEPS service action URIs.
    pub const SDC: &str = "http://standards.ieee.org/downloads/11073/11073-20701-2018";
    /// XML Schema instance (`xsi`).
    pub const XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
}

/// `wsa:To` address of every multicast discovery message.
pub const DISCOVERY_URN: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";

/// Anonymous WS-Addressing endpoint (replies go over the same connection).
pub const WSA_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

/// Scope matching rule URIs (`wsd:Scopes/@MatchBy`).
///
/// Spelled out in full so a grep for the wire value succeeds.
pub mod match_by {
    /// Case-insensitive scheme/authority, segment-wise path prefix (default).
    pub const LDAP: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/ldap";
    /// Same algorithm applied to generic RFC3986 URIs.
    pub const RFC3986: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/rfc3986";
    /// Same algorithm; scopes are `urn:uuid` values.
    pub const UUID: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/uuid";
    /// Exact string comparison.
    pub const STRCMP0: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery/strcmp0";
}

/// Qualified XML name: namespace URI plus local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace URI (empty for unqualified names).
    pub ns: String,
    /// Local part.
    pub local: String,
}

impl QName {
    /// Build a qualified name.
    pub fn new(ns: &str, local: &str) -> Self {
        Self {
            ns: ns.to_string(),
            local: local.to_string(),
        }
    }

    /// `dpws:Device` - the DPWS device type every provider advertises.
    pub fn dpws_device() -> Self {
        Self::new(ns::DPWS, "Device")
    }

    /// `mdpws:MedicalDevice` - the medical device type from MDPWS.
    pub fn medical_device() -> Self {
        Self::new(ns::MDPWS, "MedicalDevice")
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_display() {
        let q = QName::dpws_device();
        assert_eq!(
            q.to_string(),
            "{http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01}Device"
        );
    }

    #[test]
    fn test_namespaces_are_distinct() {
        let all = [
            ns::S12,
            ns::WSA,
            ns::WSE,
            ns::WSD,
            ns::DPWS,
            ns::MDPWS,
            ns::MSG,
            ns::PM,
            ns::EXT,
            ns::SDC,
            ns::XSI,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
