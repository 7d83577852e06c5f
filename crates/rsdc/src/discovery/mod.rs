// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery 2005/04 engine: SOAP-over-UDP multicast node.
//!
//! One node binds exactly ONE network adapter (selecting the wrong adapter
//! is the classic discovery bug; the single-address rule prevents it),
//! joins `239.255.255.250:3702`, and runs two threads: a receive/classify
//! loop and a send queue that implements the SOAP-over-UDP repeat schedule.
//! Announcements (Hello/Bye), probe answering, active Probe/Resolve with
//! bounded collect windows and the known-remotes table all live here.

pub mod matcher;
pub mod messages;
pub mod node;

pub use node::{DiscoveryEvent, DiscoveryNode};

use crate::names::QName;

/// Discovery-visible facts about one service (local or remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Stable endpoint reference (`urn:uuid:...`).
    pub epr: String,
    pub types: Vec<QName>,
    pub scopes: Vec<String>,
    /// Transport addresses of the hosted services.
    pub xaddrs: Vec<String>,
    /// Monotonic per endpoint; peers keep the highest seen.
    pub metadata_version: u64,
}

/// Location parameters formatted as an `sdc.ctxt.loc` discovery scope.
///
/// Providers advertise the scope, consumers probe with it (scenario: find
/// all devices in building H1, floor 1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdcLocation {
    pub facility: Option<String>,
    pub building: Option<String>,
    pub floor: Option<String>,
    pub point_of_care: Option<String>,
    pub room: Option<String>,
    pub bed: Option<String>,
}

impl SdcLocation {
    const SCHEME: &'static str = "sdc.ctxt.loc";
    const DETAIL_ROOT: &'static str = "sdc.ctxt.loc.detail";

    /// Ordered (query-name, value) pairs; empty slots keep their position
    /// in the path so segment counts stay fixed.
    fn elements(&self) -> [(&'static str, &str); 6] {
        [
            ("fac", self.facility.as_deref().unwrap_or("")),
            ("bldng", self.building.as_deref().unwrap_or("")),
            ("flr", self.floor.as_deref().unwrap_or("")),
            ("poc", self.point_of_care.as_deref().unwrap_or("")),
            ("rm", self.room.as_deref().unwrap_or("")),
            ("bed", self.bed.as_deref().unwrap_or("")),
        ]
    }

    /// Scope string: the six location slots percent-encoded and joined with
    /// an encoded slash into ONE path segment, plus a query naming the
    /// populated slots.
    pub fn scope_string(&self) -> String {
        let elements = self.elements();
        let joined = elements
            .iter()
            .map(|(_, v)| percent_encode(v))
            .collect::<Vec<_>>()
            .join("%2F");
        let query = elements
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        if query.is_empty() {
            format!("{}:/{}/{}", Self::SCHEME, Self::DETAIL_ROOT, joined)
        } else {
            format!("{}:/{}/{}?{}", Self::SCHEME, Self::DETAIL_ROOT, joined, query)
        }
    }
}

/// Percent-encode everything outside the unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_scope_format() {
        let loc = SdcLocation {
            facility: Some("HOSP1".to_string()),
            point_of_care: Some("CU1".to_string()),
            bed: Some("Bed A".to_string()),
            ..SdcLocation::default()
        };
        let scope = loc.scope_string();
        assert!(scope.starts_with("sdc.ctxt.loc:/sdc.ctxt.loc.detail/"));
        assert!(scope.contains("HOSP1%2F%2F%2FCU1%2F%2FBed%20A"), "scope: {}", scope);
        assert!(scope.ends_with("?fac=HOSP1&poc=CU1&bed=Bed%20A"), "scope: {}", scope);
    }

    #[test]
    fn test_location_scope_matches_wider_probe() {
        let device = SdcLocation {
            facility: Some("H1".to_string()),
            building: Some("B2".to_string()),
            ..SdcLocation::default()
        };
        // A probe for the same detail root prefix-matches the device scope.
        assert!(matcher::match_scope(
            &format!("{}:/{}", SdcLocation::SCHEME, SdcLocation::DETAIL_ROOT),
            &device.scope_string(),
            None
        ));
    }
}
