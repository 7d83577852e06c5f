// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scope and type matching for Probe handling.
//!
//! The default rule (`ldap`, also applied for `rfc3986`/`uuid`) compares
//! scheme and authority case-insensitively and requires the probe's path to
//! be a segment-wise prefix of the service's path, with %-encoded octets
//! decoded before comparison ("%2F" inside a segment stays a literal slash
//! of the value, not a separator). `strcmp0` is exact string equality.

use super::ServiceEntry;
use crate::names::{match_by, QName};

/// Split a URI into (scheme, authority, path). No query handling; discovery
/// scopes carry their payload in the path.
fn split_uri(uri: &str) -> (String, String, String) {
    let (scheme, rest) = match uri.split_once(':') {
        Some((s, r)) => (s.to_ascii_lowercase(), r),
        None => (String::new(), uri),
    };
    let (authority, path) = if let Some(stripped) = rest.strip_prefix("//") {
        match stripped.find('/') {
            Some(idx) => (stripped[..idx].to_ascii_lowercase(), stripped[idx..].to_string()),
            None => (stripped.to_ascii_lowercase(), String::new()),
        }
    } else {
        (String::new(), rest.to_string())
    };
    // Strip a query if one sneaks in (location scopes carry one).
    let path = match path.split_once('?') {
        Some((p, _)) => p.to_string(),
        None => path,
    };
    (scheme, authority, path)
}

/// Decode %-escapes within one path segment.
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = bytes.get(i + 1..i + 3) {
                if let Ok(value) = u8::from_str_radix(std::str::from_utf8(hex).unwrap_or(""), 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Does `probe_scope` match `service_scope` under `match_by`?
pub fn match_scope(probe_scope: &str, service_scope: &str, rule: Option<&str>) -> bool {
    match rule {
        None | Some("") | Some(match_by::LDAP) | Some(match_by::RFC3986) | Some(match_by::UUID) => {
            let (p_scheme, p_auth, p_path) = split_uri(probe_scope);
            let (s_scheme, s_auth, s_path) = split_uri(service_scope);
            if p_scheme != s_scheme || p_auth != s_auth {
                return false;
            }
            if p_path == s_path {
                return true;
            }
            let probe_segments: Vec<String> = p_path.split('/').map(percent_decode).collect();
            let service_segments: Vec<String> = s_path.split('/').map(percent_decode).collect();
            if probe_segments.len() > service_segments.len() {
                return false;
            }
            probe_segments
                .iter()
                .zip(service_segments.iter())
                .all(|(p, s)| p == s)
        }
        Some(match_by::STRCMP0) => probe_scope == service_scope,
        Some(_) => false, // unknown rule: no match, per the standard
    }
}

/// Namespace+local equality.
pub fn match_type(a: &QName, b: &QName) -> bool {
    a.ns == b.ns && a.local == b.local
}

/// Service matches when its types are a superset of the probe's types and
/// every probe scope matches at least one service scope.
pub fn matches_filter(
    entry: &ServiceEntry,
    types: &[QName],
    scopes: &[String],
    rule: Option<&str>,
) -> bool {
    for probe_type in types {
        if !entry.types.iter().any(|t| match_type(t, probe_type)) {
            return false;
        }
    }
    for probe_scope in scopes {
        if !entry
            .scopes
            .iter()
            .any(|s| match_scope(probe_scope, s, rule))
        {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(types: Vec<QName>, scopes: Vec<&str>) -> ServiceEntry {
        ServiceEntry {
            epr: "urn:uuid:e".to_string(),
            types,
            scopes: scopes.into_iter().map(str::to_string).collect(),
            xaddrs: vec!["http://10.0.0.7:6464/x".to_string()],
            metadata_version: 1,
        }
    }

    #[test]
    fn test_prefix_match_default_rule() {
        assert!(match_scope(
            "sdc.ctxt.loc:/sdc.ctxt.loc.detail/HOSP1",
            "sdc.ctxt.loc:/sdc.ctxt.loc.detail/HOSP1/CU1/BedA",
            None
        ));
        assert!(!match_scope(
            "sdc.ctxt.loc:/sdc.ctxt.loc.detail/HOSP2",
            "sdc.ctxt.loc:/sdc.ctxt.loc.detail/HOSP1/CU1",
            None
        ));
    }

    #[test]
    fn test_segment_boundaries_respected() {
        // "HOSP" is not a segment-prefix of "HOSP1".
        assert!(!match_scope(
            "scheme:/a/HOSP",
            "scheme:/a/HOSP1",
            Some(crate::names::match_by::LDAP)
        ));
    }

    #[test]
    fn test_scheme_and_authority_case_insensitive() {
        assert!(match_scope(
            "HTTP://Host.Example/a",
            "http://host.example/a/b",
            None
        ));
        // Path stays case-sensitive.
        assert!(!match_scope("http://h/A", "http://h/a", None));
    }

    #[test]
    fn test_percent_decoding_in_segments() {
        // %2F is a literal '/' inside the value, not a separator: both
        // sides decode to the same segment text.
        assert!(match_scope(
            "s:/root/a%2Fb",
            "s:/root/a%2Fb/more",
            None
        ));
        assert!(!match_scope("s:/root/a%2Fb", "s:/root/a/b", None));
    }

    #[test]
    fn test_strcmp0_exact() {
        let rule = Some(crate::names::match_by::STRCMP0);
        assert!(match_scope("abc:/x", "abc:/x", rule));
        assert!(!match_scope("abc:/x", "abc:/x/y", rule));
    }

    #[test]
    fn test_unknown_rule_never_matches() {
        assert!(!match_scope("a:/b", "a:/b", Some("urn:unknown-rule")));
    }

    #[test]
    fn test_filter_requires_type_superset() {
        let service = entry(
            vec![QName::dpws_device(), QName::medical_device()],
            vec!["sdc.ctxt.loc:/loc/H1"],
        );
        assert!(matches_filter(
            &service,
            &[QName::dpws_device()],
            &[],
            None
        ));
        assert!(!matches_filter(
            &service,
            &[QName::new("urn:other", "Printer")],
            &[],
            None
        ));
    }

    #[test]
    fn test_filter_unmatched_scope_rejected() {
        let service = entry(vec![QName::dpws_device()], vec!["sdc.ctxt.loc:/loc/H1"]);
        assert!(!matches_filter(
            &service,
            &[],
            &["sdc.ctxt.loc:/loc/H2".to_string()],
            None
        ));
    }
}
