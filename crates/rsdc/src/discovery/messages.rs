// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Body codecs for the six WS-Discovery 2005/04 messages.
//!
//! Types lists are QName text content; the encoder assigns the canonical
//! prefixes (`dpws`, `mdpws`) and numbered fallbacks, the decoder resolves
//! prefixes against the in-scope namespace declarations.

use super::ServiceEntry;
use crate::names::{ns, QName};
use crate::xml::XmlWriter;

fn write_epr(w: &mut XmlWriter, epr: &str) {
    w.open("wsa:EndpointReference");
    w.leaf_text("wsa:Address", epr);
    w.close();
}

/// Write a `wsd:Types` element, declaring one prefix per distinct
/// namespace.
fn write_types(w: &mut XmlWriter, types: &[QName]) {
    if types.is_empty() {
        return;
    }
    let mut prefixes: Vec<(String, String)> = Vec::new(); // (ns, prefix)
    let mut prefix_for = |uri: &str| -> String {
        if let Some((_, p)) = prefixes.iter().find(|(n, _)| n == uri) {
            return p.clone();
        }
        let prefix = match uri {
            ns::DPWS => "dpws".to_string(),
            ns::MDPWS => "mdpws".to_string(),
            _ => format!("t{}", prefixes.len()),
        };
        prefixes.push((uri.to_string(), prefix.clone()));
        prefix
    };
    let tokens: Vec<String> = types
        .iter()
        .map(|q| format!("{}:{}", prefix_for(&q.ns), q.local))
        .collect();
    w.open("wsd:Types");
    for (uri, prefix) in &prefixes {
        w.attr(&format!("xmlns:{}", prefix), uri);
    }
    w.text(&tokens.join(" "));
    w.close();
}

fn write_scopes(w: &mut XmlWriter, scopes: &[String], rule: Option<&str>) {
    if scopes.is_empty() && rule.is_none() {
        return;
    }
    w.open("wsd:Scopes");
    w.attr_opt("MatchBy", rule);
    w.text(&scopes.join(" "));
    w.close();
}

fn open_discovery_root(w: &mut XmlWriter, name: &str) {
    w.open(name);
    w.attr("xmlns:wsd", ns::WSD);
    w.attr("xmlns:wsa", ns::WSA);
}

fn write_match(w: &mut XmlWriter, elem: &str, entry: &ServiceEntry) {
    w.open(elem);
    write_epr(w, &entry.epr);
    write_types(w, &entry.types);
    write_scopes(w, &entry.scopes, None);
    if !entry.xaddrs.is_empty() {
        w.leaf_text("wsd:XAddrs", &entry.xaddrs.join(" "));
    }
    w.leaf_text("wsd:MetadataVersion", &entry.metadata_version.to_string());
    w.close();
}

pub fn encode_hello(entry: &ServiceEntry) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:Hello");
    write_epr(&mut w, &entry.epr);
    write_types(&mut w, &entry.types);
    write_scopes(&mut w, &entry.scopes, None);
    if !entry.xaddrs.is_empty() {
        w.leaf_text("wsd:XAddrs", &entry.xaddrs.join(" "));
    }
    w.leaf_text("wsd:MetadataVersion", &entry.metadata_version.to_string());
    w.finish()
}

pub fn encode_bye(epr: &str) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:Bye");
    write_epr(&mut w, epr);
    w.finish()
}

pub fn encode_probe(types: &[QName], scopes: &[String], rule: Option<&str>) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:Probe");
    write_types(&mut w, types);
    write_scopes(&mut w, scopes, rule);
    w.finish()
}

pub fn encode_probe_matches(entries: &[ServiceEntry]) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:ProbeMatches");
    for entry in entries {
        write_match(&mut w, "wsd:ProbeMatch", entry);
    }
    w.finish()
}

pub fn encode_resolve(epr: &str) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:Resolve");
    write_epr(&mut w, epr);
    w.finish()
}

pub fn encode_resolve_matches(entry: &ServiceEntry) -> String {
    let mut w = XmlWriter::fragment();
    open_discovery_root(&mut w, "wsd:ResolveMatches");
    write_match(&mut w, "wsd:ResolveMatch", entry);
    w.finish()
}

// ========================================================================
// Decoding
// ========================================================================

fn child<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    local: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == local)
}

fn child_text(node: &roxmltree::Node, local: &str) -> Option<String> {
    child(node, local).and_then(|n| n.text().map(|t| t.trim().to_string()))
}

fn decode_epr(node: &roxmltree::Node) -> Result<String, String> {
    child(node, "EndpointReference")
        .and_then(|e| child_text(&e, "Address"))
        .ok_or_else(|| format!("<{}> missing EndpointReference", node.tag_name().name()))
}

/// Resolve prefixed QName tokens against in-scope namespaces.
fn decode_types(node: &roxmltree::Node) -> Vec<QName> {
    let Some(types_node) = child(node, "Types") else {
        return Vec::new();
    };
    let text = types_node.text().unwrap_or("");
    text.split_whitespace()
        .filter_map(|token| {
            let (prefix, local) = match token.split_once(':') {
                Some((p, l)) => (Some(p), l),
                None => (None, token),
            };
            types_node
                .lookup_namespace_uri(prefix)
                .map(|uri| QName::new(uri, local))
        })
        .collect()
}

fn decode_scopes(node: &roxmltree::Node) -> (Vec<String>, Option<String>) {
    match child(node, "Scopes") {
        None => (Vec::new(), None),
        Some(scopes) => (
            scopes
                .text()
                .unwrap_or("")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            scopes.attribute("MatchBy").map(str::to_string),
        ),
    }
}

fn decode_entry(node: &roxmltree::Node) -> Result<ServiceEntry, String> {
    let (scopes, _) = decode_scopes(node);
    Ok(ServiceEntry {
        epr: decode_epr(node)?,
        types: decode_types(node),
        scopes,
        xaddrs: child_text(node, "XAddrs")
            .map(|t| t.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        metadata_version: child_text(node, "MetadataVersion")
            .and_then(|t| t.parse::<u64>().ok())
            .unwrap_or(1),
    })
}

pub fn decode_hello(body: &roxmltree::Node) -> Result<ServiceEntry, String> {
    decode_entry(body)
}

pub fn decode_bye(body: &roxmltree::Node) -> Result<String, String> {
    decode_epr(body)
}

/// Probe filter: types, scopes, matching rule.
pub fn decode_probe(
    body: &roxmltree::Node,
) -> Result<(Vec<QName>, Vec<String>, Option<String>), String> {
    let types = decode_types(body);
    let (scopes, rule) = decode_scopes(body);
    Ok((types, scopes, rule))
}

pub fn decode_probe_matches(body: &roxmltree::Node) -> Result<Vec<ServiceEntry>, String> {
    body.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "ProbeMatch")
        .map(|n| decode_entry(&n))
        .collect()
}

pub fn decode_resolve(body: &roxmltree::Node) -> Result<String, String> {
    decode_epr(body)
}

pub fn decode_resolve_matches(body: &roxmltree::Node) -> Result<Option<ServiceEntry>, String> {
    body.children()
        .filter(|n| n.is_element() && n.tag_name().name() == "ResolveMatch")
        .map(|n| decode_entry(&n))
        .next()
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ServiceEntry {
        ServiceEntry {
            epr: "urn:uuid:11111111-2222-3333-4444-555555555555".to_string(),
            types: vec![QName::dpws_device(), QName::medical_device()],
            scopes: vec!["sdc.ctxt.loc:/sdc.ctxt.loc.detail/H1/F1".to_string()],
            xaddrs: vec!["http://10.0.0.7:6464/d".to_string()],
            metadata_version: 7,
        }
    }

    fn parse(xml: &str) -> roxmltree::Document {
        roxmltree::Document::parse(xml).expect("well-formed discovery body")
    }

    #[test]
    fn test_hello_roundtrip() {
        let xml = encode_hello(&entry());
        let doc = parse(&xml);
        let back = decode_hello(&doc.root_element()).expect("decodes");
        assert_eq!(back, entry());
    }

    #[test]
    fn test_types_prefix_resolution() {
        let xml = encode_probe(&[QName::dpws_device(), QName::medical_device()], &[], None);
        assert!(xml.contains("dpws:Device"));
        assert!(xml.contains("mdpws:MedicalDevice"));
        let doc = parse(&xml);
        let (types, _, _) = decode_probe(&doc.root_element()).expect("decodes");
        assert_eq!(types, vec![QName::dpws_device(), QName::medical_device()]);
    }

    #[test]
    fn test_probe_scopes_and_match_by() {
        let xml = encode_probe(
            &[],
            &["sdc.ctxt.loc:/a".to_string(), "sdc.ctxt.loc:/b".to_string()],
            Some(crate::names::match_by::LDAP),
        );
        let doc = parse(&xml);
        let (_, scopes, rule) = decode_probe(&doc.root_element()).expect("decodes");
        assert_eq!(scopes.len(), 2);
        assert_eq!(rule.as_deref(), Some(crate::names::match_by::LDAP));
    }

    #[test]
    fn test_probe_matches_roundtrip() {
        let xml = encode_probe_matches(&[entry()]);
        let doc = parse(&xml);
        let back = decode_probe_matches(&doc.root_element()).expect("decodes");
        assert_eq!(back, vec![entry()]);
    }

    #[test]
    fn test_resolve_matches_roundtrip() {
        let xml = encode_resolve_matches(&entry());
        let doc = parse(&xml);
        let back = decode_resolve_matches(&doc.root_element()).expect("decodes");
        assert_eq!(back, Some(entry()));
    }

    #[test]
    fn test_bye_roundtrip() {
        let xml = encode_bye("urn:uuid:gone");
        let doc = parse(&xml);
        assert_eq!(decode_bye(&doc.root_element()).expect("decodes"), "urn:uuid:gone");
    }
}
