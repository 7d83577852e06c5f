// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! XML serialization primitives.
//!
//! [`XmlWriter`] is an append-only builder in the same spirit as the wire
//! packet builders elsewhere in this codebase: callers push elements in
//! document order and the writer takes care of escaping and tag bookkeeping.
//! Parsing is done with `roxmltree` at the call sites; this module only
//! produces bytes.

pub mod value;

pub use value::{Decimal, Timestamp};

/// Escape text content (`<`, `&`, `>`).
pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape attribute values (adds `"` and `'` to the text rules).
pub fn escape_attr(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Push-style XML writer.
///
/// Elements are written with prefixed names (`s12:Envelope`); namespace
/// declarations are ordinary attributes pushed by the caller. The writer
/// tracks open tags so attributes are rejected once content has been
/// written, and `close()` verifies balance.
///
/// ```ignore
/// let mut w = XmlWriter::new();
/// w.open("pm:Mds");
/// w.attr("Handle", "mds0");
/// w.leaf_text("pm:Type", "...");
/// w.close(); // </pm:Mds>
/// assert!(w.is_balanced());
/// ```
#[derive(Debug)]
pub struct XmlWriter {
    buf: String,
    stack: Vec<String>,
    /// Open tag still accepts attributes.
    tag_open: bool,
}

impl XmlWriter {
    /// New writer with the XML declaration.
    pub fn new() -> Self {
        Self {
            buf: String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>"),
            stack: Vec::new(),
            tag_open: false,
        }
    }

    /// New writer without the declaration (for document fragments).
    pub fn fragment() -> Self {
        Self {
            buf: String::new(),
            stack: Vec::new(),
            tag_open: false,
        }
    }

    /// Open an element.
    pub fn open(&mut self, name: &str) -> &mut Self {
        self.seal_tag();
        self.buf.push('<');
        self.buf.push_str(name);
        self.stack.push(name.to_string());
        self.tag_open = true;
        self
    }

    /// Add an attribute to the currently open tag.
    ///
    /// Must be called between `open()` and the first content write;
    /// out-of-place attributes are a programming error and are dropped with
    /// a debug-assert in test builds.
    pub fn attr(&mut self, name: &str, value: &str) -> &mut Self {
        debug_assert!(self.tag_open, "attr() after content: {}={}", name, value);
        if self.tag_open {
            self.buf.push(' ');
            self.buf.push_str(name);
            self.buf.push_str("=\"");
            self.buf.push_str(&escape_attr(value));
            self.buf.push('"');
        }
        self
    }

    /// Optional attribute helper.
    pub fn attr_opt(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value {
            self.attr(name, v);
        }
        self
    }

    /// Write escaped text content.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.seal_tag();
        self.buf.push_str(&escape_text(text));
        self
    }

    /// Splice a pre-serialized XML fragment verbatim.
    ///
    /// The fragment must be well-formed on its own; this is how preserved
    /// source blobs and reference parameters pass through untouched.
    pub fn raw(&mut self, xml: &str) -> &mut Self {
        self.seal_tag();
        self.buf.push_str(xml);
        self
    }

    /// Close the innermost open element.
    pub fn close(&mut self) -> &mut Self {
        let name = self.stack.pop().unwrap_or_default();
        if self.tag_open {
            // Empty element form.
            self.buf.push_str("/>");
            self.tag_open = false;
        } else {
            self.buf.push_str("</");
            self.buf.push_str(&name);
            self.buf.push('>');
        }
        self
    }

    /// `<name>text</name>` convenience.
    pub fn leaf_text(&mut self, name: &str, text: &str) -> &mut Self {
        self.open(name);
        self.text(text);
        self.close()
    }

    /// `<name/>` convenience.
    pub fn leaf(&mut self, name: &str) -> &mut Self {
        self.open(name);
        self.close()
    }

    /// True when every opened element has been closed.
    pub fn is_balanced(&self) -> bool {
        self.stack.is_empty() && !self.tag_open
    }

    /// Finish and return the document. Closes any still-open elements.
    pub fn finish(mut self) -> String {
        while !self.stack.is_empty() {
            self.close();
        }
        self.buf
    }

    fn seal_tag(&mut self) {
        if self.tag_open {
            self.buf.push('>');
            self.tag_open = false;
        }
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escaping() {
        assert_eq!(escape_text("a<b&c>d"), "a&lt;b&amp;c&gt;d");
        assert_eq!(escape_attr("say \"hi\""), "say &quot;hi&quot;");
        assert_eq!(escape_attr("it's"), "it&apos;s");
    }

    #[test]
    fn test_nested_elements() {
        let mut w = XmlWriter::fragment();
        w.open("a");
        w.attr("x", "1");
        w.open("b");
        w.text("t");
        w.close();
        w.close();
        assert_eq!(w.finish(), "<a x=\"1\"><b>t</b></a>");
    }

    #[test]
    fn test_empty_element_form() {
        let mut w = XmlWriter::fragment();
        w.open("a");
        w.leaf("b");
        w.close();
        assert_eq!(w.finish(), "<a><b/></a>");
    }

    #[test]
    fn test_finish_closes_dangling() {
        let mut w = XmlWriter::fragment();
        w.open("a");
        w.open("b");
        w.text("x");
        assert_eq!(w.finish(), "<a><b>x</b></a>");
    }

    #[test]
    fn test_raw_splice_roundtrips_through_parser() {
        let mut w = XmlWriter::fragment();
        w.open("outer");
        w.raw("<ident xmlns=\"urn:x\">abc</ident>");
        w.close();
        let finished = w.finish();
        let doc = roxmltree::Document::parse(&finished).expect("well-formed");
        let ident = doc
            .descendants()
            .find(|n| n.has_tag_name("ident"))
            .expect("spliced element present");
        assert_eq!(ident.text(), Some("abc"));
    }
}
