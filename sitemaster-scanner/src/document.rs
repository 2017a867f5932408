//! Queryable document tree for one fetched page.
//!
//! Markup is run through the html5ever tree builder, which recovers from
//! unclosed tags, stray end tags and the other breakage found on real pages
//! the same way browsers do. Only input that cannot be markup at all is
//! rejected.

use crate::error::{ParseError, QueryError};
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;

/// Parsed page markup. Never mutated after [`DocumentModel::parse`].
pub struct DocumentModel {
    html: Html,
}

/// An element matched by [`DocumentModel::query`].
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    element: ElementRef<'a>,
}

impl<'a> Node<'a> {
    pub fn name(&self) -> &'a str {
        self.element.value().name()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Concatenated text of all descendant text nodes.
    pub fn text(&self) -> String {
        self.element.text().collect()
    }
}

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG", "PNG"),
    (b"\xFF\xD8\xFF", "JPEG"),
    (b"GIF8", "GIF"),
    (b"%PDF-", "PDF"),
    (b"PK\x03\x04", "ZIP"),
    (b"\x1F\x8B", "gzip"),
    (b"\x00asm", "WebAssembly"),
];

fn binary_signature(raw: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| raw.starts_with(magic))
        .map(|(_, format)| *format)
}

/// UTF-16 is only detected by its byte order mark; everything else is read
/// as UTF-8 with invalid sequences replaced.
fn decode(raw: &[u8]) -> Cow<'_, str> {
    let utf16 = |bytes: &[u8], unit: fn([u8; 2]) -> u16| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| unit([pair[0], pair[1]]))
            .collect();
        Cow::Owned(String::from_utf16_lossy(&units))
    };

    match raw {
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest),
        _ => String::from_utf8_lossy(raw),
    }
}

/// A `<` opening a start tag, end tag, comment or doctype.
fn has_tag(text: &str) -> bool {
    text.split('<').skip(1).any(|after| {
        after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!')
    })
}

impl DocumentModel {
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if let Some(format) = binary_signature(raw) {
            return Err(ParseError::NotMarkup(format!("{} data", format)));
        }

        let text = decode(raw);
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if !has_tag(&text) {
            return Err(ParseError::NotMarkup("no tags found".to_string()));
        }

        let html = Html::parse_document(&text);
        Ok(Self { html })
    }

    /// Evaluate a CSS selector against the tree, returning matches in
    /// document order. Every call re-evaluates.
    pub fn query(&self, expression: &str) -> Result<Vec<Node<'_>>, QueryError> {
        let selector =
            Selector::parse(expression).map_err(|e| QueryError::InvalidExpression {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;

        Ok(self
            .html
            .select(&selector)
            .map(|element| Node { element })
            .collect())
    }

    /// Trimmed text of the first `<title>`, if it has any.
    pub fn title(&self) -> Option<String> {
        let titles = self.query("title").ok()?;
        let title = titles.first()?.text();
        let title = title.trim();
        if title.is_empty() {
            None
        } else {
            Some(title.to_string())
        }
    }

    pub fn recovered_errors(&self) -> usize {
        self.html.errors.len()
    }

    pub fn root(&self) -> Node<'_> {
        Node {
            element: self.html.root_element(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_input() {
        assert_eq!(DocumentModel::parse(b"").err(), Some(ParseError::Empty));
        assert_eq!(DocumentModel::parse(b"  \n\t ").err(), Some(ParseError::Empty));
    }

    #[test]
    fn test_parse_non_markup() {
        let result = DocumentModel::parse(b"just some plain words");
        assert!(matches!(result, Err(ParseError::NotMarkup(_))));

        let result = DocumentModel::parse(&[0x89, b'P', b'N', b'G', 0x00, b'<']);
        assert!(matches!(result, Err(ParseError::NotMarkup(_))));

        let result = DocumentModel::parse(b"if (a < 3) { return; }");
        assert!(matches!(result, Err(ParseError::NotMarkup(_))));

        let result = DocumentModel::parse(b"%PDF-1.7 <html>");
        assert!(matches!(result, Err(ParseError::NotMarkup(_))));
    }

    #[test]
    fn test_parse_tolerates_nul_bytes() {
        let doc = DocumentModel::parse(
            b"<html><head><title>T</title></head><body><script>var s='a\0b';</script><a href='/x'>x</a></body></html>",
        )
        .expect("stray NUL is recoverable");

        assert_eq!(doc.title(), Some("T".to_string()));
        assert_eq!(doc.query("a[href]").unwrap()[0].attr("href"), Some("/x"));

        let doc = DocumentModel::parse(b"<p>a\0b</p><a href='/y'>y</a>").unwrap();
        assert_eq!(doc.query("a").unwrap().len(), 1);
    }

    #[test]
    fn test_parse_utf16_with_bom() {
        let mut raw = vec![0xFF, 0xFE];
        for unit in "<html><head><title>Wide</title></head></html>".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }

        let doc = DocumentModel::parse(&raw).unwrap();
        assert_eq!(doc.title(), Some("Wide".to_string()));
    }

    #[test]
    fn test_recovered_errors_counted() {
        let clean = DocumentModel::parse(b"<!DOCTYPE html><html><head><title>T</title></head><body></body></html>").unwrap();
        assert_eq!(clean.recovered_errors(), 0);

        let broken = DocumentModel::parse(b"<p>one</div></span>").unwrap();
        assert!(broken.recovered_errors() > 0);
    }

    #[test]
    fn test_parse_recovers_from_unclosed_tags() {
        let doc = DocumentModel::parse(b"<html><body><div><p>one<p>two<a href='/x'>x</body>")
            .expect("lenient parse");

        assert_eq!(doc.query("p").unwrap().len(), 2);
        assert_eq!(doc.query("a[href]").unwrap()[0].attr("href"), Some("/x"));
    }

    #[test]
    fn test_query_is_restartable() {
        let doc = DocumentModel::parse(b"<ul><li>a</li><li>b</li></ul>").unwrap();

        let first: Vec<String> = doc.query("li").unwrap().iter().map(|n| n.text()).collect();
        let second: Vec<String> = doc.query("li").unwrap().iter().map(|n| n.text()).collect();

        assert_eq!(first, vec!["a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_query_invalid_expression() {
        let doc = DocumentModel::parse(b"<p>hi</p>").unwrap();
        let err = doc.query("p[").unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpression { .. }));
    }

    #[test]
    fn test_title() {
        let doc = DocumentModel::parse(b"<html><head><title>  Home  </title></head></html>").unwrap();
        assert_eq!(doc.title(), Some("Home".to_string()));

        let doc = DocumentModel::parse(b"<html><head><title>   </title></head></html>").unwrap();
        assert_eq!(doc.title(), None);

        let doc = DocumentModel::parse(b"<html><body>no title</body></html>").unwrap();
        assert_eq!(doc.title(), None);
    }

    #[test]
    fn test_root_is_html_element() {
        let doc = DocumentModel::parse(b"<p>hi</p>").unwrap();
        assert_eq!(doc.root().name(), "html");
    }
}
