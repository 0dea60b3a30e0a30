//! Wiki-link extraction.
//!
//! A wiki-link is `[[Title]]` where the title is the shortest run of
//! characters, excluding newlines, that is followed by `]]`. Matches never
//! overlap and are scanned left to right. There is no escaping syntax, and
//! malformed or unterminated brackets simply do not match.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `.` excludes '\n'; the lazy quantifier stops at the first `]]`.
    RE.get_or_init(|| Regex::new(r"\[\[(.*?)\]\]").expect("static regex"))
}

/// One link token located in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan<'a> {
    /// Byte range of the whole `[[...]]` token.
    pub range: Range<usize>,
    /// The raw title between the brackets (may be empty).
    pub title: &'a str,
}

/// Every link token in `body`, in order of appearance.
pub fn link_spans(body: &str) -> Vec<LinkSpan<'_>> {
    link_regex()
        .captures_iter(body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = caps.get(1)?;
            Some(LinkSpan {
                range: whole.range(),
                title: title.as_str(),
            })
        })
        .collect()
}

/// Raw titles of every link in `body`, in order. Performs no resolution.
pub fn extract_links(body: &str) -> Vec<String> {
    link_spans(body)
        .into_iter()
        .map(|span| span.title.to_string())
        .collect()
}

/// Whether `title` survives a round trip through the `[[...]]` wire format.
pub fn is_valid_link_title(title: &str) -> bool {
    !title.contains('\n') && !title.contains("]]") && !title.ends_with(']')
}

/// The wire token for `title`.
pub fn format_link(title: &str) -> String {
    format!("[[{}]]", title)
}

/// Replace every link token with its bare title.
pub fn strip_links(body: &str) -> String {
    link_regex().replace_all(body, "$1").into_owned()
}
