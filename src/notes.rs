//! Note-level content processing.
//!
//! This module handles:
//! - The bootstrap welcome note
//! - Full-text search
//! - Wiki-link rendering with resolution
//! - Markdown rendering

use crate::graph::TitleIndex;
use crate::links::link_spans;
use crate::models::{Note, SearchMatch, SearchResult};
use pulldown_cmark::{Options, Parser};

// ============================================================================
// Bootstrap
// ============================================================================

pub const WELCOME_TITLE: &str = "Welcome";

const WELCOME_BODY: &str = "\
# Welcome to your notes

Every note is plain Markdown. Link to another note by writing its title in
double brackets, like [[Getting Started]]. Links are matched to titles
without regard to case.

- Type `[[` in the editor to get title suggestions.
- Open the graph view to see how your notes connect.
- Links to titles that do not exist yet stay as plain text until you create
  a note with that title.
";

/// The note the store is reset to when it is empty or unreadable.
pub fn welcome_note() -> Note {
    Note::new(WELCOME_TITLE, WELCOME_BODY).with_tags(["guide"])
}

// ============================================================================
// Full-Text Search
// ============================================================================

pub fn search_notes(notes: &[Note], query: &str) -> Vec<SearchResult> {
    use rayon::prelude::*;

    let query_lower = query.to_lowercase();
    if query_lower.trim().is_empty() {
        return Vec::new();
    }

    notes
        .par_iter()
        .filter_map(|note| {
            let mut matches = Vec::new();

            if note.title.to_lowercase().contains(&query_lower) {
                matches.push(SearchMatch {
                    line_number: 0,
                    line_content: format!("Title: {}", note.title),
                });
            }

            for (i, line) in note.content.lines().enumerate() {
                if line.to_lowercase().contains(&query_lower) {
                    matches.push(SearchMatch {
                        line_number: i + 1,
                        line_content: line.to_string(),
                    });
                }
            }

            if !matches.is_empty() {
                Some(SearchResult {
                    note_id: note.id.clone(),
                    title: note.title.clone(),
                    matches,
                })
            } else {
                None
            }
        })
        .collect()
}

// ============================================================================
// Wiki-link Processing
// ============================================================================

/// Replace each `[[Title]]` with an anchor to the resolved note, or with a
/// `missing-link` span when the title resolves to nothing. Self links still
/// render as anchors; only the graph drops them.
pub fn process_wikilinks(content: &str, index: &TitleIndex) -> String {
    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for span in link_spans(content) {
        result.push_str(&content[last..span.range.start]);
        let replacement = match index.resolve(span.title) {
            Some(id) => format!(
                r#"<a href="/note/{}" class="wikilink">{}</a>"#,
                id,
                html_escape(span.title)
            ),
            None => format!(
                r#"<span class="missing-link">{}</span>"#,
                html_escape(span.title)
            ),
        };
        result.push_str(&replacement);
        last = span.range.end;
    }
    result.push_str(&content[last..]);

    result
}

// ============================================================================
// Text Escaping
// ============================================================================

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

// ============================================================================
// Markdown Rendering
// ============================================================================

pub fn render_markdown(content: &str) -> String {
    let parser = Parser::new_ext(content, Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES);
    let mut html_output = String::new();
    pulldown_cmark::html::push_html(&mut html_output, parser);
    // Sanitize HTML to prevent XSS from raw HTML in markdown
    ammonia::Builder::default()
        .add_tag_attributes("a", &["class"])
        .add_tag_attributes("span", &["class"])
        .clean(&html_output)
        .to_string()
}

/// Render a note body: resolve wiki-links, then Markdown, then sanitize.
pub fn render_note_body(note: &Note, index: &TitleIndex) -> String {
    render_markdown(&process_wikilinks(&note.content, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(notes: &[Note]) -> TitleIndex {
        TitleIndex::build(notes)
    }

    // ---- search ----

    #[test]
    fn test_search_matches_title_and_lines() {
        let notes = vec![
            Note::new("Space", "The void\nstars and space dust"),
            Note::new("Cooking", "pasta"),
        ];
        let results = search_notes(&notes, "SPACE");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].matches.len(), 2);
        assert_eq!(results[0].matches[0].line_number, 0);
        assert_eq!(results[0].matches[1].line_number, 2);
    }

    #[test]
    fn test_search_blank_query_is_empty() {
        let notes = vec![Note::new("Space", "x")];
        assert!(search_notes(&notes, "  ").is_empty());
    }

    // ---- wiki-links ----

    #[test]
    fn test_resolved_link_becomes_anchor() {
        let space = Note::new("Space", "intro");
        let notes = vec![space.clone()];
        let html = process_wikilinks("See [[space]].", &index_of(&notes));
        assert_eq!(
            html,
            format!(r#"See <a href="/note/{}" class="wikilink">space</a>."#, space.id)
        );
    }

    #[test]
    fn test_unresolved_link_is_plain_text() {
        let html = process_wikilinks("See [[Nowhere]] and [[]]", &index_of(&[]));
        assert_eq!(
            html,
            r#"See <span class="missing-link">Nowhere</span> and <span class="missing-link"></span>"#
        );
    }

    #[test]
    fn test_link_titles_are_escaped() {
        let html = process_wikilinks("[[<b>]]", &index_of(&[]));
        assert!(html.contains("&lt;b&gt;"));
    }

    // ---- markdown ----

    #[test]
    fn test_render_keeps_link_classes_and_strips_scripts() {
        let space = Note::new("Space", "");
        let note = Note::new("B", "See [[Space]] <script>alert(1)</script>");
        let html = render_note_body(&note, &index_of(&[space.clone(), note.clone()]));
        assert!(html.contains(&format!("/note/{}", space.id)));
        assert!(html.contains("wikilink"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_welcome_note_is_tagged() {
        let note = welcome_note();
        assert_eq!(note.title, WELCOME_TITLE);
        assert_eq!(note.tags, vec!["guide".to_string()]);
    }
}
