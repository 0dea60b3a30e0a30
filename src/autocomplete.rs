//! `[[` title suggestions while typing.
//!
//! Cursor offsets are byte offsets into the body. An offset that falls inside
//! a multi-byte character is moved back to the previous character boundary.

use crate::links::format_link;
use crate::models::Note;
use serde::{Deserialize, Serialize};

pub const MAX_SUGGESTIONS: usize = 10;

const TRIGGER: &str = "[[";
const CLOSER: &str = "]]";

/// An open `[[` the cursor sits in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Byte offset of the `[[`.
    pub start: usize,
    /// Byte offset of the cursor; the span `start..cursor` is replaced on accept.
    pub cursor: usize,
    /// Text typed after the `[[`.
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub title: String,
}

/// Result of accepting a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub body: String,
    pub cursor: usize,
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// The open trigger around `cursor`, if any: the last `[[` before the cursor
/// with neither `]]` nor a newline between it and the cursor.
pub fn find_trigger(body: &str, cursor: usize) -> Option<Trigger> {
    let cursor = floor_char_boundary(body, cursor);
    let before = &body[..cursor];
    let start = before.rfind(TRIGGER)?;
    let filter = &before[start + TRIGGER.len()..];
    if filter.contains(CLOSER) || filter.contains('\n') {
        return None;
    }
    Some(Trigger {
        start,
        cursor,
        filter: filter.to_string(),
    })
}

/// Titles matching `filter` as a case-insensitive substring, ranked by where
/// the match starts and then by `notes` order. The current note and blank
/// titles are never offered.
pub fn rank_titles(notes: &[Note], filter: &str, exclude_id: Option<&str>, limit: usize) -> Vec<Suggestion> {
    let needle = filter.to_lowercase();
    let mut ranked: Vec<(usize, usize, &Note)> = notes
        .iter()
        .enumerate()
        .filter(|(_, n)| Some(n.id.as_str()) != exclude_id && !n.title.trim().is_empty())
        .filter_map(|(order, n)| {
            n.title
                .to_lowercase()
                .find(&needle)
                .map(|pos| (pos, order, n))
        })
        .collect();
    ranked.sort_by_key(|&(pos, order, _)| (pos, order));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, _, n)| Suggestion {
            id: n.id.clone(),
            title: n.title.clone(),
        })
        .collect()
}

/// Suggestions for the cursor position, or `None` when the popup should be
/// closed.
pub fn suggest(
    body: &str,
    cursor: usize,
    notes: &[Note],
    current_id: Option<&str>,
) -> Option<(Trigger, Vec<Suggestion>)> {
    let trigger = find_trigger(body, cursor)?;
    let suggestions = rank_titles(notes, &trigger.filter, current_id, MAX_SUGGESTIONS);
    Some((trigger, suggestions))
}

/// Replace the open trigger with a closed `[[title]]` and put the cursor
/// right after it. Anything after the cursor is kept as is.
pub fn accept(body: &str, trigger: &Trigger, title: &str) -> Completion {
    let start = floor_char_boundary(body, trigger.start);
    let end = floor_char_boundary(body, trigger.cursor.max(start));
    let token = format_link(title);
    let mut out = String::with_capacity(body.len() + token.len());
    out.push_str(&body[..start]);
    out.push_str(&token);
    let cursor = out.len();
    out.push_str(&body[end..]);
    Completion { body: out, cursor }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(titles: &[&str]) -> Vec<Note> {
        titles.iter().map(|t| Note::new(*t, "")).collect()
    }

    fn titles(s: &[Suggestion]) -> Vec<&str> {
        s.iter().map(|s| s.title.as_str()).collect()
    }

    // ---- trigger detection ----

    #[test]
    fn test_open_trigger_offers_match() {
        let body = "Check [[Sp";
        let all = notes(&["Space", "Cooking"]);
        let (trigger, found) = suggest(body, body.len(), &all, None).unwrap();
        assert_eq!(trigger.filter, "Sp");
        assert_eq!(trigger.start, 6);
        assert_eq!(titles(&found), vec!["Space"]);
    }

    #[test]
    fn test_closed_link_closes_popup() {
        let body = "Check [[Sp]] more";
        assert!(suggest(body, body.len(), &notes(&["Space"]), None).is_none());
    }

    #[test]
    fn test_newline_closes_popup() {
        let body = "[[Sp\nace";
        assert!(find_trigger(body, body.len()).is_none());
    }

    #[test]
    fn test_no_trigger_closes_popup() {
        assert!(find_trigger("plain text", 5).is_none());
        assert!(find_trigger("[single", 7).is_none());
    }

    #[test]
    fn test_nearest_trigger_wins() {
        let body = "[[a[[b";
        let t = find_trigger(body, body.len()).unwrap();
        assert_eq!(t.start, 3);
        assert_eq!(t.filter, "b");
    }

    #[test]
    fn test_cursor_in_middle_only_sees_prefix() {
        let body = "[[Spa]] and [[Ti]]";
        // cursor right after "[[Ti"
        let cursor = body.find("Ti").unwrap() + 2;
        let t = find_trigger(body, cursor).unwrap();
        assert_eq!(t.filter, "Ti");
    }

    #[test]
    fn test_cursor_inside_multibyte_char_is_clamped() {
        let body = "[[é";
        // byte 3 is inside 'é'
        let t = find_trigger(body, 3).unwrap();
        assert_eq!(t.cursor, 2);
        assert_eq!(t.filter, "");
        assert!(find_trigger(body, 99).is_some());
    }

    // ---- ranking ----

    #[test]
    fn test_empty_filter_lists_all_up_to_cap() {
        let many: Vec<String> = (0..15).map(|i| format!("Note {}", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let all = notes(&refs);
        let (_, found) = suggest("[[", 2, &all, None).unwrap();
        assert_eq!(found.len(), MAX_SUGGESTIONS);
        assert_eq!(found[0].title, "Note 0");
    }

    #[test]
    fn test_ranked_by_match_position_then_order() {
        let all = notes(&["Outer Space", "Space", "spaceship", "Time"]);
        let found = rank_titles(&all, "SPACE", None, 10);
        assert_eq!(titles(&found), vec!["Space", "spaceship", "Outer Space"]);
    }

    #[test]
    fn test_current_note_and_blank_titles_are_excluded() {
        let all = notes(&["Space", "", "Spaces"]);
        let found = rank_titles(&all, "", Some(&all[0].id), 10);
        assert_eq!(titles(&found), vec!["Spaces"]);
    }

    // ---- accepting ----

    #[test]
    fn test_accept_closes_token_and_moves_cursor() {
        let body = "Check [[Sp";
        let t = find_trigger(body, body.len()).unwrap();
        let done = accept(body, &t, "Space");
        assert_eq!(done.body, "Check [[Space]]");
        assert_eq!(done.cursor, done.body.len());
    }

    #[test]
    fn test_accept_keeps_text_after_cursor() {
        let body = "a [[Sp tail";
        let cursor = body.find(" tail").unwrap();
        let t = find_trigger(body, cursor).unwrap();
        let done = accept(body, &t, "Space");
        assert_eq!(done.body, "a [[Space]] tail");
        assert_eq!(&done.body[..done.cursor], "a [[Space]]");
    }
}
