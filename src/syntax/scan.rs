//! Locating citation markers in running text.
//!
//! Two marker shapes are recognised:
//!
//! - bracketed: `[see @doe99, p. 4; @smith04]`, no nested brackets, with an
//!   `@` that has at least one character after it before the closing bracket;
//! - in-text: `@doe99` or `-@doe99`, not preceded by a word character and not
//!   inside brackets, optionally followed by a bracketed suffix such as
//!   `@doe99 [p. 33]`.

use std::ops::Range;
use tracing::trace;

/// One marker found in a text, with its byte range in that text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch<'a> {
    pub span: Range<usize>,
    pub kind: MarkerKind<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind<'a> {
    /// The text between the brackets; it starts at `span.start + 1`.
    Bracketed { body: &'a str },
    /// A bare `@key`. `key` excludes the `@` and keeps braces.
    InText {
        key: &'a str,
        key_start: usize,
        suppress_author: bool,
        suffix: Option<&'a str>,
    },
}

impl MarkerMatch<'_> {
    /// The matched marker as written.
    pub fn as_str<'t>(&self, text: &'t str) -> &'t str {
        &text[self.span.clone()]
    }
}

/// Returns the earliest marker in `text`, if any.
pub fn find_marker(text: &str) -> Option<MarkerMatch<'_>> {
    let mut depth = 0usize;
    for (index, ch) in text.char_indices() {
        match ch {
            '[' => {
                if let Some(found) = bracketed_at(text, index) {
                    trace!(span = ?found.span, "bracketed citation marker");
                    return Some(found);
                }
                depth += 1;
            }
            ']' => depth = depth.saturating_sub(1),
            '@' if depth == 0 => {
                if let Some(found) = in_text_at(text, index) {
                    trace!(span = ?found.span, "in-text citation marker");
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

/// Iterates over every marker in `text`, left to right.
pub fn find_markers(text: &str) -> impl Iterator<Item = MarkerMatch<'_>> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let found = find_marker(&text[offset..])?;
        let shifted = shift(found, offset, text);
        offset = shifted.span.end;
        Some(shifted)
    })
}

fn shift<'a>(found: MarkerMatch<'_>, offset: usize, text: &'a str) -> MarkerMatch<'a> {
    let span = found.span.start + offset..found.span.end + offset;
    let kind = match found.kind {
        MarkerKind::Bracketed { body } => MarkerKind::Bracketed {
            body: &text[span.start + 1..span.start + 1 + body.len()],
        },
        MarkerKind::InText {
            key,
            key_start,
            suppress_author,
            suffix,
        } => {
            let key_start = key_start + offset;
            let suffix = suffix.map(|suffix| {
                let end = span.end - 1;
                &text[end - suffix.len()..end]
            });
            MarkerKind::InText {
                key: &text[key_start..key_start + key.len()],
                key_start,
                suppress_author,
                suffix,
            }
        }
    };
    MarkerMatch { span, kind }
}

fn bracketed_at(text: &str, open: usize) -> Option<MarkerMatch<'_>> {
    let rest = &text[open + 1..];
    let close = rest.find([']', '['])?;
    if rest.as_bytes()[close] != b']' {
        return None;
    }
    let body = &rest[..close];
    // `@` must be followed by something before the bracket closes.
    let at = body.find('@')?;
    if at + 1 >= body.len() {
        return None;
    }
    Some(MarkerMatch {
        span: open..open + close + 2,
        kind: MarkerKind::Bracketed { body },
    })
}

fn in_text_at(text: &str, at: usize) -> Option<MarkerMatch<'_>> {
    let before = text[..at].chars().next_back();
    let (start, suppress_author) = match before {
        None => (at, false),
        Some('-') => {
            let dash = at - 1;
            if text[..dash].chars().next_back().is_some_and(is_word_char) {
                return None;
            }
            (dash, true)
        }
        Some(c) if is_word_char(c) => return None,
        Some(_) => (at, false),
    };

    let key_start = at + 1;
    let key_len = key_length(&text[key_start..])?;
    let key_end = key_start + key_len;

    let (end, suffix) = match suffix_after(&text[key_end..]) {
        Some((consumed, suffix)) => (key_end + consumed, Some(suffix)),
        None => (key_end, None),
    };

    Some(MarkerMatch {
        span: start..end,
        kind: MarkerKind::InText {
            key: &text[key_start..key_end],
            key_start,
            suppress_author,
            suffix,
        },
    })
}

/// Length in bytes of the key at the start of `text`: either `{...}` or a run
/// of key characters without trailing punctuation.
pub(crate) fn key_length(text: &str) -> Option<usize> {
    if text.starts_with('{') {
        let close = text.find('}')?;
        return (close > 1).then_some(close + 1);
    }

    let mut chars = text.char_indices();
    let (_, first) = chars.next()?;
    if !is_key_start(first) {
        return None;
    }

    // Punctuation may sit inside a key but never ends one.
    let mut last_word_end = first.len_utf8();
    for (index, ch) in chars {
        if is_word_char(ch) {
            last_word_end = index + ch.len_utf8();
        } else if !is_key_punctuation(ch) {
            break;
        }
    }
    Some(last_word_end)
}

/// `(bytes consumed, suffix text)` for an optional ` [suffix]` after a key.
fn suffix_after(text: &str) -> Option<(usize, &str)> {
    let trimmed = text.trim_start_matches(' ');
    let spaces = text.len() - trimmed.len();
    if spaces == 0 {
        return None;
    }
    let inner = trimmed.strip_prefix('[')?;
    if inner.starts_with('^') {
        return None;
    }
    let close = inner.find([']', '[', '@'])?;
    if inner.as_bytes()[close] != b']' {
        return None;
    }
    Some((spaces + 1 + close + 1, &inner[..close]))
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_key_start(c: char) -> bool {
    is_word_char(c)
}

fn is_key_punctuation(c: char) -> bool {
    matches!(
        c,
        ':' | '.' | '#' | '$' | '%' | '&' | '-' | '+' | '?' | '<' | '>' | '~'
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn matched(text: &str) -> Option<&str> {
        find_marker(text).map(|m| &text[m.span])
    }

    #[rstest]
    #[case("Equilibria exist [@Nash1950].", Some("[@Nash1950]"))]
    #[case("As @Nash1950 showed.", Some("@Nash1950"))]
    #[case("As -@Nash1950 showed.", Some("-@Nash1950"))]
    #[case("see @Nash1950 [p. 33] and more", Some("@Nash1950 [p. 33]"))]
    #[case("write to nash@princeton.edu", None)]
    #[case("A footnote[^1] and nothing else", None)]
    #[case("[@]", None)]
    #[case("[outer [@inner] text]", Some("[@inner]"))]
    #[case("@Nash1950.", Some("@Nash1950"))]
    #[case("(@Nash1950)", Some("@Nash1950"))]
    #[case("@{Nash 1950} wrote", Some("@{Nash 1950}"))]
    #[case("foo-@bar", None)]
    #[case("no markers here", None)]
    #[case("@Nash1950 [^1]", Some("@Nash1950"))]
    fn test_find_marker(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(matched(text), expected);
    }

    #[test]
    fn test_earliest_marker_wins() {
        let text = "@first then [@second]";
        assert_eq!(matched(text), Some("@first"));
    }

    #[test]
    fn test_in_text_parts() {
        let text = "so -@doe99 [chap. 2] says";
        let found = find_marker(text).unwrap();
        assert_eq!(
            found.kind,
            MarkerKind::InText {
                key: "doe99",
                key_start: 5,
                suppress_author: true,
                suffix: Some("chap. 2"),
            }
        );
        assert_eq!(found.span, 3..20);
    }

    #[test]
    fn test_bracketed_body() {
        let text = "x [see @doe99, p. 4] y";
        let found = find_marker(text).unwrap();
        assert_eq!(
            found.kind,
            MarkerKind::Bracketed {
                body: "see @doe99, p. 4"
            }
        );
    }

    #[test]
    fn test_find_markers_walks_whole_text() {
        let text = "[@a] and @b, then [-@c; @d]";
        let found: Vec<_> = find_markers(text).map(|m| m.as_str(text)).collect();
        assert_eq!(found, ["[@a]", "@b", "[-@c; @d]"]);
    }

    #[test]
    fn test_find_markers_keeps_parts_relative_to_text() {
        let text = "[@a] then @b [p. 2]";
        let found: Vec<_> = find_markers(text).collect();
        assert_eq!(
            found[1].kind,
            MarkerKind::InText {
                key: "b",
                key_start: 11,
                suppress_author: false,
                suffix: Some("p. 2"),
            }
        );
    }

    #[rstest]
    #[case("Nash1950.", Some(8))]
    #[case("doe:99-a, p. 4", Some(8))]
    #[case("{weird key}", Some(11))]
    #[case("{}", None)]
    #[case(".this", None)]
    #[case("Ünïcode rest", Some("Ünïcode".len()))]
    #[case("doe99/2 rest", Some(5))]
    fn test_key_length(#[case] text: &str, #[case] expected: Option<usize>) {
        assert_eq!(key_length(text), expected);
    }
}
