//! Decoding matched markers into [`CiteItem`]s.
//!
//! A bracketed marker is split on top-level `;` into segments, each holding
//! exactly one `@key`. Text before the key is the prefix (a trailing `-`
//! suppresses the author); text after it may start with a locator label and a
//! locator, the rest being the suffix:
//!
//! ```text
//! [see @doe99, pp. 33-35, 38-39 and *passim*]
//!  ^^^ ^^^^^^  ^^^ ^^^^^^^^^^^^ ^^^^^^^^^^^^^
//!  prefix key  label  locator    suffix
//! ```
//!
//! An explicit locator can be given in braces, `@doe99, {pp. iv, 12} and
//! more`, in which case it is taken as written.

use super::labels::{Label, leading_label};
use super::scan::{MarkerKind, MarkerMatch, find_marker, key_length};
use crate::CiteItem;
use crate::error::{ParseError, SourceSpan, SyntaxError};

/// The items of one marker and whether it was a bare in-text mention.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCitation {
    pub items: Vec<CiteItem>,
    pub is_composite: bool,
}

/// Decodes a marker found by [`find_marker`](super::find_marker).
///
/// Error spans are relative to the text the marker was found in.
pub fn decode(marker: &MarkerMatch<'_>) -> Result<ParsedCitation, ParseError> {
    match marker.kind {
        MarkerKind::Bracketed { body } => decode_bracketed(body, marker.span.start + 1),
        MarkerKind::InText {
            key,
            suppress_author,
            suffix,
            ..
        } => {
            let mut item = CiteItem::new(strip_braces(key));
            item.suppress_author = suppress_author;
            if let Some(suffix) = suffix {
                let parts = split_locator(suffix);
                item.label = parts.label;
                item.locator = parts.locator;
                item.suffix = parts.suffix;
            }
            Ok(ParsedCitation {
                items: vec![item],
                is_composite: true,
            })
        }
    }
}

/// Parses a single marker given on its own, e.g. `"[see @doe99, p. 4]"` or
/// `"-@doe99"`.
///
/// ```
/// use citetree::parse_citation;
///
/// let parsed = parse_citation("[@Ranciere1999, 22 and 32]").unwrap();
/// assert_eq!(parsed.items[0].locator.as_deref(), Some("22"));
/// assert_eq!(parsed.items[0].suffix.as_deref(), Some("and 32"));
///
/// assert!(parse_citation("[Double ID @structure2901 @second1990]").is_err());
/// ```
pub fn parse_citation(input: &str) -> Result<ParsedCitation, ParseError> {
    let trimmed = input.trim_start();
    let offset = input.len() - trimmed.len();
    let trimmed = trimmed.trim_end();

    if let Some(body) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        return decode_bracketed(body, offset + 1);
    }

    match find_marker(trimmed) {
        Some(marker) if marker.span == (0..trimmed.len()) => {
            decode(&marker).map_err(|e| e.offset_by(offset))
        }
        _ => Err(ParseError::new(SyntaxError::NotAMarker(trimmed.to_string()))
            .with_span(SourceSpan::new(offset, offset + trimmed.len()))),
    }
}

fn decode_bracketed(body: &str, offset: usize) -> Result<ParsedCitation, ParseError> {
    let items = split_segments(body)
        .into_iter()
        .enumerate()
        .map(|(index, (start, segment))| {
            decode_segment(segment, offset + start).map_err(|e| e.in_segment(index))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedCitation {
        items,
        is_composite: false,
    })
}

/// Splits on `;` outside braces, keeping each segment's byte offset.
fn split_segments(body: &str) -> Vec<(usize, &str)> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in body.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                segments.push((start, &body[start..index]));
                start = index + 1;
            }
            _ => {}
        }
    }
    segments.push((start, &body[start..]));
    segments
}

fn decode_segment(segment: &str, offset: usize) -> Result<CiteItem, ParseError> {
    let trimmed = segment.trim_start();
    let offset = offset + segment.len() - trimmed.len();
    let segment = trimmed.trim_end();
    let span = SourceSpan::new(offset, offset + segment.len());

    let ats = key_markers(segment);
    let at = match ats.as_slice() {
        [at] => *at,
        [] => return Err(ParseError::new(SyntaxError::MissingKey).with_span(span)),
        _ => {
            return Err(
                ParseError::new(SyntaxError::MultipleKeys { count: ats.len() }).with_span(span),
            );
        }
    };

    let mut prefix = segment[..at].trim();
    let suppress_author = prefix.ends_with('-');
    if suppress_author {
        prefix = prefix[..prefix.len() - 1].trim_end();
    }

    let after_at = &segment[at + 1..];
    let Some(key_len) = key_length(after_at) else {
        let token_len = after_at
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(after_at.len());
        let start = offset + at;
        return Err(ParseError::new(SyntaxError::InvalidKey {
            key: after_at[..token_len].to_string(),
        })
        .with_span(SourceSpan::new(start, start + 1 + token_len)));
    };

    let mut item = CiteItem::new(strip_braces(&after_at[..key_len]));
    item.prefix = non_empty(prefix);
    item.suppress_author = suppress_author;

    let remainder = after_at[key_len..].trim_start();
    let remainder = remainder.strip_prefix(',').unwrap_or(remainder);
    let parts = split_locator(remainder);
    item.label = parts.label;
    item.locator = parts.locator;
    item.suffix = parts.suffix;

    Ok(item)
}

/// Byte offsets of every `@` outside braces.
fn key_markers(segment: &str) -> Vec<usize> {
    let mut depth = 0usize;
    segment
        .char_indices()
        .filter(|&(_, ch)| {
            match ch {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
            ch == '@' && depth == 0
        })
        .map(|(index, _)| index)
        .collect()
}

fn strip_braces(key: &str) -> &str {
    key.strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(key)
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn trailing_suffix(text: &str) -> Option<String> {
    let text = text.trim_start();
    non_empty(text.strip_prefix(',').unwrap_or(text))
}

/// Label, locator and suffix found in the text after a key.
#[derive(Debug, PartialEq)]
pub(crate) struct LocatorParts {
    pub label: Label,
    pub locator: Option<String>,
    pub suffix: Option<String>,
}

pub(crate) fn split_locator(text: &str) -> LocatorParts {
    let text = text.trim();

    if let Some(inner) = text.strip_prefix('{')
        && let Some(close) = inner.find('}')
    {
        let explicit = inner[..close].trim();
        let rest = inner[close + 1..].trim_start();
        let rest = rest.strip_prefix(',').unwrap_or(rest);
        let (label, label_len) = leading_label(explicit).unwrap_or_default();
        return LocatorParts {
            label,
            locator: non_empty(&explicit[label_len..]),
            suffix: non_empty(rest),
        };
    }

    if let Some((label, label_len)) = leading_label(text) {
        let rest = text[label_len..].trim_start();
        if let Some(end) = locator_run(rest, true) {
            return LocatorParts {
                label,
                locator: non_empty(&rest[..end]),
                suffix: trailing_suffix(&rest[end..]),
            };
        }
    } else if let Some((start, len)) = unlabelled_locator(text) {
        // Unrecognised label text before the locator counts as `page`.
        let end = start + len;
        return LocatorParts {
            label: Label::Page,
            locator: non_empty(&text[start..end]),
            suffix: trailing_suffix(&text[end..]),
        };
    }

    LocatorParts {
        label: Label::Page,
        locator: None,
        suffix: non_empty(text),
    }
}

/// Byte length of a page-style range at the start of `text`: digits joined by
/// dashes, commas and spaces, ending on a digit. Roman numerals are accepted
/// when `roman` is set and the run is not followed by a letter.
fn locator_run(text: &str, roman: bool) -> Option<usize> {
    let is_joiner = |c: char| matches!(c, ',' | ' ' | '-' | '–');

    let first = text.chars().next()?;
    let roman = if first.is_ascii_digit() {
        false
    } else if roman && is_roman(first) {
        true
    } else {
        return None;
    };
    let numeral = |c: char| if roman { is_roman(c) } else { c.is_ascii_digit() };

    let mut end = 0;
    for (index, ch) in text.char_indices() {
        if numeral(ch) {
            end = index + ch.len_utf8();
        } else if !is_joiner(ch) {
            break;
        }
    }

    if roman && text[end..].chars().next().is_some_and(char::is_alphabetic) {
        return None;
    }
    Some(end)
}

/// Start and length of the first digit run that can be a locator. A run at
/// the very start always counts; later runs must stand as a word of their own.
fn unlabelled_locator(text: &str) -> Option<(usize, usize)> {
    let mut previous: Option<char> = None;
    for (index, ch) in text.char_indices() {
        if ch.is_ascii_digit()
            && !previous.is_some_and(char::is_alphanumeric)
            && let Some(len) = locator_run(&text[index..], false)
            && (index == 0
                || !text[index + len..]
                    .chars()
                    .next()
                    .is_some_and(char::is_alphanumeric))
        {
            return Some((index, len));
        }
        previous = Some(ch);
    }
    None
}

fn is_roman(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'i' | 'v' | 'x' | 'l' | 'c' | 'd' | 'm')
}
