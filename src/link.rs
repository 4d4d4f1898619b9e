//! Hyperlinking rendered citations to their bibliography entries.
//!
//! The resolver works on the plain text an engine returned for a cluster and
//! finds the byte ranges that belong to each cited entry:
//!
//! - numeric styles: every digit run, left to right, belongs to the next item;
//! - author-date styles with one item: the whole text for a bare mention, the
//!   text inside the brackets otherwise;
//! - author-date styles with several items: the registry token of each entry
//!   (usually "Author, Year") is searched from a cursor that only moves
//!   forward. When an author is collapsed ("Nash, 1950, 1951") the year is
//!   searched instead.
//!
//! Other citation formats are never linked.

use crate::engine::{CitationEngine, RegistryItem};
use crate::tree::{Element, Node};
use crate::{CitationCluster, CitationFormat};
use itertools::Itertools;
use std::ops::Range;

/// A range of the citation text that links to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    pub range: Range<usize>,
    /// Bibliography key, exact case.
    pub id: String,
}

/// Finds the link spans of a rendered cluster. Spans are sorted and never
/// overlap.
pub fn link_spans(
    text: &str,
    cluster: &CitationCluster,
    format: CitationFormat,
    engine: &dyn CitationEngine,
) -> Vec<LinkSpan> {
    match format {
        CitationFormat::Numeric => numeric_links(text, &cluster.ids().collect_vec()),
        CitationFormat::AuthorDate if cluster.items.len() == 1 => {
            single_item_link(text, &cluster.items[0].id, cluster.is_composite)
                .into_iter()
                .collect()
        }
        CitationFormat::AuthorDate => {
            let ids = cluster.ids().unique().collect_vec();
            author_date_links(text, &engine.registry_items(&ids))
        }
        _ => Vec::new(),
    }
}

/// Pairs every digit run with the item at the same position. Runs beyond the
/// last item stay unlinked.
pub fn numeric_links(text: &str, ids: &[&str]) -> Vec<LinkSpan> {
    digit_runs(text)
        .zip(ids)
        .map(|(range, id)| LinkSpan {
            range,
            id: id.to_string(),
        })
        .collect()
}

fn digit_runs(text: &str) -> impl Iterator<Item = Range<usize>> + '_ {
    let bytes = text.as_bytes();
    let mut cursor = 0;
    std::iter::from_fn(move || {
        let start = cursor + bytes[cursor..].iter().position(u8::is_ascii_digit)?;
        let len = bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        cursor = start + len;
        Some(start..cursor)
    })
}

/// A bare mention links as a whole; a bracketed citation keeps its brackets
/// outside the link.
fn single_item_link(text: &str, id: &str, is_composite: bool) -> Option<LinkSpan> {
    let range = if is_composite {
        0..text.len()
    } else {
        let first = text.chars().next()?;
        let last = text.chars().next_back()?;
        let start = first.len_utf8();
        let end = text.len() - last.len_utf8();
        if start >= end {
            return None;
        }
        start..end
    };
    (!range.is_empty()).then(|| LinkSpan {
        range,
        id: id.to_string(),
    })
}

/// Links each registry item in turn, searching from the end of the previous
/// link.
pub fn author_date_links(text: &str, items: &[RegistryItem]) -> Vec<LinkSpan> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    for (index, item) in items.iter().enumerate() {
        let rest = &text[cursor..];
        let mut found = find_token(rest, &item.token);

        if found.is_none()
            && index > 0
            && same_authors(&items[index - 1], item)
            && let Some(year) = item.year.as_deref()
        {
            found = find_token(rest, year);
        }

        if let Some(range) = found {
            let range = range.start + cursor..range.end + cursor;
            cursor = range.end;
            spans.push(LinkSpan {
                range,
                id: item.id.clone(),
            });
        }
    }

    spans
}

fn find_token(text: &str, token: &str) -> Option<Range<usize>> {
    if token.is_empty() {
        return None;
    }
    text.find(token).map(|start| start..start + token.len())
}

fn same_authors(a: &RegistryItem, b: &RegistryItem) -> bool {
    !a.author_families.is_empty() && a.author_families == b.author_families
}

/// Builds the children of a linked citation span. `tooltip` gives the
/// attribute to set on the link for an entry, if any.
pub fn linked_nodes(
    text: &str,
    spans: &[LinkSpan],
    tooltip: impl Fn(&str) -> Option<(String, String)>,
) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(spans.len() * 2 + 1);
    let mut position = 0;

    for span in spans {
        if span.range.start > position {
            nodes.push(Node::text(&text[position..span.range.start]));
        }
        let mut link = Element::new("a")
            .with_attr("href", format!("#bib-{}", span.id.to_lowercase()))
            .with_child(Node::text(&text[span.range.clone()]));
        if let Some((name, value)) = tooltip(&span.id) {
            link.set_attr(name, value);
        }
        nodes.push(link.into());
        position = span.range.end;
    }

    if position < text.len() {
        nodes.push(Node::text(&text[position..]));
    }
    nodes
}
