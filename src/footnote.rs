//! Merging citation footnotes with footnotes already in the document.
//!
//! In note mode every citation becomes a `sup > a[href=#cite-fn-n]` reference.
//! A document converted from markdown may also carry its own footnotes, with
//! references to `#user-content-fn-k` and a `section[data-footnotes]` holding
//! their bodies. Reconciliation numbers all references in document order and
//! writes a single section:
//!
//! 1. [`ExtractedFootnotes`]: every footnote section is removed and its entries
//!    are kept by original index.
//! 2. [`RewrittenTree`]: each reference gets the next index and is rewritten to
//!    `#user-content-fn-{n}`. A repeated reference to the same footnote keeps
//!    the index it was first given.
//! 3. [`MergedFootnoteSection`]: one entry per index, appended as the last child
//!    of the document.
//!
//! Reconciling an already reconciled document changes nothing.

use crate::styled::StyledText;
use crate::tree::{Document, Element, Node};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

const ENTRY_PREFIX: &str = "user-content-fn-";
const BACKREF_PREFIX: &str = "#user-content-fnref-";

/// Where a footnote body comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FootnoteOrigin {
    /// A note-mode citation; the body is the rendered citation text.
    Citation,
    /// A footnote that was in the document before processing.
    Existing,
}

/// One footnote of the merged section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootnoteEntry {
    pub origin: FootnoteOrigin,
    /// Index the reference pointed to before renumbering.
    pub old_id: String,
    /// 1-based index in the merged section.
    pub new_index: usize,
}

/// A document without footnote sections, and the entries those sections held.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFootnotes {
    pub document: Document,
    /// `li` elements by original index.
    pub entries: HashMap<String, Element>,
}

impl ExtractedFootnotes {
    pub fn extract(document: Document) -> Self {
        let mut entries = HashMap::new();
        let children = remove_sections(document.children, &mut entries);
        Self {
            document: Document::new(children),
            entries,
        }
    }
}

fn remove_sections(children: Vec<Node>, entries: &mut HashMap<String, Element>) -> Vec<Node> {
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Node::Element(element) if is_footnote_section(&element) => {
                collect_entries(element, entries);
            }
            Node::Element(mut element) => {
                element.children = remove_sections(std::mem::take(&mut element.children), entries);
                kept.push(Node::Element(element));
            }
            text => kept.push(text),
        }
    }
    kept
}

fn is_footnote_section(element: &Element) -> bool {
    element.is("section") && element.has_attr("data-footnotes")
}

fn collect_entries(element: Element, entries: &mut HashMap<String, Element>) {
    if element.is("li")
        && let Some(index) = element.id().and_then(|id| id.strip_prefix(ENTRY_PREFIX))
    {
        entries.insert(index.to_string(), element);
        return;
    }
    for child in element.children {
        if let Node::Element(child) = child {
            collect_entries(child, entries);
        }
    }
}

/// A document whose footnote references are renumbered in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenTree {
    pub document: Document,
    /// One entry per distinct footnote, in index order.
    pub footnotes: Vec<FootnoteEntry>,
}

impl RewrittenTree {
    pub fn rewrite(document: Document) -> Self {
        let mut numbering = Numbering::default();
        let children = numbering.rewrite_children(document.children);
        Self {
            document: Document::new(children),
            footnotes: numbering.footnotes,
        }
    }
}

#[derive(Default)]
struct Numbering {
    footnotes: Vec<FootnoteEntry>,
    /// Index and reference count of each existing footnote seen so far.
    seen: HashMap<String, (usize, usize)>,
}

impl Numbering {
    fn rewrite_children(&mut self, children: Vec<Node>) -> Vec<Node> {
        children
            .into_iter()
            .map(|child| match child {
                Node::Element(mut element) => {
                    if element.is("sup") {
                        self.rewrite_reference(&mut element);
                    }
                    element.children = self.rewrite_children(std::mem::take(&mut element.children));
                    Node::Element(element)
                }
                text => text,
            })
            .collect()
    }

    fn rewrite_reference(&mut self, sup: &mut Element) {
        let Some(link) = sup.children.first_mut().and_then(Node::as_element_mut) else {
            return;
        };
        if !link.is("a") {
            return;
        }
        let (Some(href), Some(id)) = (link.attr("href"), link.id()) else {
            return;
        };
        if !href.contains("fn") || !id.contains("fnref") {
            return;
        }

        let origin = if href.contains("cite") {
            FootnoteOrigin::Citation
        } else {
            FootnoteOrigin::Existing
        };
        let old_id = referenced_index(href).to_string();

        let repeated = match origin {
            FootnoteOrigin::Existing => self.seen.get_mut(&old_id),
            FootnoteOrigin::Citation => None,
        };
        let (index, reference_id) = match repeated {
            Some((index, count)) => {
                *count += 1;
                (*index, format!("user-content-fnref-{index}-{count}"))
            }
            None => {
                let index = self.footnotes.len() + 1;
                if origin == FootnoteOrigin::Existing {
                    self.seen.insert(old_id.clone(), (index, 1));
                }
                self.footnotes.push(FootnoteEntry {
                    origin,
                    old_id,
                    new_index: index,
                });
                (index, format!("user-content-fnref-{index}"))
            }
        };

        link.set_attr("href", format!("#{ENTRY_PREFIX}{index}"));
        link.set_attr("id", reference_id);
        link.children = vec![Node::text(index.to_string())];
    }
}

/// The index a footnote reference points at: the text after the last `fn-`.
fn referenced_index(href: &str) -> &str {
    href.rfind("fn-").map_or(href, |at| &href[at + 3..])
}

/// The footnote section built from the renumbered entries.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFootnoteSection {
    /// `None` when the document has no footnotes left.
    pub section: Option<Element>,
}

impl MergedFootnoteSection {
    /// Builds the section. Citation bodies come from `citation_bodies`, keyed
    /// by sequence id; existing bodies are taken from `existing`.
    pub fn build(
        footnotes: &[FootnoteEntry],
        mut existing: HashMap<String, Element>,
        citation_bodies: &BTreeMap<usize, StyledText>,
    ) -> Self {
        if footnotes.is_empty() {
            return Self { section: None };
        }

        let items = footnotes.iter().map(|footnote| {
            let entry = match footnote.origin {
                FootnoteOrigin::Citation => {
                    let body = footnote
                        .old_id
                        .parse::<usize>()
                        .ok()
                        .and_then(|sequence_id| citation_bodies.get(&sequence_id));
                    if body.is_none() {
                        warn!(citation = %footnote.old_id, "no text for citation footnote");
                    }
                    citation_entry(footnote.new_index, body.map(StyledText::nodes).unwrap_or_default())
                }
                FootnoteOrigin::Existing => match existing.remove(&footnote.old_id) {
                    Some(entry) => renumber_entry(entry, &footnote.old_id, footnote.new_index),
                    None => {
                        warn!(footnote = %footnote.old_id, "footnote reference without a body");
                        Element::new("li")
                            .with_attr("id", format!("{ENTRY_PREFIX}{}", footnote.new_index))
                            .with_child(Element::new("p"))
                    }
                },
            };
            Node::from(entry)
        });
        let list = Element::new("ol").with_children(items.collect::<Vec<_>>());

        if !existing.is_empty() {
            debug!(unreferenced = existing.len(), "dropped footnotes without references");
        }

        let section = Element::new("section")
            .with_flag("data-footnotes")
            .with_attr("class", "footnotes")
            .with_child(
                Element::new("h2")
                    .with_attr("class", "sr-only")
                    .with_attr("id", "footnote-label")
                    .with_child(Node::text("Footnotes")),
            )
            .with_child(list);
        Self {
            section: Some(section),
        }
    }

    /// Appends the section as the last child of `document`.
    pub fn attach(self, mut document: Document) -> Document {
        if let Some(section) = self.section {
            document.children.push(section.into());
        }
        document
    }
}

fn backref(index: usize) -> Element {
    Element::new("a")
        .with_attr("href", format!("{BACKREF_PREFIX}{index}"))
        .with_flag("data-footnote-backref")
        .with_attr("class", "data-footnote-backref")
        .with_attr("aria-label", "Back to content")
        .with_child(Node::text("↩"))
}

fn citation_entry(index: usize, body: &[Node]) -> Element {
    Element::new("li")
        .with_attr("id", format!("{ENTRY_PREFIX}{index}"))
        .with_child(
            Element::new("p")
                .with_child(Element::new("span").with_children(body.iter().cloned()))
                .with_child(backref(index)),
        )
}

/// Moves an existing entry and all its back-references to `index`.
fn renumber_entry(mut entry: Element, old_id: &str, index: usize) -> Element {
    entry.set_attr("id", format!("{ENTRY_PREFIX}{index}"));
    rewrite_backrefs(&mut entry.children, old_id, index);
    entry
}

fn rewrite_backrefs(children: &mut [Node], old_id: &str, index: usize) {
    for element in children.iter_mut().filter_map(Node::as_element_mut) {
        if element.is("a")
            && let Some(target) = element.attr("href").and_then(|h| h.strip_prefix(BACKREF_PREFIX))
        {
            // Repeated references carry a `-{k}` suffix that is kept.
            let repeat = match target.strip_prefix(old_id) {
                Some("") => Some(String::new()),
                Some(rest) if rest.starts_with('-') => Some(rest.to_string()),
                _ => None,
            };
            if let Some(repeat) = repeat {
                element.set_attr("href", format!("{BACKREF_PREFIX}{index}{repeat}"));
            }
        }
        rewrite_backrefs(&mut element.children, old_id, index);
    }
}

/// Renumbers every footnote reference of `document` in document order and
/// merges citation footnotes with existing ones into one section.
///
/// `citation_bodies` holds the formatted body of each note-mode citation by
/// sequence id.
pub fn reconcile_footnotes(
    document: Document,
    citation_bodies: &BTreeMap<usize, StyledText>,
) -> Document {
    let ExtractedFootnotes { document, entries } = ExtractedFootnotes::extract(document);
    let RewrittenTree {
        document,
        footnotes,
    } = RewrittenTree::rewrite(document);
    debug!(footnotes = footnotes.len(), "renumbered footnotes");
    MergedFootnoteSection::build(&footnotes, entries, citation_bodies).attach(document)
}
