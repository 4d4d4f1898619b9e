//! The citation pass.
//!
//! Walks a document in depth-first, left-to-right order and replaces every
//! citation marker found in the text of a permitted container with a rendered
//! citation. Each marker becomes one [`CitationCluster`] with the next
//! sequence id; the engine receives the ids of all clusters rendered before it.
//!
//! A marker that does not decode, or that names a key missing from the
//! bibliography, is left as written and scanning continues after it.
//!
//! Sibling lists are rebuilt per parent: the pass consumes the old children and
//! returns a new list, it never edits a list it is iterating.

use crate::config::{CitationOptions, UnknownKeyPolicy};
use crate::engine::CitationEngine;
use crate::error::EngineError;
use crate::link::{link_spans, linked_nodes};
use crate::styled::StyledText;
use crate::syntax::{MarkerMatch, decode, find_markers};
use crate::tree::{Document, Element, Node};
use crate::{CitationCluster, CitationFormat, CitationMode};
use either::{Either, Left, Right};
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Elements whose direct text children are scanned for markers.
pub const PERMITTED_TAGS: &[&str] = &["p", "div", "span", "li", "td", "th", "dd", "figcaption"];

/// A cluster after rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCitation {
    pub sequence_id: usize,
    /// Keys of the cluster's items, exact case, in marker order.
    pub ids: Vec<String>,
    /// Plain text of `content`.
    pub plain_text: String,
    /// Formatted text returned by the engine.
    pub content: StyledText,
    pub mode: CitationMode,
}

impl RenderedCitation {
    /// `id` of the node spliced into the document.
    pub fn node_id(&self) -> String {
        citation_node_id(&self.ids, self.sequence_id)
    }
}

/// Output of the citation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CitedDocument {
    pub document: Document,
    pub format: CitationFormat,
    pub mode: CitationMode,
    /// Every spliced citation, in sequence order.
    pub citations: Vec<RenderedCitation>,
}

impl CitedDocument {
    /// Footnote bodies of note-mode citations, by sequence id.
    pub fn note_bodies(&self) -> BTreeMap<usize, StyledText> {
        self.citations
            .iter()
            .filter(|citation| citation.mode == CitationMode::Note)
            .map(|citation| (citation.sequence_id, citation.content.clone()))
            .collect()
    }
}

/// `citation--{ids}--{n}` with lowercased ids.
pub fn citation_node_id<S: AsRef<str>>(ids: &[S], sequence_id: usize) -> String {
    format!(
        "citation--{}--{}",
        ids.iter().map(|id| id.as_ref().to_lowercase()).join("--"),
        sequence_id
    )
}

/// Replaces citation markers in one document.
pub struct CitationPass<'a> {
    engine: &'a mut dyn CitationEngine,
    options: &'a CitationOptions,
    known_ids: &'a HashSet<String>,
    format: CitationFormat,
    mode: CitationMode,
    citation_pre: Vec<usize>,
    rendered: Vec<RenderedCitation>,
    tooltips: HashMap<String, String>,
}

impl<'a> CitationPass<'a> {
    /// `known_ids` are the bibliography keys a marker may name.
    pub fn new(
        engine: &'a mut dyn CitationEngine,
        options: &'a CitationOptions,
        known_ids: &'a HashSet<String>,
    ) -> Self {
        let format = engine.citation_format();
        let mode = if engine.is_note_style() {
            CitationMode::Note
        } else {
            CitationMode::InText
        };
        Self {
            engine,
            options,
            known_ids,
            format,
            mode,
            citation_pre: Vec::new(),
            rendered: Vec::new(),
            tooltips: HashMap::new(),
        }
    }

    /// Runs the pass over `document`.
    pub fn run(mut self, document: Document) -> Result<CitedDocument, EngineError> {
        let children = self.rewrite_children(false, document.children)?;
        debug!(
            citations = self.rendered.len(),
            mode = ?self.mode,
            format = %self.format,
            "citation pass finished"
        );
        Ok(CitedDocument {
            document: Document::new(children),
            format: self.format,
            mode: self.mode,
            citations: self.rendered,
        })
    }

    fn rewrite_children(
        &mut self,
        scan_text: bool,
        children: Vec<Node>,
    ) -> Result<Vec<Node>, EngineError> {
        let mut rewritten = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Node::Element(mut element) if !is_generated(&element) => {
                    let permitted = PERMITTED_TAGS.iter().any(|tag| element.is(tag));
                    let grandchildren = std::mem::take(&mut element.children);
                    element.children = self.rewrite_children(permitted, grandchildren)?;
                    rewritten.push(Node::Element(element));
                }
                Node::Text { value } if scan_text => {
                    rewritten.extend(self.rewrite_text(value)?);
                }
                other => rewritten.push(other),
            }
        }
        Ok(rewritten)
    }

    fn rewrite_text(&mut self, text: String) -> Result<Vec<Node>, EngineError> {
        let mut segments: Vec<Either<&str, Node>> = Vec::new();
        let mut literal_start = 0;

        for marker in find_markers(&text) {
            let Some(node) = self.resolve(&text, &marker)? else {
                continue;
            };
            if marker.span.start > literal_start {
                segments.push(Left(&text[literal_start..marker.span.start]));
            }
            segments.push(Right(node));
            literal_start = marker.span.end;
        }

        if segments.is_empty() {
            return Ok(vec![Node::Text { value: text }]);
        }
        if literal_start < text.len() {
            segments.push(Left(&text[literal_start..]));
        }

        Ok(segments
            .into_iter()
            .map(|segment| segment.either(Node::text, |node| node))
            .collect())
    }

    /// Renders one marker, or returns `None` when it is left as written.
    fn resolve(
        &mut self,
        text: &str,
        marker: &MarkerMatch<'_>,
    ) -> Result<Option<Node>, EngineError> {
        let written = marker.as_str(text);
        let parsed = match decode(marker) {
            Ok(parsed) => parsed,
            Err(error) => {
                self.abandon(written, &error.to_string());
                return Ok(None);
            }
        };
        if let Some(item) = parsed
            .items
            .iter()
            .find(|item| !self.known_ids.contains(item.id.as_str()))
        {
            self.abandon(written, &format!("no bibliography entry for '{}'", item.id));
            return Ok(None);
        }

        let cluster = CitationCluster {
            sequence_id: self.citation_pre.len() + 1,
            items: parsed.items,
            is_composite: parsed.is_composite,
            mode: self.mode,
        };
        let content = self.engine.render_cluster(&cluster, &self.citation_pre)?;
        let plain_text = content.text();
        debug!(
            sequence_id = cluster.sequence_id,
            marker = written,
            text = %plain_text,
            "rendered citation"
        );
        self.citation_pre.push(cluster.sequence_id);

        let node = self.citation_node(&cluster, &content)?;
        self.rendered.push(RenderedCitation {
            sequence_id: cluster.sequence_id,
            ids: cluster.ids().map(str::to_string).collect(),
            plain_text,
            content,
            mode: cluster.mode,
        });
        Ok(Some(node))
    }

    fn abandon(&self, marker: &str, reason: &str) {
        if self.options.unknown_key_policy == UnknownKeyPolicy::Warn {
            warn!(marker, reason, "citation marker left as written");
        }
    }

    fn citation_node(
        &mut self,
        cluster: &CitationCluster,
        content: &StyledText,
    ) -> Result<Node, EngineError> {
        let ids = cluster.ids().collect_vec();
        let mut span = Element::new("span").with_attr("id", citation_node_id(&ids, cluster.sequence_id));
        if let Some(class) = self.options.inline_class_attr() {
            span.set_attr("class", class);
        }

        let tooltips = if self.options.show_tooltips {
            Some(self.tooltip_texts(&ids)?)
        } else {
            None
        };
        let attribute = self.options.tooltip_attribute.as_str();

        let linked = cluster.mode == CitationMode::InText
            && self.options.link_citations
            && matches!(self.format, CitationFormat::Numeric | CitationFormat::AuthorDate);

        if linked {
            let text = content.text();
            let spans = link_spans(&text, cluster, self.format, &*self.engine);
            span.children = linked_nodes(&text, &spans, |id| {
                tooltips
                    .as_ref()
                    .and_then(|texts| texts.get(id))
                    .map(|tooltip| (attribute.to_string(), tooltip.clone()))
            });
            return Ok(span.into());
        }

        if let Some(texts) = &tooltips {
            let joined = ids.iter().filter_map(|id| texts.get(*id)).join("; ");
            span.set_attr(attribute, joined);
        }

        Ok(match cluster.mode {
            CitationMode::InText => span.with_children(content.nodes().iter().cloned()),
            CitationMode::Note => span.with_child(footnote_reference(cluster.sequence_id)),
        }
        .into())
    }

    /// Bibliography text for each id, looked up once per document.
    fn tooltip_texts(&mut self, ids: &[&str]) -> Result<HashMap<String, String>, EngineError> {
        let mut texts = HashMap::with_capacity(ids.len());
        for id in ids {
            let text = match self.tooltips.get(*id) {
                Some(text) => text.clone(),
                None => {
                    let text = self.engine.entry_text(id)?;
                    self.tooltips.insert(id.to_string(), text.clone());
                    text
                }
            };
            texts.insert(id.to_string(), text);
        }
        Ok(texts)
    }
}

/// `sup > a` pointing at the citation's footnote, before renumbering.
fn footnote_reference(sequence_id: usize) -> Element {
    Element::new("sup").with_child(
        Element::new("a")
            .with_attr("href", format!("#cite-fn-{sequence_id}"))
            .with_attr("id", format!("cite-fnref-{sequence_id}"))
            .with_flag("data-footnote-ref")
            .with_attr("aria-describedby", "footnote-label")
            .with_child(Node::text(sequence_id.to_string())),
    )
}

/// Nodes produced by an earlier run, which must not be scanned again.
fn is_generated(element: &Element) -> bool {
    if element.is("section") && element.has_attr("data-footnotes") {
        return true;
    }
    element.id().is_some_and(|id| {
        id == "refs" || id.starts_with("citation--") || id.starts_with("inlineBib--")
    })
}
