//! [`CitationEngine`] backed by hayagriva's CSL processor.
//!
//! hayagriva renders a whole document at once, so the engine keeps every
//! cluster it has seen and re-drives the processor with the requested history
//! each time. The bibliography order of that run and the registry token of
//! each entry are cached until the registry changes.
//!
//! Cite-item prefixes and suffixes are not part of hayagriva's citation model.
//! They are placed after rendering, around the text of the item they belong to.

use super::{BibliographyEntry, CitationEngine, RegistryItem};
use crate::error::EngineError;
use crate::link::{LinkSpan, link_spans};
use crate::source::Bibliography;
use crate::styled::StyledText;
use crate::tree::{Element, Node};
use crate::{CitationCluster, CitationFormat, CitationMode, CiteItem, Label};
use hayagriva::citationberg::taxonomy::Locator;
use hayagriva::citationberg::{self, IndependentStyle, Locale, LocaleCode, StyleClass};
use hayagriva::{
    BibliographyDriver, BibliographyItem, BibliographyRequest, CitationItem, CitationRequest,
    CitePurpose, ElemChild, ElemChildren, Entry, Formatting, LocatorPayload, Rendered,
    SpecificLocator,
};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Renders citations of one document with a CSL style.
pub struct HayagrivaEngine<'a> {
    bibliography: &'a Bibliography,
    style: &'a IndependentStyle,
    locales: &'a [Locale],
    locale: LocaleCode,
    format: CitationFormat,
    clusters: Vec<CitationCluster>,
    uncited: Vec<String>,
    all_registered: bool,
    order: RefCell<Option<Vec<String>>>,
    tokens: RefCell<HashMap<String, String>>,
}

impl<'a> HayagrivaEngine<'a> {
    #[must_use]
    pub fn new(
        bibliography: &'a Bibliography,
        style: &'a IndependentStyle,
        locales: &'a [Locale],
        locale: LocaleCode,
    ) -> Self {
        Self {
            bibliography,
            style,
            locales,
            locale,
            format: declared_format(style),
            clusters: Vec::new(),
            uncited: Vec::new(),
            all_registered: false,
            order: RefCell::new(None),
            tokens: RefCell::new(HashMap::new()),
        }
    }

    fn lookup(&self, id: &str) -> Result<&'a Entry, EngineError> {
        self.bibliography
            .get(id)
            .ok_or_else(|| EngineError::UnknownEntry(id.to_string()))
    }

    fn item<'e>(entry: &'e Entry, cite: &'e CiteItem, composite: bool) -> CitationItem<'e, Entry> {
        let locator = cite
            .locator
            .as_deref()
            .map(|locator| SpecificLocator(locator_kind(cite.label), LocatorPayload::Str(locator)));
        let purpose = if composite {
            Some(CitePurpose::Prose)
        } else if cite.suppress_author {
            Some(CitePurpose::Year)
        } else {
            None
        };
        CitationItem::new(entry, locator, None, false, purpose)
    }

    /// Runs the processor over `clusters` plus hidden citations of `hidden`.
    fn drive(
        &self,
        clusters: &[&CitationCluster],
        hidden: &[&'a Entry],
    ) -> Result<Rendered, EngineError> {
        let mut driver = BibliographyDriver::new();
        for cluster in clusters {
            let items = cluster
                .items
                .iter()
                .map(|cite| Ok(Self::item(self.lookup(&cite.id)?, cite, cluster.is_composite)))
                .collect::<Result<Vec<_>, EngineError>>()?;
            let note_number = (cluster.mode == CitationMode::Note).then_some(cluster.sequence_id);
            driver.citation(CitationRequest::new(
                items,
                self.style,
                Some(self.locale.clone()),
                self.locales,
                note_number,
            ));
        }
        for entry in hidden {
            driver.citation(CitationRequest::new(
                vec![CitationItem::new(*entry, None, None, true, None)],
                self.style,
                Some(self.locale.clone()),
                self.locales,
                None,
            ));
        }
        Ok(driver.finish(BibliographyRequest {
            style: self.style,
            locale: Some(self.locale.clone()),
            locale_files: self.locales,
        }))
    }

    fn uncited_entries(&self) -> Vec<&'a Entry> {
        if self.all_registered {
            return self.bibliography.iter().collect();
        }
        self.uncited
            .iter()
            .filter_map(|id| {
                let entry = self.bibliography.get(id);
                if entry.is_none() {
                    warn!(id = %id, "uncited entry is not in the bibliography");
                }
                entry
            })
            .collect()
    }

    fn bibliography_order(&self) -> Result<Vec<String>, EngineError> {
        if let Some(order) = self.order.borrow().as_ref() {
            return Ok(order.clone());
        }
        let clusters: Vec<&CitationCluster> = self.clusters.iter().collect();
        let order = keys(&self.drive(&clusters, &self.uncited_entries())?);
        *self.order.borrow_mut() = Some(order.clone());
        Ok(order)
    }

    /// The text a lone citation of `id` renders to, without brackets.
    fn token(&self, id: &str) -> String {
        if let Some(token) = self.tokens.borrow().get(id) {
            return token.clone();
        }
        let lone = CitationCluster {
            sequence_id: 0,
            items: vec![CiteItem::new(id)],
            is_composite: false,
            mode: CitationMode::InText,
        };
        let token = self
            .drive(&[&lone], &[])
            .ok()
            .and_then(|rendered| rendered.citations.into_iter().next())
            .map(|citation| unwrap_brackets(&styled(&citation.citation).text()).to_string())
            .unwrap_or_default();
        self.tokens.borrow_mut().insert(id.to_string(), token.clone());
        token
    }

    fn registry_item(&self, id: &str) -> Option<RegistryItem> {
        let entry = self.bibliography.get(id)?;
        let author_families = entry
            .authors()
            .map(|authors| authors.iter().map(|person| person.name.clone()).collect())
            .unwrap_or_default();
        let year = entry.date().map(|date| date.year.to_string());
        Some(RegistryItem {
            id: id.to_string(),
            token: self.token(id),
            author_families,
            year,
        })
    }

    fn with_affixes(&self, cluster: &CitationCluster, mut text: StyledText) -> StyledText {
        if !cluster.is_composite
            && self.format == CitationFormat::AuthorDate
            && cluster.items.iter().all(|item| item.suppress_author)
            && !text.text().starts_with(['(', '['])
        {
            text.wrap("(", ")");
        }

        if cluster
            .items
            .iter()
            .all(|item| item.prefix.is_none() && item.suffix.is_none())
        {
            return text;
        }

        let plain = text.text();
        let (open, _, close) = split_brackets(&plain);
        let body = open.len()..plain.len() - close.len();
        let spans = if cluster.items.len() > 1 {
            link_spans(&plain, cluster, self.format, self)
        } else {
            Vec::new()
        };
        let last = cluster.items.len() - 1;

        let mut affixes: Vec<(usize, String)> = Vec::new();
        for (index, item) in cluster.items.iter().enumerate() {
            let located = spans.iter().position(|span| span.id == item.id);
            if let Some(prefix) = item.prefix.as_deref() {
                let offset = match located {
                    Some(at) => Some(spans[at].range.start),
                    None if index == 0 && cluster.is_composite => Some(0),
                    None if index == 0 => Some(body.start),
                    None => None,
                };
                match offset {
                    Some(offset) => affixes.push((offset, format!("{prefix} "))),
                    None => debug!(sequence_id = cluster.sequence_id, prefix, "prefix not placed"),
                }
            }
            if let Some(suffix) = item.suffix.as_deref() {
                let offset = match located {
                    Some(at) => Some(segment_end(&plain, &spans, at, body.end)),
                    None if index == last => Some(body.end),
                    None => None,
                };
                match offset {
                    Some(offset) => affixes.push((offset, format!(" {suffix}"))),
                    None => debug!(sequence_id = cluster.sequence_id, suffix, "suffix not placed"),
                }
            }
        }

        affixes.sort_by(|a, b| b.0.cmp(&a.0));
        for (offset, affix) in affixes {
            text.insert(offset, &affix);
        }
        text
    }
}

impl CitationEngine for HayagrivaEngine<'_> {
    fn citation_format(&self) -> CitationFormat {
        self.format
    }

    fn is_note_style(&self) -> bool {
        self.style.settings.class == StyleClass::Note
    }

    fn sorts_citations(&self) -> bool {
        self.style.citation.sort.is_some()
    }

    fn render_cluster(
        &mut self,
        cluster: &CitationCluster,
        citation_pre: &[usize],
    ) -> Result<StyledText, EngineError> {
        let mut history: Vec<&CitationCluster> = citation_pre
            .iter()
            .filter_map(|id| self.clusters.iter().find(|c| c.sequence_id == *id))
            .collect();
        history.push(cluster);

        let rendered = self.drive(&history, &[])?;
        let citation = rendered
            .citations
            .last()
            .ok_or_else(|| EngineError::Cluster {
                sequence_id: cluster.sequence_id,
                message: "the processor returned no citation".to_string(),
            })?;
        let text = styled(&citation.citation);
        *self.order.get_mut() = Some(keys(&rendered));

        let text = self.with_affixes(cluster, text);
        self.clusters.push(cluster.clone());
        Ok(text)
    }

    fn update_registered_ids(&mut self, ids: &[String]) {
        for id in ids {
            if id == "*" {
                self.all_registered = true;
            } else if !self.uncited.contains(id) {
                self.uncited.push(id.clone());
            }
        }
        *self.order.get_mut() = None;
    }

    fn has_registered_items(&self) -> bool {
        !self.clusters.is_empty()
            || !self.uncited.is_empty()
            || (self.all_registered && !self.bibliography.is_empty())
    }

    fn render_bibliography(&mut self) -> Result<Vec<BibliographyEntry>, EngineError> {
        let clusters: Vec<&CitationCluster> = self.clusters.iter().collect();
        let rendered = self.drive(&clusters, &self.uncited_entries())?;
        let Some(bibliography) = rendered.bibliography else {
            debug!("style has no bibliography layout");
            return Ok(Vec::new());
        };
        Ok(bibliography
            .items
            .iter()
            .map(|item| BibliographyEntry {
                id: item.key.to_string(),
                content: item_content(item),
            })
            .collect())
    }

    fn registry_items(&self, ids: &[&str]) -> Vec<RegistryItem> {
        let mut seen = HashSet::new();
        let mut items: Vec<RegistryItem> = ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| self.registry_item(id))
            .collect();

        if self.sorts_citations() {
            match self.bibliography_order() {
                Ok(order) => items.sort_by_key(|item| {
                    order.iter().position(|key| *key == item.id).unwrap_or(usize::MAX)
                }),
                Err(e) => warn!(error = %e, "could not determine bibliography order"),
            }
        }
        items
    }

    fn entry_text(&self, id: &str) -> Result<String, EngineError> {
        let entry = self.lookup(id)?;
        let rendered = self.drive(&[], &[entry])?;
        Ok(rendered
            .bibliography
            .and_then(|bib| bib.items.first().map(item_text))
            .unwrap_or_default())
    }
}

fn declared_format(style: &IndependentStyle) -> CitationFormat {
    let declared = style.info.category.iter().find_map(|category| match category {
        citationberg::StyleCategory::CitationFormat { format, .. } => Some(match format {
            citationberg::CitationFormat::AuthorDate => CitationFormat::AuthorDate,
            citationberg::CitationFormat::Author => CitationFormat::Author,
            citationberg::CitationFormat::Numeric => CitationFormat::Numeric,
            citationberg::CitationFormat::Label => CitationFormat::Label,
            citationberg::CitationFormat::Note => CitationFormat::Note,
        }),
        _ => None,
    });
    declared.unwrap_or(if style.settings.class == StyleClass::Note {
        CitationFormat::Note
    } else {
        CitationFormat::AuthorDate
    })
}

fn locator_kind(label: Label) -> Locator {
    match label {
        Label::Book => Locator::Book,
        Label::Chapter => Locator::Chapter,
        Label::Column => Locator::Column,
        Label::Figure => Locator::Figure,
        Label::Folio => Locator::Folio,
        Label::Issue => Locator::Issue,
        Label::Line => Locator::Line,
        Label::Note => Locator::Note,
        Label::Opus => Locator::Opus,
        Label::Page => Locator::Page,
        Label::Paragraph => Locator::Paragraph,
        Label::Part => Locator::Part,
        Label::Section => Locator::Section,
        Label::SubVerbo => Locator::SubVerbo,
        Label::Verse => Locator::Verse,
        Label::Volume => Locator::Volume,
    }
}

/// Bibliography keys in the order the processor listed them.
fn keys(rendered: &Rendered) -> Vec<String> {
    rendered
        .bibliography
        .as_ref()
        .map(|bib| bib.items.iter().map(|item| item.key.to_string()).collect())
        .unwrap_or_default()
}

/// Where the suffix of the item at `spans[index]` goes: after its locator,
/// before the delimiter that leads to the next item.
fn segment_end(text: &str, spans: &[LinkSpan], index: usize, body_end: usize) -> usize {
    let start = spans[index].range.end;
    let Some(next) = spans.get(index + 1) else {
        return body_end.max(start);
    };
    let gap = &text[start..next.range.start];
    start + gap.rfind(';').or_else(|| gap.rfind(',')).unwrap_or(gap.len())
}

fn styled(children: &ElemChildren) -> StyledText {
    StyledText::new(elem_nodes(children))
}

fn elem_nodes(children: &ElemChildren) -> Vec<Node> {
    children.0.iter().flat_map(elem_child_nodes).collect()
}

fn elem_child_nodes(child: &ElemChild) -> Vec<Node> {
    use citationberg::Display;

    match child {
        ElemChild::Text(formatted) => {
            formatted_node(&formatted.text, &formatted.formatting).into_iter().collect()
        }
        ElemChild::Elem(elem) => {
            let children = elem_nodes(&elem.children);
            let class = match elem.display {
                Some(Display::Block) => "csl-block",
                Some(Display::LeftMargin) => "csl-left-margin",
                Some(Display::RightInline) => "csl-right-inline",
                Some(Display::Indent) => "csl-indent",
                None => return children,
            };
            vec![
                Element::new("div")
                    .with_attr("class", class)
                    .with_children(children)
                    .into(),
            ]
        }
        ElemChild::Link { text, url } => vec![
            Element::new("a")
                .with_attr("href", url.as_str())
                .with_children(formatted_node(&text.text, &text.formatting))
                .into(),
        ],
        ElemChild::Markup(markup) => vec![Node::text(markup.as_str())],
        ElemChild::Transparent { .. } => Vec::new(),
    }
}

/// Wraps `text` in the elements its formatting asks for.
fn formatted_node(text: &str, formatting: &Formatting) -> Option<Node> {
    if text.is_empty() {
        return None;
    }
    let wrap = |node: Node, tag: &str| -> Node { Element::new(tag).with_child(node).into() };
    let styled = |node: Node, style: &str| -> Node {
        Element::new("span")
            .with_attr("style", style)
            .with_child(node)
            .into()
    };

    let mut node = Node::text(text);
    match formatting.font_style {
        citationberg::FontStyle::Normal => {}
        citationberg::FontStyle::Italic => node = wrap(node, "i"),
    }
    match formatting.font_variant {
        citationberg::FontVariant::Normal => {}
        citationberg::FontVariant::SmallCaps => node = styled(node, "font-variant:small-caps;"),
    }
    match formatting.font_weight {
        citationberg::FontWeight::Normal => {}
        citationberg::FontWeight::Bold => node = wrap(node, "b"),
        citationberg::FontWeight::Light => node = styled(node, "font-weight:lighter;"),
    }
    match formatting.text_decoration {
        citationberg::TextDecoration::None => {}
        citationberg::TextDecoration::Underline => {
            node = styled(node, "text-decoration:underline;")
        }
    }
    match formatting.vertical_align {
        citationberg::VerticalAlign::None | citationberg::VerticalAlign::Baseline => {}
        citationberg::VerticalAlign::Sup => node = wrap(node, "sup"),
        citationberg::VerticalAlign::Sub => node = wrap(node, "sub"),
    }
    Some(node)
}

/// Entry nodes; a first field such as a citation number is set in its own
/// margin block.
fn item_content(item: &BibliographyItem) -> StyledText {
    let content = elem_nodes(&item.content);
    match &item.first_field {
        Some(first) => StyledText::new(vec![
            Element::new("div")
                .with_attr("class", "csl-left-margin")
                .with_children(elem_child_nodes(first))
                .into(),
            Element::new("div")
                .with_attr("class", "csl-right-inline")
                .with_children(content)
                .into(),
        ]),
        None => StyledText::new(content),
    }
}

fn item_text(item: &BibliographyItem) -> String {
    let mut text = String::new();
    if let Some(first) = &item.first_field {
        text.extend(elem_child_nodes(first).iter().map(Node::text_content));
        text.push(' ');
    }
    text.push_str(&styled(&item.content).text());
    text.trim().to_string()
}

/// `("(", "Nash, 1950", ")")` for `"(Nash, 1950)"`; empty brackets when the
/// text is not wrapped.
fn split_brackets(text: &str) -> (&str, &str, &str) {
    for (open, close) in [("(", ")"), ("[", "]")] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            return (open, &text[1..text.len() - 1], close);
        }
    }
    if text.ends_with(')') || text.ends_with(']') {
        return ("", &text[..text.len() - 1], &text[text.len() - 1..]);
    }
    ("", text, "")
}

fn unwrap_brackets(text: &str) -> &str {
    match split_brackets(text) {
        ("", _, _) => text,
        (_, inner, _) => inner,
    }
}
