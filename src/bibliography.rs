//! Writing the bibliography into a document.
//!
//! The rendered bibliography is a `div#refs.references.csl-bib-body` holding one
//! `div.csl-entry#bib-{id}` per entry. It replaces the first `p` or `div` whose
//! only text is `[^ref]`, or is appended to the document. When inline
//! bibliographies are enabled, every citation's parent also receives a block
//! with copies of the entries that citation names.

use crate::cite::RenderedCitation;
use crate::config::CitationOptions;
use crate::engine::{BibliographyEntry, CitationEngine};
use crate::error::EngineError;
use crate::tree::{Document, Element, Node};
use std::collections::HashMap;
use tracing::debug;

/// Text of the element the bibliography replaces, compared case-insensitively.
pub const PLACEHOLDER: &str = "[^ref]";

/// Builds `div#refs` from rendered entries, in the order given.
pub fn bibliography_node(entries: &[BibliographyEntry]) -> Element {
    Element::new("div")
        .with_attr("id", "refs")
        .with_attr("class", "references csl-bib-body")
        .with_children(entries.iter().map(|entry| entry_node(entry).into()))
}

fn entry_node(entry: &BibliographyEntry) -> Element {
    Element::new("div")
        .with_attr("class", "csl-entry")
        .with_attr("id", format!("bib-{}", entry.id.to_lowercase()))
        .with_children(entry.content.nodes().iter().cloned())
}

/// Puts `bibliography` in place of the placeholder, or at the end.
pub fn insert_bibliography(mut document: Document, bibliography: Element) -> Document {
    let mut pending = Some(bibliography);
    document.children = replace_placeholder(document.children, &mut pending);
    if let Some(bibliography) = pending {
        document.children.push(bibliography.into());
    }
    document
}

fn replace_placeholder(children: Vec<Node>, pending: &mut Option<Element>) -> Vec<Node> {
    children
        .into_iter()
        .map(|child| match child {
            Node::Element(element) if pending.is_some() && is_placeholder(&element) => {
                pending.take().map_or(Node::Element(element), Node::from)
            }
            Node::Element(mut element) if pending.is_some() => {
                element.children = replace_placeholder(std::mem::take(&mut element.children), pending);
                Node::Element(element)
            }
            other => other,
        })
        .collect()
}

fn is_placeholder(element: &Element) -> bool {
    (element.is("p") || element.is("div"))
        && element.text_content().trim().eq_ignore_ascii_case(PLACEHOLDER)
}

/// Appends an inline bibliography after every citation in `citations`.
///
/// `entries` maps lowercased keys to their `div.csl-entry` nodes.
pub fn add_inline_bibliographies(
    mut document: Document,
    citations: &[RenderedCitation],
    entries: &HashMap<String, Element>,
    class: &str,
) -> Document {
    let by_node: HashMap<String, &RenderedCitation> = citations
        .iter()
        .map(|citation| (citation.node_id(), citation))
        .collect();
    let inline = InlineBibliography {
        by_node,
        entries,
        class,
    };
    document.children = inline.rewrite(document.children);
    document
}

struct InlineBibliography<'a> {
    by_node: HashMap<String, &'a RenderedCitation>,
    entries: &'a HashMap<String, Element>,
    class: &'a str,
}

impl InlineBibliography<'_> {
    fn rewrite(&self, children: Vec<Node>) -> Vec<Node> {
        let mut blocks = Vec::new();
        let mut rewritten: Vec<Node> = children
            .into_iter()
            .map(|child| match child {
                Node::Element(mut element) => {
                    if let Some(citation) = element.id().and_then(|id| self.by_node.get(id)) {
                        blocks.push(self.block(citation));
                    }
                    element.children = self.rewrite(std::mem::take(&mut element.children));
                    Node::Element(element)
                }
                text => text,
            })
            .collect();
        rewritten.extend(blocks.into_iter().map(Node::from));
        rewritten
    }

    /// `div.{class}#inlineBib--{ids}--{n}` with an entry copy per id.
    fn block(&self, citation: &RenderedCitation) -> Element {
        let keys: Vec<String> = citation.ids.iter().map(|id| id.to_lowercase()).collect();
        let n = citation.sequence_id;
        let copies = keys.iter().filter_map(|key| {
            let entry = self.entries.get(key)?;
            Some(Node::from(
                Element::new("div")
                    .with_attr("class", "inline-entry")
                    .with_attr("id", format!("inline--{key}--{n}"))
                    .with_children(entry.children.iter().cloned()),
            ))
        });
        Element::new("div")
            .with_attr("class", self.class)
            .with_attr("id", format!("inlineBib--{}--{n}", keys.join("--")))
            .with_children(copies.collect::<Vec<_>>())
    }
}

/// Renders the bibliography and writes it and any inline bibliographies into
/// `document`. Does nothing when nothing was cited or registered.
pub fn apply_bibliography(
    document: Document,
    engine: &mut dyn CitationEngine,
    options: &CitationOptions,
    citations: &[RenderedCitation],
) -> Result<Document, EngineError> {
    let inline_class = options.inline_bib_class_attr();
    if !engine.has_registered_items() || (options.suppress_bibliography && inline_class.is_none()) {
        return Ok(document);
    }

    let entries = engine.render_bibliography()?;
    debug!(entries = entries.len(), "rendered bibliography");
    let node = bibliography_node(&entries);

    let mut document = document;
    if let Some(class) = inline_class {
        let by_key: HashMap<String, Element> = node
            .child_elements()
            .zip(&entries)
            .map(|(element, entry)| (entry.id.to_lowercase(), element.clone()))
            .collect();
        document = add_inline_bibliographies(document, citations, &by_key, &class);
    }

    if options.suppress_bibliography {
        return Ok(document);
    }
    Ok(insert_bibliography(document, node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cite::CitationPass;
    use crate::engine::testing::StubEngine;
    use crate::styled::StyledText;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn entry(id: &str, text: &str) -> BibliographyEntry {
        BibliographyEntry {
            id: id.to_string(),
            content: StyledText::plain(text),
        }
    }

    fn cite(engine: &mut StubEngine, options: &CitationOptions, document: Document) -> (Document, Vec<RenderedCitation>) {
        let known = StubEngine::known_ids();
        let cited = CitationPass::new(engine, options, &known).run(document).unwrap();
        (cited.document, cited.citations)
    }

    #[test]
    fn test_bibliography_node() {
        let node = bibliography_node(&[entry("Nash1950", "Nash, J. (1950).")]);
        assert_eq!(
            Document::new(vec![node.into()]).to_html(),
            "<div class=\"references csl-bib-body\" id=\"refs\">\
             <div class=\"csl-entry\" id=\"bib-nash1950\">Nash, J. (1950).</div></div>"
        );
    }

    #[test]
    fn test_entry_keeps_formatting() {
        let content = StyledText::new(vec![
            Node::text("Nash, J. (1951). "),
            Element::new("i").with_child(Node::text("Annals of Mathematics")).into(),
            Node::text(", 54."),
        ]);
        let node = bibliography_node(&[BibliographyEntry {
            id: "Nash1951".to_string(),
            content,
        }]);
        assert_eq!(
            Document::new(node.children).to_html(),
            "<div class=\"csl-entry\" id=\"bib-nash1951\">Nash, J. (1951). \
             <i>Annals of Mathematics</i>, 54.</div>"
        );
    }

    #[rstest]
    #[case("p", "[^ref]")]
    #[case("div", "[^REF]")]
    #[case("p", " [^ref]\n")]
    fn test_placeholder_is_replaced(#[case] tag: &str, #[case] text: &str) {
        let document = Document::new(vec![
            Element::new("p").with_child(Node::text("Body")).into(),
            Element::new(tag).with_child(Node::text(text)).into(),
            Element::new("p").with_child(Node::text("Appendix")).into(),
        ]);
        let result = insert_bibliography(document, bibliography_node(&[]));
        assert_eq!(result.children.len(), 3);
        assert_eq!(result.children[1].as_element().and_then(Element::id), Some("refs"));
    }

    #[test]
    fn test_appended_without_placeholder() {
        let document = Document::new(vec![
            Element::new("span").with_child(Node::text("[^ref]")).into(),
        ]);
        let result = insert_bibliography(document, bibliography_node(&[]));
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.children[1].as_element().and_then(Element::id), Some("refs"));
    }

    #[test]
    fn test_apply_appends_sorted_bibliography() {
        let mut engine = StubEngine::author_date();
        let options = CitationOptions::new();
        let document = Document::new(vec![
            Element::new("div").with_child(Node::text("[@Nash1950; @Doe2001]")).into(),
        ]);
        let (document, citations) = cite(&mut engine, &options, document);
        let result = apply_bibliography(document, &mut engine, &options, &citations).unwrap();

        let ids: Vec<&str> = result
            .find_all(|el| el.has_class("csl-entry"))
            .into_iter()
            .filter_map(Element::id)
            .collect();
        assert_eq!(ids, ["bib-doe2001", "bib-nash1950"]);
        assert_eq!(
            result.find(|el| el.id() == Some("bib-nash1950")).unwrap().text_content(),
            "Nash, J. (1950). Equilibrium points in n-person games."
        );
    }

    #[test]
    fn test_nothing_registered() {
        let mut engine = StubEngine::author_date();
        let document = Document::new(vec![Element::new("p").with_child(Node::text("[^ref]")).into()]);
        let result = apply_bibliography(document.clone(), &mut engine, &CitationOptions::new(), &[]).unwrap();
        assert_eq!(result, document);
    }

    #[test]
    fn test_no_cite_only() {
        let mut engine = StubEngine::numeric();
        engine.update_registered_ids(&["Smith2004".to_string()]);
        let result =
            apply_bibliography(Document::default(), &mut engine, &CitationOptions::new(), &[]).unwrap();
        assert_eq!(
            result.find_all(|el| el.has_class("csl-entry")).len(),
            1
        );
    }

    #[test]
    fn test_suppressed_bibliography() {
        let mut engine = StubEngine::author_date();
        let mut options = CitationOptions::new();
        options.set_suppress_bibliography(true);
        let document = Document::new(vec![
            Element::new("p").with_child(Node::text("[^ref]")).into(),
            Element::new("p").with_child(Node::text("[@Nash1950]")).into(),
        ]);
        let (document, citations) = cite(&mut engine, &options, document);
        let result = apply_bibliography(document.clone(), &mut engine, &options, &citations).unwrap();
        assert_eq!(result, document);
    }

    #[test]
    fn test_inline_bibliography() {
        let mut engine = StubEngine::author_date();
        let mut options = CitationOptions::new();
        options
            .set_suppress_bibliography(true)
            .set_inline_bib_class(vec!["inline-bib".to_string()]);
        let document = Document::new(vec![
            Element::new("p")
                .with_child(Node::text("[@Nash1950; @Nash1951] and more"))
                .into(),
        ]);
        let (document, citations) = cite(&mut engine, &options, document);
        let result = apply_bibliography(document, &mut engine, &options, &citations).unwrap();

        assert!(result.find(|el| el.id() == Some("refs")).is_none());
        let paragraph = result.children[0].as_element().unwrap();
        let block = paragraph.children.last().and_then(Node::as_element).unwrap();
        assert_eq!(block.id(), Some("inlineBib--nash1950--nash1951--1"));
        assert!(block.has_class("inline-bib"));

        let copies: Vec<(&str, String)> = block
            .child_elements()
            .map(|el| (el.id().unwrap_or_default(), el.text_content()))
            .collect();
        assert_eq!(
            copies,
            [
                (
                    "inline--nash1950--1",
                    "Nash, J. (1950). Equilibrium points in n-person games.".to_string()
                ),
                (
                    "inline--nash1951--1",
                    "Nash, J. (1951). Non-cooperative games.".to_string()
                ),
            ]
        );
        assert!(block.child_elements().all(|el| el.has_class("inline-entry")));
    }
}
