//! Loading resources and running the passes over a document.
//!
//! A [`CitationProcessor`] loads the bibliography, style and locale once and
//! can then process any number of documents. Each document is rendered by a
//! fresh engine, so citation numbering and disambiguation never leak from one
//! document into another.
//!
//! The passes run in order: citations, footnote merging (note styles only),
//! bibliography.

use crate::bibliography::apply_bibliography;
use crate::cite::{CitationPass, CitedDocument};
use crate::config::CitationOptions;
use crate::engine::{CitationEngine, HayagrivaEngine};
use crate::error::CitationError;
use crate::footnote::reconcile_footnotes;
use crate::source::{Bibliography, load_bibliography, load_locale, load_style};
use crate::tree::Document;
use crate::{CitationMode, Result};
use hayagriva::citationberg::{IndependentStyle, Locale, LocaleCode};
use std::collections::HashSet;
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Loaded resources for processing documents with one set of options.
#[derive(Debug)]
pub struct CitationProcessor {
    options: CitationOptions,
    bibliography: Bibliography,
    style: IndependentStyle,
    locales: Vec<Locale>,
    locale: LocaleCode,
    known_ids: HashSet<String>,
}

impl CitationProcessor {
    /// Validates `options` and loads every resource they name.
    pub fn new(options: CitationOptions) -> Result<Self> {
        options.validate().map_err(CitationError::Config)?;
        let bibliography = load_bibliography(options.bibliography(), options.path())?;
        Self::with_bibliography(options, bibliography)
    }

    /// Like [`new`](Self::new), with an already loaded bibliography. The
    /// `bibliography` option is ignored.
    pub fn with_bibliography(options: CitationOptions, bibliography: Bibliography) -> Result<Self> {
        options.validate().map_err(CitationError::Config)?;
        let style = load_style(options.csl(), options.path())?;
        let (locale, custom) = load_locale(options.lang(), options.path())?;

        let mut locales = hayagriva::archive::locales();
        locales.extend(custom);

        let known_ids = bibliography.iter().map(|entry| entry.key().to_string()).collect();
        debug!(
            entries = bibliography.len(),
            style = options.csl(),
            locale = %locale.0,
            "citation processor ready"
        );

        Ok(Self {
            options,
            bibliography,
            style,
            locales,
            locale,
            known_ids,
        })
    }

    pub fn options(&self) -> &CitationOptions {
        &self.options
    }

    pub fn bibliography(&self) -> &Bibliography {
        &self.bibliography
    }

    /// A new engine for one document.
    pub fn engine(&self) -> HayagrivaEngine<'_> {
        HayagrivaEngine::new(
            &self.bibliography,
            &self.style,
            &self.locales,
            self.locale.clone(),
        )
    }

    /// Processes one document with a new engine.
    pub fn process(&self, document: Document) -> Result<Document> {
        let mut engine = self.engine();
        self.process_with_engine(document, &mut engine)
    }

    /// Processes one document with the given engine. The engine should not
    /// have seen another document.
    pub fn process_with_engine(
        &self,
        document: Document,
        engine: &mut dyn CitationEngine,
    ) -> Result<Document> {
        run_passes(document, engine, &self.options, &self.known_ids)
    }

    /// Processes independent documents on the rayon pool. Results are in
    /// input order.
    #[cfg(feature = "parallel")]
    pub fn process_batch(&self, documents: Vec<Document>) -> Vec<Result<Document>> {
        documents
            .into_par_iter()
            .map(|document| self.process(document))
            .collect()
    }
}

/// Processes `document` with `options`, loading resources first.
///
/// A document is returned unchanged when no bibliography is configured.
pub fn process(document: Document, options: &CitationOptions) -> Result<Document> {
    if options.bibliography().is_empty() {
        debug!("no bibliography configured, document left unchanged");
        return Ok(document);
    }
    CitationProcessor::new(options.clone())?.process(document)
}

pub(crate) fn run_passes(
    document: Document,
    engine: &mut dyn CitationEngine,
    options: &CitationOptions,
    known_ids: &HashSet<String>,
) -> Result<Document> {
    let cited = CitationPass::new(engine, options, known_ids).run(document)?;

    let no_cite = options.no_cite_ids();
    if !no_cite.is_empty() {
        engine.update_registered_ids(&no_cite);
    }

    let note_bodies = cited.note_bodies();
    let CitedDocument {
        mut document,
        mode,
        citations,
        ..
    } = cited;
    if mode == CitationMode::Note && !citations.is_empty() {
        document = reconcile_footnotes(document, &note_bodies);
    }

    Ok(apply_bibliography(document, engine, options, &citations)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{NASH_BIB, StubEngine};
    use crate::error::{EngineError, ResourceKind};
    use crate::source::{BibliographyFormat, parse_bibliography};
    use crate::tree::{Element, Node};
    use crate::UnknownKeyPolicy;
    use pretty_assertions::assert_eq;

    fn div(text: &str) -> Node {
        Element::new("div").with_child(Node::text(text)).into()
    }

    fn stub_run(engine: &mut StubEngine, options: &CitationOptions, children: Vec<Node>) -> Document {
        run_passes(
            Document::new(children),
            engine,
            options,
            &StubEngine::known_ids(),
        )
        .unwrap()
    }

    fn nash() -> Bibliography {
        parse_bibliography(NASH_BIB, BibliographyFormat::BibLaTeX).unwrap()
    }

    #[test]
    fn test_author_date_document() {
        let mut options = CitationOptions::new();
        options.set_suppress_bibliography(true);
        let document = stub_run(
            &mut StubEngine::author_date(),
            &options,
            vec![div("First citation @Nash1950 and second citation [@Nash1951]")],
        );
        assert_eq!(
            document.text_content(),
            "First citation Nash (1950) and second citation (Nash, 1951)"
        );
    }

    #[test]
    fn test_bibliography_at_placeholder() {
        let document = stub_run(
            &mut StubEngine::author_date(),
            &CitationOptions::new(),
            vec![div("[^ref]"), div("[@Nash1950]")],
        );
        assert_eq!(
            document.to_html(),
            "<div class=\"references csl-bib-body\" id=\"refs\">\
             <div class=\"csl-entry\" id=\"bib-nash1950\">\
             Nash, J. (1950). <i>Equilibrium points in n-person games</i>.</div></div>\
             <div><span id=\"citation--nash1950--1\">(Nash, 1950)</span></div>"
        );
    }

    #[test]
    fn test_no_cite_everything() {
        let mut options = CitationOptions::new();
        options.set_no_cite(vec!["@*".to_string()]);
        let document = stub_run(&mut StubEngine::author_date(), &options, vec![div("[@Nash1950]")]);
        assert_eq!(document.find_all(|el| el.has_class("csl-entry")).len(), 4);
    }

    #[test]
    fn test_no_cite_single_entry() {
        let mut options = CitationOptions::new();
        options.set_no_cite(vec!["@Smith2004".to_string()]);
        let document = stub_run(&mut StubEngine::author_date(), &options, vec![div("[@Nash1950]")]);
        let ids: Vec<&str> = document
            .find_all(|el| el.has_class("csl-entry"))
            .into_iter()
            .filter_map(Element::id)
            .collect();
        assert_eq!(ids, ["bib-nash1950", "bib-smith2004"]);
    }

    #[test]
    fn test_note_document_merges_footnotes() {
        let existing_reference = Element::new("sup").with_child(
            Element::new("a")
                .with_attr("href", "#user-content-fn-1")
                .with_attr("id", "user-content-fnref-1")
                .with_flag("data-footnote-ref")
                .with_child(Node::text("1")),
        );
        let section = Element::new("section")
            .with_flag("data-footnotes")
            .with_child(
                Element::new("ol").with_child(
                    Element::new("li").with_attr("id", "user-content-fn-1").with_child(
                        Element::new("p")
                            .with_child(Node::text("First note "))
                            .with_child(
                                Element::new("a")
                                    .with_attr("href", "#user-content-fnref-1")
                                    .with_flag("data-footnote-backref")
                                    .with_child(Node::text("↩")),
                            ),
                    ),
                ),
            );
        let mut options = CitationOptions::new();
        options.set_suppress_bibliography(true);

        let document = stub_run(
            &mut StubEngine::note(),
            &options,
            vec![
                Element::new("p")
                    .with_child(Node::text("Note"))
                    .with_child(existing_reference)
                    .with_child(Node::text(" and citation[@Nash1950]."))
                    .into(),
                section.into(),
            ],
        );

        let markers: Vec<(&str, &str)> = document
            .find_all(|el| el.has_attr("data-footnote-ref"))
            .into_iter()
            .map(|el| (el.attr("href").unwrap_or_default(), el.id().unwrap_or_default()))
            .collect();
        assert_eq!(
            markers,
            [
                ("#user-content-fn-1", "user-content-fnref-1"),
                ("#user-content-fn-2", "user-content-fnref-2"),
            ]
        );

        let bodies: Vec<String> = document
            .find_all(|el| el.is("li"))
            .into_iter()
            .map(Element::text_content)
            .collect();
        assert_eq!(bodies, ["First note ↩", "Nash, 1950.↩"]);

        let backrefs: Vec<&str> = document
            .find_all(|el| el.has_attr("data-footnote-backref"))
            .into_iter()
            .filter_map(|el| el.attr("href"))
            .collect();
        assert_eq!(backrefs, ["#user-content-fnref-1", "#user-content-fnref-2"]);
    }

    #[test]
    fn test_note_document_without_citations_keeps_footnotes() {
        let section = Element::new("section").with_flag("data-footnotes");
        let document = stub_run(
            &mut StubEngine::note(),
            &CitationOptions::new(),
            vec![div("No citations."), section.clone().into()],
        );
        assert_eq!(document.children.last(), Some(&Node::from(section)));
    }

    #[test]
    fn test_engine_error_aborts_document() {
        let mut engine = StubEngine::numeric();
        engine.fail_on = Some(1);
        let result = run_passes(
            Document::new(vec![div("[@Nash1950]")]),
            &mut engine,
            &CitationOptions::new(),
            &StubEngine::known_ids(),
        );
        assert!(matches!(
            result,
            Err(CitationError::Engine(EngineError::Cluster { sequence_id: 1, .. }))
        ));
    }

    #[test]
    fn test_process_without_bibliography_is_noop() {
        let document = Document::new(vec![div("[@Nash1950]")]);
        let result = process(document.clone(), &CitationOptions::new()).unwrap();
        assert_eq!(result, document);
    }

    #[test]
    fn test_missing_bibliography_file() {
        let mut options = CitationOptions::new();
        options.add_bibliography("does/not/exist.bib");
        let result = CitationProcessor::new(options);
        assert!(matches!(
            result,
            Err(CitationError::Resource {
                kind: ResourceKind::Bibliography,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_options() {
        let mut options = CitationOptions::new();
        options.set_tooltip_attribute("onclick");
        assert!(matches!(
            CitationProcessor::with_bibliography(options, nash()),
            Err(CitationError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_style() {
        let mut options = CitationOptions::new();
        options.set_csl("no-such-style.csl");
        assert!(matches!(
            CitationProcessor::with_bibliography(options, nash()),
            Err(CitationError::Resource {
                kind: ResourceKind::Style,
                ..
            })
        ));
    }

    #[test]
    fn test_hayagriva_author_date() {
        let mut options = CitationOptions::new();
        options.set_unknown_key_policy(UnknownKeyPolicy::Warn);
        let processor = CitationProcessor::with_bibliography(options, nash()).unwrap();
        let document = processor
            .process(Document::new(vec![div("[@Nash1950]"), div("@apply")]))
            .unwrap();

        let span = document.find(|el| el.is("span")).unwrap();
        assert_eq!(span.id(), Some("citation--nash1950--1"));
        assert!(span.text_content().contains("Nash"));
        assert!(span.text_content().contains("1950"));
        assert_eq!(document.children[1], div("@apply"));

        let refs = document.children.last().and_then(Node::as_element).unwrap();
        assert_eq!(refs.id(), Some("refs"));
        assert!(refs.text_content().contains("Equilibrium points"));
    }

    #[test]
    fn test_hayagriva_numeric_order() {
        let mut options = CitationOptions::new();
        options.set_csl("vancouver").set_suppress_bibliography(true);
        let processor = CitationProcessor::with_bibliography(options, nash()).unwrap();
        let document = processor
            .process(Document::new(vec![div("[@Nash1951] text [@Nash1950]")]))
            .unwrap();

        let spans = document.find_all(|el| el.is("span"));
        assert_eq!(spans.len(), 2);
        assert!(spans[0].text_content().contains('1'));
        assert!(spans[1].text_content().contains('2'));
        assert!(document.find(|el| el.id() == Some("refs")).is_none());
    }

    #[test]
    fn test_documents_do_not_share_numbering() {
        let mut options = CitationOptions::new();
        options.set_csl("vancouver").set_suppress_bibliography(true);
        let processor = CitationProcessor::with_bibliography(options, nash()).unwrap();
        let first = processor
            .process(Document::new(vec![div("[@Nash1951]")]))
            .unwrap();
        let second = processor
            .process(Document::new(vec![div("[@Nash1950]")]))
            .unwrap();
        assert_eq!(first.text_content(), second.text_content());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_process_batch() {
        let processor = CitationProcessor::with_bibliography(CitationOptions::new(), nash()).unwrap();
        let documents = vec![
            Document::new(vec![div("[@Nash1950]")]),
            Document::new(vec![div("[@Nash1951]")]),
        ];
        let results = processor.process_batch(documents);
        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert!(first.find(|el| el.id() == Some("bib-nash1950")).is_some());
        assert!(first.find(|el| el.id() == Some("bib-nash1951")).is_none());
    }
}
