//! Resolve pandoc-style citation markers inside HTML document trees.
//!
//! `citetree` finds markers such as `[see @doe99, pp. 33-35; @smith04]` or a
//! bare `@doe99` in the text of a document tree, renders them through a CSL
//! engine, and writes the results back into the tree: in-text citations or
//! footnote references, one merged and renumbered footnote section, and a
//! bibliography.
//!
//! # Features
//!
//! - `regex` - Regular expressions through the `regex` crate (enabled by default)
//! - `lite` - Use `regex-lite` instead of `regex`
//! - `remote` - Load bibliographies, styles and locales over HTTP (enabled by default)
//! - `parallel` - Process independent documents on a rayon pool (enabled by default)
//! - `diagnostics` - Render marker errors with source context through `ariadne`
//!
//! # Basic Usage
//!
//! ```rust
//! use citetree::{CitationOptions, CitationProcessor, Document, Element, Node};
//! use citetree::source::{parse_bibliography, BibliographyFormat};
//!
//! let bib = parse_bibliography(
//!     "@article{Nash1950, author = {Nash, John}, title = {Equilibrium points in n-person games}, \
//!      journal = {PNAS}, year = {1950}}",
//!     BibliographyFormat::BibLaTeX,
//! )
//! .unwrap();
//!
//! let processor = CitationProcessor::with_bibliography(CitationOptions::new(), bib).unwrap();
//! let document = Document::new(vec![Node::Element(Element::new("p").with_child(
//!     Node::text("Equilibria exist [@Nash1950]."),
//! ))]);
//!
//! let output = processor.process(document).unwrap();
//! assert!(output.text_content().contains("Nash"));
//! ```
//!
//! # Parsing markers only
//!
//! ```rust
//! use citetree::{parse_citation, Label};
//!
//! let parsed = parse_citation("[see @doe99, pp. 33-35; -@smith04]").unwrap();
//! assert_eq!(parsed.items.len(), 2);
//! assert_eq!(parsed.items[0].prefix.as_deref(), Some("see"));
//! assert_eq!(parsed.items[0].locator.as_deref(), Some("33-35"));
//! assert_eq!(parsed.items[0].label, Label::Page);
//! assert!(parsed.items[1].suppress_author);
//! ```
//!
//! # Error Handling
//!
//! Malformed markers and unknown keys never fail a document: the marker is left
//! as written (and logged when [`UnknownKeyPolicy::Warn`] is set). Missing
//! resources and engine failures are returned as [`CitationError`].
//!
//! # Thread Safety
//!
//! A [`CitationProcessor`] only holds loaded resources and can be shared between
//! threads. Every document is rendered by its own engine instance.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

pub mod bibliography;
pub mod cite;
pub mod config;
pub mod csl_json;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod footnote;
pub mod link;
pub mod processor;
pub mod source;
pub mod styled;
pub mod syntax;
pub mod tree;

// Reexports
pub use config::{CitationOptions, UnknownKeyPolicy};
#[cfg(feature = "diagnostics")]
pub use diagnostics::lint_with_diagnostics;
pub use engine::{CitationEngine, HayagrivaEngine};
pub use error::{CitationError, EngineError, ParseError, SourceSpan, SyntaxError};
pub use footnote::reconcile_footnotes;
pub use processor::{CitationProcessor, process};
pub use source::Bibliography;
pub use styled::StyledText;
pub use syntax::{Label, ParsedCitation, find_marker, parse_citation};
pub use tree::{Document, Element, Node};

mod regex;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CitationError>;

/// One reference inside a citation marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiteItem {
    /// Bibliography key, exact case.
    pub id: CompactString,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// Pinpoint reference such as a page range.
    pub locator: Option<String>,
    /// Kind of locator; `page` unless the marker names another.
    pub label: Label,
    /// Render without the author (`-@key`).
    pub suppress_author: bool,
}

impl CiteItem {
    /// Creates an item with only a key.
    #[must_use]
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self {
            id: id.into(),
            prefix: None,
            suffix: None,
            locator: None,
            label: Label::Page,
            suppress_author: false,
        }
    }
}

/// How a rendered citation appears in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitationMode {
    /// Rendered text in place of the marker.
    InText,
    /// A footnote reference in place of the marker, text in the footnote.
    Note,
}

/// All items of one marker occurrence, rendered together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationCluster {
    /// 1-based position of the marker in document order.
    pub sequence_id: usize,
    pub items: Vec<CiteItem>,
    /// Bare `@key` mention, rendered as "Author (Year)".
    pub is_composite: bool,
    pub mode: CitationMode,
}

impl CitationCluster {
    /// Keys of all items in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }
}

/// Citation format declared by a CSL style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitationFormat {
    Numeric,
    AuthorDate,
    Author,
    Note,
    Label,
}

impl CitationFormat {
    /// Convert the format to its CSL name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationFormat::Numeric => "numeric",
            CitationFormat::AuthorDate => "author-date",
            CitationFormat::Author => "author",
            CitationFormat::Note => "note",
            CitationFormat::Label => "label",
        }
    }
}

impl std::fmt::Display for CitationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
