//! The seam between the tree passes and a CSL engine.
//!
//! [`CitationEngine`] is what the citation, footnote and bibliography passes
//! need from a formatter. [`HayagrivaEngine`] implements it on top of
//! `hayagriva`. An engine carries the registry of one document: create a new
//! one per document.

mod csl;
#[cfg(test)]
pub(crate) mod testing;

pub use csl::HayagrivaEngine;

use crate::error::EngineError;
use crate::styled::StyledText;
use crate::{CitationCluster, CitationFormat};

/// One rendered bibliography entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BibliographyEntry {
    /// Bibliography key, exact case.
    pub id: String,
    pub content: StyledText,
}

/// What the link resolver needs to know about a registered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryItem {
    pub id: String,
    /// Text that identifies the entry inside a rendered citation, usually
    /// author and year, e.g. `Nash, 1950`.
    pub token: String,
    pub author_families: Vec<String>,
    pub year: Option<String>,
}

/// A citation formatter holding the registry of one document.
pub trait CitationEngine {
    /// The citation format the loaded style declares.
    fn citation_format(&self) -> CitationFormat;

    /// Whether citations are rendered as notes.
    fn is_note_style(&self) -> bool {
        self.citation_format() == CitationFormat::Note
    }

    /// Whether the style sorts the items of a cluster.
    fn sorts_citations(&self) -> bool;

    /// Renders `cluster`, cite-item affixes included. `citation_pre` lists the
    /// sequence ids of the clusters rendered before it, in document order.
    fn render_cluster(
        &mut self,
        cluster: &CitationCluster,
        citation_pre: &[usize],
    ) -> Result<StyledText, EngineError>;

    /// Registers entries for the bibliography without citing them. `"*"`
    /// registers every entry.
    fn update_registered_ids(&mut self, ids: &[String]);

    /// Whether anything has been cited or registered.
    fn has_registered_items(&self) -> bool;

    /// Renders the bibliography of all registered entries, in style order.
    fn render_bibliography(&mut self) -> Result<Vec<BibliographyEntry>, EngineError>;

    /// Registry data for `ids`: in bibliography order when the style sorts
    /// citations, in the given order otherwise. Unknown ids are skipped.
    fn registry_items(&self, ids: &[&str]) -> Vec<RegistryItem>;

    /// The bibliography text of a single entry, without formatting.
    fn entry_text(&self, id: &str) -> Result<String, EngineError>;
}
