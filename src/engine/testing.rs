//! Deterministic engine and fixtures for unit tests.

use super::{BibliographyEntry, CitationEngine, RegistryItem};
use crate::error::EngineError;
use crate::styled::StyledText;
use crate::tree::{Element, Node};
use crate::{CitationCluster, CitationFormat, CiteItem, Label};
use std::collections::HashSet;

pub(crate) const NASH_BIB: &str = r#"
@article{Nash1950,
  author = {Nash, John},
  title = {Equilibrium points in n-person games},
  journal = {Proceedings of the National Academy of Sciences},
  volume = {36},
  number = {1},
  pages = {48--49},
  year = {1950},
}

@article{Nash1951,
  author = {Nash, John},
  title = {Non-cooperative games},
  journal = {Annals of Mathematics},
  volume = {54},
  number = {2},
  pages = {286--295},
  year = {1951},
}
"#;

struct StubEntry {
    id: &'static str,
    family: &'static str,
    year: &'static str,
    title: &'static str,
}

const STUB_ENTRIES: &[StubEntry] = &[
    StubEntry {
        id: "Nash1950",
        family: "Nash",
        year: "1950",
        title: "Equilibrium points in n-person games",
    },
    StubEntry {
        id: "Nash1951",
        family: "Nash",
        year: "1951",
        title: "Non-cooperative games",
    },
    StubEntry {
        id: "Doe2001",
        family: "Doe",
        year: "2001",
        title: "A study",
    },
    StubEntry {
        id: "Smith2004",
        family: "Smith",
        year: "2004",
        title: "Another study",
    },
];

/// Renders APA-like, numeric or note citations with fixed rules.
pub(crate) struct StubEngine {
    format: CitationFormat,
    sorts: bool,
    cited: Vec<String>,
    uncited: Vec<String>,
    all_registered: bool,
    /// `(sequence_id, citation_pre)` of every render call.
    pub calls: Vec<(usize, Vec<usize>)>,
    /// Fail when asked to render this sequence id.
    pub fail_on: Option<usize>,
}

impl StubEngine {
    fn with_format(format: CitationFormat) -> Self {
        Self {
            format,
            sorts: true,
            cited: Vec::new(),
            uncited: Vec::new(),
            all_registered: false,
            calls: Vec::new(),
            fail_on: None,
        }
    }

    pub fn author_date() -> Self {
        Self::with_format(CitationFormat::AuthorDate)
    }

    pub fn numeric() -> Self {
        Self::with_format(CitationFormat::Numeric)
    }

    pub fn note() -> Self {
        Self::with_format(CitationFormat::Note)
    }

    pub fn unsorted(mut self) -> Self {
        self.sorts = false;
        self
    }

    /// Keys the stub knows about.
    pub fn known_ids() -> HashSet<String> {
        STUB_ENTRIES.iter().map(|e| e.id.to_string()).collect()
    }

    fn entry(id: &str) -> Result<&'static StubEntry, EngineError> {
        STUB_ENTRIES
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| EngineError::UnknownEntry(id.to_string()))
    }

    fn number(&self, id: &str) -> usize {
        self.cited.iter().position(|c| c == id).map_or(0, |i| i + 1)
    }

    fn locator(item: &CiteItem) -> String {
        let Some(locator) = &item.locator else {
            return String::new();
        };
        let locator = locator.replace('-', "–");
        let term = match item.label {
            Label::Page if locator.contains(['–', ',']) => "pp.",
            Label::Page => "p.",
            Label::Chapter => "chap.",
            Label::Section => "sec.",
            other => other.as_str(),
        };
        format!(", {term} {locator}")
    }

    fn affixed(item: &CiteItem, body: String) -> String {
        let mut text = String::new();
        if let Some(prefix) = &item.prefix {
            text.push_str(prefix);
            text.push(' ');
        }
        text.push_str(&body);
        if let Some(suffix) = &item.suffix {
            text.push(' ');
            text.push_str(suffix);
        }
        text
    }

    fn author_date_cluster(cluster: &CitationCluster) -> Result<String, EngineError> {
        if cluster.is_composite {
            let item = &cluster.items[0];
            let entry = Self::entry(&item.id)?;
            let inner = Self::affixed(
                &CiteItem {
                    prefix: None,
                    ..item.clone()
                },
                format!("{}{}", entry.year, Self::locator(item)),
            );
            return Ok(format!("{} ({inner})", entry.family));
        }

        let mut parts: Vec<String> = Vec::new();
        let mut previous_family: Option<&str> = None;
        for item in &cluster.items {
            let entry = Self::entry(&item.id)?;
            let body = if item.suppress_author {
                format!("{}{}", entry.year, Self::locator(item))
            } else {
                format!("{}, {}{}", entry.family, entry.year, Self::locator(item))
            };
            let collapses = !item.suppress_author
                && item.prefix.is_none()
                && previous_family == Some(entry.family);
            match parts.last_mut() {
                Some(last) if collapses => {
                    last.push_str(", ");
                    last.push_str(&Self::affixed(item, format!("{}{}", entry.year, Self::locator(item))));
                }
                _ => parts.push(Self::affixed(item, body)),
            }
            previous_family = (!item.suppress_author).then_some(entry.family);
        }
        Ok(format!("({})", parts.join("; ")))
    }

    fn bibliography_text(entry: &StubEntry) -> String {
        format!("{}, J. ({}). {}.", entry.family, entry.year, entry.title)
    }

    /// [`Self::bibliography_text`] with the title in italics.
    fn bibliography_content(entry: &StubEntry) -> StyledText {
        StyledText::new(vec![
            Node::text(format!("{}, J. ({}). ", entry.family, entry.year)),
            Element::new("i").with_child(Node::text(entry.title)).into(),
            Node::text("."),
        ])
    }

    fn registered(&self) -> Vec<&'static StubEntry> {
        let mut ids: Vec<&str> = self.cited.iter().map(String::as_str).collect();
        if self.all_registered {
            ids.extend(STUB_ENTRIES.iter().map(|e| e.id));
        } else {
            ids.extend(self.uncited.iter().map(String::as_str));
        }
        let mut seen = HashSet::new();
        let mut entries: Vec<_> = ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| Self::entry(id).ok())
            .collect();
        if self.format != CitationFormat::Numeric {
            entries.sort_by_key(|e| (e.family, e.year));
        }
        entries
    }
}

impl CitationEngine for StubEngine {
    fn citation_format(&self) -> CitationFormat {
        self.format
    }

    fn sorts_citations(&self) -> bool {
        self.sorts
    }

    fn render_cluster(
        &mut self,
        cluster: &CitationCluster,
        citation_pre: &[usize],
    ) -> Result<StyledText, EngineError> {
        self.calls.push((cluster.sequence_id, citation_pre.to_vec()));
        if self.fail_on == Some(cluster.sequence_id) {
            return Err(EngineError::Cluster {
                sequence_id: cluster.sequence_id,
                message: "stub failure".to_string(),
            });
        }
        for id in cluster.ids() {
            Self::entry(id)?;
            if !self.cited.iter().any(|c| c == id) {
                self.cited.push(id.to_string());
            }
        }

        let text = match self.format {
            CitationFormat::Numeric => {
                let parts: Vec<String> = cluster
                    .items
                    .iter()
                    .map(|item| format!("{}{}", self.number(&item.id), Self::locator(item)))
                    .collect();
                format!("({})", parts.join(", "))
            }
            CitationFormat::Note => {
                let parts = cluster
                    .items
                    .iter()
                    .map(|item| {
                        let entry = Self::entry(&item.id)?;
                        Ok(Self::affixed(
                            item,
                            format!("{}, {}{}", entry.family, entry.year, Self::locator(item)),
                        ))
                    })
                    .collect::<Result<Vec<_>, EngineError>>()?;
                format!("{}.", parts.join("; "))
            }
            _ => Self::author_date_cluster(cluster)?,
        };
        Ok(StyledText::plain(text))
    }

    fn update_registered_ids(&mut self, ids: &[String]) {
        for id in ids {
            if id == "*" {
                self.all_registered = true;
            } else if !self.uncited.contains(id) {
                self.uncited.push(id.clone());
            }
        }
    }

    fn has_registered_items(&self) -> bool {
        !self.registered().is_empty()
    }

    fn render_bibliography(&mut self) -> Result<Vec<BibliographyEntry>, EngineError> {
        Ok(self
            .registered()
            .into_iter()
            .map(|entry| BibliographyEntry {
                id: entry.id.to_string(),
                content: Self::bibliography_content(entry),
            })
            .collect())
    }

    fn registry_items(&self, ids: &[&str]) -> Vec<RegistryItem> {
        let mut entries: Vec<&StubEntry> = Vec::new();
        for id in ids {
            if let Ok(entry) = Self::entry(id)
                && !entries.iter().any(|e| e.id == entry.id)
            {
                entries.push(entry);
            }
        }
        if self.sorts {
            entries.sort_by_key(|e| (e.family, e.year));
        }
        entries
            .into_iter()
            .map(|entry| RegistryItem {
                id: entry.id.to_string(),
                token: format!("{}, {}", entry.family, entry.year),
                author_families: vec![entry.family.to_string()],
                year: Some(entry.year.to_string()),
            })
            .collect()
    }

    fn entry_text(&self, id: &str) -> Result<String, EngineError> {
        Self::entry(id).map(Self::bibliography_text)
    }
}

/// A cluster of plain items for engine tests.
pub(crate) fn cluster(sequence_id: usize, ids: &[&str]) -> CitationCluster {
    CitationCluster {
        sequence_id,
        items: ids.iter().map(|id| CiteItem::new(*id)).collect(),
        is_composite: false,
        mode: crate::CitationMode::InText,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stub_author_date_collapses_same_author() {
        let mut engine = StubEngine::author_date();
        let text = engine
            .render_cluster(&cluster(1, &["Nash1950", "Nash1951", "Doe2001"]), &[])
            .unwrap()
            .text();
        assert_eq!(text, "(Nash, 1950, 1951; Doe, 2001)");
    }

    #[test]
    fn test_stub_numeric_numbers_by_first_cite() {
        let mut engine = StubEngine::numeric();
        assert_eq!(engine.render_cluster(&cluster(1, &["Nash1951"]), &[]).unwrap().text(), "(1)");
        assert_eq!(engine.render_cluster(&cluster(2, &["Nash1950"]), &[1]).unwrap().text(), "(2)");
        assert_eq!(
            engine.render_cluster(&cluster(3, &["Nash1950", "Nash1951"]), &[1, 2]).unwrap().text(),
            "(2, 1)"
        );
    }
}
