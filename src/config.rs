//! Processing options.
//!
//! Options can be built in code with the chaining setters or deserialized
//! from document front matter, which uses camelCase keys:
//!
//! ```
//! use citetree::CitationOptions;
//!
//! let mut options = CitationOptions::new();
//! options
//!     .set_bibliography(vec!["refs.bib".to_string()])
//!     .set_csl("vancouver")
//!     .set_link_citations(true);
//! assert!(options.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with a marker naming a key that is not in the bibliography.
///
/// The marker is always left in the text as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownKeyPolicy {
    /// Leave it alone.
    #[default]
    Silent,
    /// Also log a warning through `tracing`.
    Warn,
}

/// Configuration for citation processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CitationOptions {
    /// Bibliography files or URLs, merged in order
    #[serde(deserialize_with = "one_or_many")]
    pub(crate) bibliography: Vec<String>,
    /// Directory that relative resource paths are resolved against
    pub(crate) path: Option<PathBuf>,
    /// Built-in style name, CSL file path, or URL
    pub(crate) csl: String,
    /// Locale code, locale file path, or URL
    pub(crate) lang: String,
    /// Keep the bibliography out of the document
    pub(crate) suppress_bibliography: bool,
    /// Keys to list in the bibliography without citing them
    pub(crate) no_cite: Vec<String>,
    /// Classes for rendered citation spans
    pub(crate) inline_class: Vec<String>,
    /// Classes for inline bibliographies; empty disables them
    pub(crate) inline_bib_class: Vec<String>,
    /// Hyperlink citations to their bibliography entries
    pub(crate) link_citations: bool,
    /// Show bibliography text on hover
    pub(crate) show_tooltips: bool,
    /// Attribute that carries tooltip text
    pub(crate) tooltip_attribute: String,
    pub(crate) unknown_key_policy: UnknownKeyPolicy,
}

impl Default for CitationOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CitationOptions {
    /// Creates options with default settings: APA, `en-US`, no bibliography.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bibliography: Vec::new(),
            path: None,
            csl: "apa".to_string(),
            lang: "en-US".to_string(),
            suppress_bibliography: false,
            no_cite: Vec::new(),
            inline_class: Vec::new(),
            inline_bib_class: Vec::new(),
            link_citations: false,
            show_tooltips: false,
            tooltip_attribute: "title".to_string(),
            unknown_key_policy: UnknownKeyPolicy::Silent,
        }
    }

    pub fn set_bibliography(&mut self, sources: Vec<String>) -> &mut Self {
        self.bibliography = sources;
        self
    }

    pub fn add_bibliography(&mut self, source: impl Into<String>) -> &mut Self {
        self.bibliography.push(source.into());
        self
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.path = Some(path.into());
        self
    }

    pub fn set_csl(&mut self, csl: impl Into<String>) -> &mut Self {
        self.csl = csl.into();
        self
    }

    pub fn set_lang(&mut self, lang: impl Into<String>) -> &mut Self {
        self.lang = lang.into();
        self
    }

    pub fn set_suppress_bibliography(&mut self, suppress: bool) -> &mut Self {
        self.suppress_bibliography = suppress;
        self
    }

    /// Sets keys for the bibliography that are not cited. A leading `@` is
    /// dropped, and `*` selects every entry.
    pub fn set_no_cite(&mut self, ids: Vec<String>) -> &mut Self {
        self.no_cite = ids;
        self
    }

    pub fn set_inline_class(&mut self, classes: Vec<String>) -> &mut Self {
        self.inline_class = classes;
        self
    }

    pub fn set_inline_bib_class(&mut self, classes: Vec<String>) -> &mut Self {
        self.inline_bib_class = classes;
        self
    }

    pub fn set_link_citations(&mut self, link: bool) -> &mut Self {
        self.link_citations = link;
        self
    }

    pub fn set_show_tooltips(&mut self, show: bool) -> &mut Self {
        self.show_tooltips = show;
        self
    }

    pub fn set_tooltip_attribute(&mut self, attribute: impl Into<String>) -> &mut Self {
        self.tooltip_attribute = attribute.into();
        self
    }

    pub fn set_unknown_key_policy(&mut self, policy: UnknownKeyPolicy) -> &mut Self {
        self.unknown_key_policy = policy;
        self
    }

    pub fn bibliography(&self) -> &[String] {
        &self.bibliography
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn csl(&self) -> &str {
        &self.csl
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// Uncited keys with any leading `@` removed.
    pub(crate) fn no_cite_ids(&self) -> Vec<String> {
        self.no_cite
            .iter()
            .map(|id| id.trim().trim_start_matches('@').to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub(crate) fn inline_class_attr(&self) -> Option<String> {
        join_classes(&self.inline_class)
    }

    pub(crate) fn inline_bib_class_attr(&self) -> Option<String> {
        join_classes(&self.inline_bib_class)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.csl.trim().is_empty() {
            return Err("Citation style must not be empty".to_string());
        }
        if self.lang.trim().is_empty() {
            return Err("Locale must not be empty".to_string());
        }
        if self.bibliography.iter().any(|source| source.trim().is_empty()) {
            return Err("Empty bibliography source".to_string());
        }

        let attribute = self.tooltip_attribute.as_str();
        let custom_name = attribute
            .strip_prefix("data-")
            .is_some_and(|name| {
                !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            });
        if attribute != "title" && !custom_name {
            return Err(format!(
                "Tooltip attribute '{}' must be 'title' or a data-* attribute",
                attribute
            ));
        }

        for class in self.inline_class.iter().chain(&self.inline_bib_class) {
            if class.is_empty() || class.contains(char::is_whitespace) {
                return Err(format!("Invalid class name '{}'", class));
            }
        }

        Ok(())
    }
}

fn join_classes(classes: &[String]) -> Option<String> {
    (!classes.is_empty()).then(|| classes.join(" "))
}

/// Accepts either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(source) => vec![source],
        OneOrMany::Many(sources) => sources,
    })
}
