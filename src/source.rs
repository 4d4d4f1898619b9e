//! Loading bibliographies, citation styles and locales.
//!
//! Every resource is named by a string that is either a built-in name, a
//! path (resolved against an optional base directory) or, with the `remote`
//! feature, an `http(s)` URL. All loading happens before any document is
//! touched, so a missing file never leaves a half-processed tree behind.

use crate::Result;
use crate::error::{CitationError, ResourceKind};
use crate::regex::Regex;
use hayagriva::archive::ArchivedStyle;
use hayagriva::citationberg::{self, IndependentStyle, Locale, LocaleCode};
use hayagriva::{Entry, Library};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static XML_LANG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"xml:lang\s*=\s*"([^"]+)""#).unwrap());

/// Names accepted for styles that the built-in archive files under another name.
const STYLE_ALIASES: &[(&str, &str)] = &[
    ("harvard1", "harvard-cite-them-right"),
    ("chicago", "chicago-author-date"),
    ("mla", "modern-language-association"),
];

/// Bibliography entries keyed by their exact-case citation key.
#[derive(Debug, Clone, Default)]
pub struct Bibliography {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Bibliography {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Entries in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Adds an entry, replacing any entry with the same key in place.
    pub fn insert(&mut self, entry: Entry) {
        match self.index.get(entry.key()) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.key().to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Merges another bibliography into this one; its entries win.
    pub fn extend(&mut self, other: Bibliography) {
        for entry in other.entries {
            self.insert(entry);
        }
    }
}

impl From<Library> for Bibliography {
    fn from(library: Library) -> Self {
        let mut bibliography = Bibliography::new();
        for entry in library.iter() {
            bibliography.insert(entry.clone());
        }
        bibliography
    }
}

/// Bibliography file formats understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BibliographyFormat {
    BibLaTeX,
    Yaml,
    CslJson,
}

impl BibliographyFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let extension = Path::new(path.split(['?', '#']).next().unwrap_or(path))
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match extension.as_str() {
            "bib" | "bibtex" | "biblatex" => Some(BibliographyFormat::BibLaTeX),
            "yaml" | "yml" => Some(BibliographyFormat::Yaml),
            "json" => Some(BibliographyFormat::CslJson),
            _ => None,
        }
    }

    /// Guess the format from file contents.
    pub fn detect(content: &str) -> Self {
        let trimmed = content.trim_start();
        if trimmed.starts_with('@') || trimmed.starts_with('%') {
            return BibliographyFormat::BibLaTeX;
        }
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            return BibliographyFormat::CslJson;
        }
        // BibLaTeX is brace-heavy, YAML is colon-heavy.
        let braces = content.matches('{').count();
        let colons = content.matches(':').count();
        if braces > colons {
            BibliographyFormat::BibLaTeX
        } else {
            BibliographyFormat::Yaml
        }
    }
}

/// Parses a bibliography held in memory.
pub fn parse_bibliography(content: &str, format: BibliographyFormat) -> Result<Bibliography> {
    parse_named(content, format, "<inline>")
}

fn parse_named(content: &str, format: BibliographyFormat, location: &str) -> Result<Bibliography> {
    let library = match format {
        BibliographyFormat::BibLaTeX => hayagriva::io::from_biblatex_str(content).map_err(|errors| {
            let message = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            CitationError::resource(ResourceKind::Bibliography, location, message)
        })?,
        BibliographyFormat::Yaml => hayagriva::io::from_yaml_str(content)
            .map_err(|e| CitationError::resource(ResourceKind::Bibliography, location, e))?,
        BibliographyFormat::CslJson => crate::csl_json::from_csl_json_str(content)
            .map_err(|e| CitationError::resource(ResourceKind::Bibliography, location, e))?,
    };
    Ok(library.into())
}

/// Loads and merges bibliography sources. Later sources win on duplicate keys.
pub fn load_bibliography(sources: &[String], base: Option<&Path>) -> Result<Bibliography> {
    let mut bibliography = Bibliography::new();
    for source in sources {
        let content = read_resource(ResourceKind::Bibliography, source, base)?;
        let format = BibliographyFormat::from_path(source)
            .unwrap_or_else(|| BibliographyFormat::detect(&content));
        let loaded = parse_named(&content, format, source)?;
        debug!(source = %source, entries = loaded.len(), ?format, "loaded bibliography");
        bibliography.extend(loaded);
    }
    Ok(bibliography)
}

/// Loads a CSL style by archive name (`apa`, `vancouver`, ...), path or URL.
pub fn load_style(style: &str, base: Option<&Path>) -> Result<IndependentStyle> {
    let name = STYLE_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(style))
        .map_or(style, |(_, name)| *name);

    if let Some(archived) = ArchivedStyle::by_name(name) {
        return match archived.get() {
            citationberg::Style::Independent(independent) => Ok(independent),
            _ => Err(CitationError::resource(
                ResourceKind::Style,
                style,
                "dependent styles are not supported",
            )),
        };
    }

    let content = read_resource(ResourceKind::Style, style, base)?;
    IndependentStyle::from_xml(&content)
        .map_err(|e| CitationError::resource(ResourceKind::Style, style, e))
}

/// Resolves a locale given as a code (`en-US`) or as a CSL locale file.
///
/// Returns the code to render with and, for files, the parsed locale.
pub fn load_locale(lang: &str, base: Option<&Path>) -> Result<(LocaleCode, Option<Locale>)> {
    if !is_location(lang) {
        return Ok((LocaleCode(lang.to_string()), None));
    }

    let content = read_resource(ResourceKind::Locale, lang, base)?;
    let code = XML_LANG
        .captures(&content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            CitationError::resource(ResourceKind::Locale, lang, "locale file has no xml:lang")
        })?;
    let file = citationberg::LocaleFile::from_xml(&content)
        .map_err(|e| CitationError::resource(ResourceKind::Locale, lang, e))?;
    Ok((LocaleCode(code), Some(file.into())))
}

fn is_location(lang: &str) -> bool {
    is_url(lang) || lang.ends_with(".xml") || lang.contains(['/', '\\'])
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Reads a file or URL into a string.
pub(crate) fn read_resource(
    kind: ResourceKind,
    location: &str,
    base: Option<&Path>,
) -> Result<String> {
    if is_url(location) {
        return fetch(kind, location);
    }
    let path = resolve_path(location, base);
    std::fs::read_to_string(&path).map_err(|e| {
        CitationError::resource(kind, path.to_string_lossy().into_owned(), e)
    })
}

fn resolve_path(location: &str, base: Option<&Path>) -> PathBuf {
    match base {
        Some(base) => base.join(location),
        None => PathBuf::from(location),
    }
}

#[cfg(feature = "remote")]
fn fetch(kind: ResourceKind, url: &str) -> Result<String> {
    debug!(url, %kind, "fetching remote resource");
    let resp = ureq::get(url)
        .call()
        .map_err(|e| CitationError::resource(kind, url, e))?;
    resp.into_body()
        .read_to_string()
        .map_err(|e| CitationError::resource(kind, url, e))
}

#[cfg(not(feature = "remote"))]
fn fetch(kind: ResourceKind, url: &str) -> Result<String> {
    Err(CitationError::resource(
        kind,
        url,
        "remote resources require the `remote` feature",
    ))
}
