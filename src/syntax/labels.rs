//! Locator labels and the natural-language aliases that select them.

use serde::{Deserialize, Serialize};

/// Kind of pinpoint reference a locator denotes, as understood by CSL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    Book,
    Chapter,
    Column,
    Figure,
    Folio,
    Issue,
    Line,
    Note,
    Opus,
    #[default]
    Page,
    Paragraph,
    Part,
    Section,
    #[serde(rename = "sub verbo")]
    SubVerbo,
    Verse,
    Volume,
}

impl Label {
    /// The CSL term for the label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Book => "book",
            Label::Chapter => "chapter",
            Label::Column => "column",
            Label::Figure => "figure",
            Label::Folio => "folio",
            Label::Issue => "issue",
            Label::Line => "line",
            Label::Note => "note",
            Label::Opus => "opus",
            Label::Page => "page",
            Label::Paragraph => "paragraph",
            Label::Part => "part",
            Label::Section => "section",
            Label::SubVerbo => "sub verbo",
            Label::Verse => "verse",
            Label::Volume => "volume",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural labels a writer may put in front of a locator, in English, German
/// and French, matched case-insensitively.
pub(crate) const LOCATOR_LABELS: &[(Label, &[&str])] = &[
    (
        Label::Book,
        &["book", "books", "bk.", "bks.", "buch", "bücher", "b.", "livre", "livres", "liv."],
    ),
    (
        Label::Chapter,
        &["chapter", "chapters", "chap.", "chaps.", "chaps", "kapitel", "kap.", "chapitre", "chapitres"],
    ),
    (
        Label::Column,
        &["column", "columns", "col.", "cols.", "cols", "spalte", "spalten", "sp.", "colonne", "colonnes"],
    ),
    (
        Label::Figure,
        &["figure", "figures", "fig.", "figs.", "figs", "abbildung", "abbildungen", "abb."],
    ),
    (
        Label::Folio,
        &["folio", "folios", "fol.", "fols.", "fols", "blatt", "blätter", "fᵒ", "fᵒˢ"],
    ),
    (
        Label::Issue,
        &["number", "numbers", "no.", "nos.", "nummer", "nummern", "nr.", "numéro", "numéros", "nᵒ", "nᵒˢ"],
    ),
    (
        Label::Line,
        &["line", "lines", "l.", "ll.", "zeile", "zeilen", "z", "ligne", "lignes"],
    ),
    (Label::Note, &["note", "notes", "n.", "nn.", "noten"]),
    (Label::Opus, &["opus", "opera", "op.", "opp."]),
    (
        Label::Page,
        &["page", "pages", "p.", "pp.", "seite", "seiten", "s."],
    ),
    (
        Label::Paragraph,
        &[
            "paragraph", "paragraphs", "para.", "paras.", "paras", "¶", "¶¶", "absatz", "absätze",
            "abs.", "paragraphe", "paragraphes", "paragr.",
        ],
    ),
    (
        Label::Part,
        &["part", "parts", "pt.", "pts.", "pts", "teil", "teile", "partie", "parties", "part."],
    ),
    (
        Label::Section,
        &["section", "sections", "sec.", "secs.", "secs", "sect.", "§", "§§", "abschnitt", "abschnitte", "abschn."],
    ),
    (
        Label::SubVerbo,
        &["sub verbo", "sub verbis", "s.v.", "s.vv.", "s. v.", "s. vv.", "s.\u{a0}v.", "s.\u{a0}vv."],
    ),
    (
        Label::Verse,
        &["verse", "verses", "v.", "vv.", "vers", "verset", "versets"],
    ),
    (
        Label::Volume,
        &["volume", "volumes", "vol.", "vols.", "band", "bände", "bd.", "bde."],
    ),
];

/// Finds the label a piece of text starts with.
///
/// Returns the label and the byte length of the matched alias. The longest
/// alias wins, and an alias that ends in a letter must not run into another
/// letter (`"pages"` is not `"page"` followed by `"s"`).
pub(crate) fn leading_label(text: &str) -> Option<(Label, usize)> {
    let lower = text.to_lowercase();
    // Lowercasing can change byte lengths; only trust offsets when it did not.
    if lower.len() != text.len() {
        return leading_label_slow(text);
    }

    LOCATOR_LABELS
        .iter()
        .flat_map(|(label, aliases)| aliases.iter().map(move |alias| (*label, *alias)))
        .filter(|(_, alias)| lower.starts_with(alias) && at_boundary(&lower, alias))
        .max_by_key(|(_, alias)| alias.len())
        .map(|(label, alias)| (label, alias.len()))
}

fn leading_label_slow(text: &str) -> Option<(Label, usize)> {
    let mut best: Option<(Label, usize, usize)> = None;
    for (label, aliases) in LOCATOR_LABELS {
        for alias in *aliases {
            let chars = alias.chars().count();
            let Some((end, _)) = text.char_indices().nth(chars).or(
                (text.chars().count() == chars).then_some((text.len(), ' ')),
            ) else {
                continue;
            };
            let head = &text[..end];
            if head.to_lowercase() == *alias
                && at_boundary(&text.to_lowercase(), &head.to_lowercase())
                && best.is_none_or(|(_, _, len)| chars > len)
            {
                best = Some((*label, end, chars));
            }
        }
    }
    best.map(|(label, end, _)| (label, end))
}

fn at_boundary(lower: &str, alias: &str) -> bool {
    let ends_in_letter = alias.chars().last().is_some_and(char::is_alphabetic);
    !ends_in_letter
        || !lower[alias.len()..]
            .chars()
            .next()
            .is_some_and(char::is_alphabetic)
}

/// Looks up a label by its exact alias, ignoring case.
pub fn label_for(alias: &str) -> Option<Label> {
    let alias = alias.trim().to_lowercase();
    LOCATOR_LABELS
        .iter()
        .find(|(_, aliases)| aliases.contains(&alias.as_str()))
        .map(|(label, _)| *label)
}
