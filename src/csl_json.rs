//! CSL-JSON bibliographies.
//!
//! Each item is rewritten into hayagriva's own data model and the result is
//! deserialized as a [`Library`]. Container fields (`container-title`,
//! `volume`, `issue`) move to a parent entry whose type follows the item type.

use hayagriva::Library;
use hayagriva::types::Date;
use serde::de::Error as _;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

/// CSL item type, hayagriva entry type, hayagriva parent type.
const ITEM_TYPES: &[(&str, &str, Option<&str>)] = &[
    ("article", "article", None),
    ("article-journal", "article", Some("periodical")),
    ("article-magazine", "article", Some("periodical")),
    ("article-newspaper", "article", Some("newspaper")),
    ("paper-conference", "article", Some("proceedings")),
    ("chapter", "chapter", Some("book")),
    ("entry-dictionary", "entry", Some("reference")),
    ("entry-encyclopedia", "entry", Some("reference")),
    ("post-weblog", "article", Some("blog")),
    ("book", "book", None),
    ("thesis", "thesis", None),
    ("report", "report", None),
    ("webpage", "web", None),
    ("post", "post", None),
    ("patent", "patent", None),
    ("legal_case", "case", None),
    ("legislation", "legislation", None),
    ("manuscript", "manuscript", None),
];

/// Fields copied onto the entry as text, CSL name first.
const TEXT_FIELDS: &[(&str, &str)] = &[
    ("title", "title"),
    ("page", "page-range"),
    ("edition", "edition"),
    ("genre", "genre"),
    ("note", "note"),
    ("abstract", "abstract"),
    ("archive", "archive"),
    ("archive_location", "archive-location"),
    ("call-number", "call-number"),
];

/// Fields that belong to the container when there is one.
const CONTAINER_FIELDS: &[(&str, &str)] = &[
    ("container-title", "title"),
    ("volume", "volume"),
    ("issue", "issue"),
];

/// Parses a CSL-JSON array (or a single item object).
pub fn from_csl_json_str(content: &str) -> Result<Library, serde_json::Error> {
    let items = match serde_json::from_str::<Value>(content)? {
        Value::Array(items) => items,
        item @ Value::Object(_) => vec![item],
        _ => {
            return Err(serde_json::Error::custom(
                "expected an array of CSL-JSON items",
            ));
        }
    };

    let mut library = Library::new();
    for (index, item) in items.iter().enumerate() {
        let Value::Object(item) = item else {
            return Err(serde_json::Error::custom(format!(
                "item {index} is not an object"
            )));
        };
        let key = item.get("id").and_then(scalar).ok_or_else(|| {
            serde_json::Error::custom(format!("item {index} has no id"))
        })?;
        let mut single = Map::new();
        single.insert(key, Value::Object(entry(item)));
        // Deserialized one by one to keep the file order.
        let parsed: Library = serde_json::from_value(Value::Object(single))?;
        for entry in parsed.iter() {
            library.push(entry);
        }
    }
    Ok(library)
}

/// One CSL item in hayagriva's entry layout.
fn entry(item: &Map<String, Value>) -> Map<String, Value> {
    let csl_type = item.get("type").and_then(Value::as_str).unwrap_or("");
    let (entry_type, parent_type) = ITEM_TYPES
        .iter()
        .find(|(name, ..)| *name == csl_type)
        .map_or(("misc", None), |&(_, entry_type, parent)| (entry_type, parent));

    let mut entry = Map::new();
    let mut parent = Map::new();
    entry.insert("type".into(), entry_type.into());
    if let Some(parent_type) = parent_type {
        parent.insert("type".into(), parent_type.into());
    }

    for (from, to) in TEXT_FIELDS {
        if let Some(value) = item.get(*from).and_then(scalar) {
            entry.insert((*to).into(), value.into());
        }
    }

    for (from, to) in CONTAINER_FIELDS {
        if let Some(value) = item.get(*from).and_then(scalar) {
            parent.insert((*to).into(), value.into());
        }
    }
    if let Some(issn) = item.get("ISSN").and_then(scalar) {
        let mut serial = Map::new();
        serial.insert("issn".into(), issn.into());
        parent.insert("serial-number".into(), serial.into());
    }

    if let Some(publisher) = item.get("publisher").and_then(scalar) {
        let mut value = Map::new();
        value.insert("name".into(), publisher.into());
        if let Some(place) = item.get("publisher-place").and_then(scalar) {
            value.insert("location".into(), place.into());
        }
        // Publishers of books and proceedings are carried by the container.
        match parent_type {
            Some("book" | "proceedings") => parent.insert("publisher".into(), value.into()),
            _ => entry.insert("publisher".into(), value.into()),
        };
    }

    if let Some(authors) = item.get("author").and_then(names) {
        entry.insert("author".into(), authors);
    }
    if let Some(editors) = item.get("editor").and_then(names) {
        match parent_type {
            Some("book" | "proceedings" | "reference") => parent.insert("editor".into(), editors),
            _ => entry.insert("editor".into(), editors),
        };
    }

    if let Some(issued) = item.get("issued").and_then(date) {
        entry.insert("date".into(), issued.into());
    }
    if let Some(url) = item.get("URL").and_then(scalar) {
        let value = match item.get("accessed").and_then(date) {
            Some(accessed) => {
                let mut qualified = Map::new();
                qualified.insert("value".into(), url.into());
                qualified.insert("date".into(), accessed.into());
                qualified.into()
            }
            None => url.into(),
        };
        entry.insert("url".into(), value);
    }

    let mut serials = Map::new();
    for (from, to) in [("DOI", "doi"), ("ISBN", "isbn"), ("PMID", "pmid"), ("PMCID", "pmcid")] {
        if let Some(value) = item.get(from).and_then(scalar) {
            serials.insert(to.into(), value.into());
        }
    }
    if !serials.is_empty() {
        entry.insert("serial-number".into(), serials.into());
    }
    if parent_type.is_some() {
        if parent.len() > 1 {
            entry.insert("parent".into(), parent.into());
        }
    } else {
        // Without a container the container title has nowhere to go.
        parent.remove("title");
        for (field, value) in parent {
            entry.entry(field).or_insert(value);
        }
    }
    entry
}

/// A string or number as text.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// CSL name objects as hayagriva persons.
fn names(value: &Value) -> Option<Value> {
    let persons: Vec<Value> = value
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|name| {
            let mut person = Map::new();
            let family = name
                .get("family")
                .or_else(|| name.get("literal"))
                .and_then(scalar)?;
            person.insert("name".into(), family.into());
            for (from, to) in [
                ("given", "given-name"),
                ("non-dropping-particle", "prefix"),
                ("suffix", "suffix"),
            ] {
                if let Some(part) = name.get(from).and_then(scalar) {
                    person.insert(to.into(), part.into());
                }
            }
            Some(person.into())
        })
        .collect();
    (!persons.is_empty()).then_some(Value::Array(persons))
}

/// A CSL date (`date-parts`, `raw` or `literal`) as `YYYY[-MM[-DD]]`.
fn date(value: &Value) -> Option<String> {
    let parts = value
        .get("date-parts")
        .and_then(Value::as_array)
        .and_then(|ranges| ranges.first())
        .and_then(Value::as_array);

    if let Some(parts) = parts {
        let numbers: Vec<i64> = parts
            .iter()
            .map_while(|part| scalar(part)?.parse().ok())
            .collect();
        return match numbers.as_slice() {
            [year] => Some(format!("{year:04}")),
            [year, month] => Some(format!("{year:04}-{month:02}")),
            [year, month, day, ..] => Some(format!("{year:04}-{month:02}-{day:02}")),
            [] => None,
        };
    }

    let raw = value
        .get("raw")
        .or_else(|| value.get("literal"))
        .and_then(scalar)?;
    if Date::from_str(&raw).is_ok() {
        Some(raw)
    } else {
        debug!(date = %raw, "unparsed CSL-JSON date dropped");
        None
    }
}
