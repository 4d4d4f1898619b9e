//! Citation marker syntax.
//!
//! [`find_marker`] locates the next marker in a piece of text and
//! [`decode`] turns it into cite items. [`parse_citation`] does both for a
//! string that holds exactly one marker, and [`lint`] reports every malformed
//! marker in a text.

mod decode;
mod labels;
mod scan;

pub use decode::{ParsedCitation, decode, parse_citation};
pub use labels::{Label, label_for};
pub use scan::{MarkerKind, MarkerMatch, find_marker, find_markers};

use crate::error::ParseError;

/// Returns an error for every marker in `text` that cannot be decoded.
///
/// Spans are relative to `text`.
///
/// ```
/// use citetree::syntax::lint;
///
/// let errors = lint("Fine [@a], broken [see @x @y], fine @b.");
/// assert_eq!(errors.len(), 1);
/// ```
pub fn lint(text: &str) -> Vec<ParseError> {
    find_markers(text)
        .filter_map(|marker| decode(&marker).err())
        .collect()
}
