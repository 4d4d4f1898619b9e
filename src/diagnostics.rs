//! Pretty diagnostic reporting using [ariadne].
//!
//! Renders [`ParseError`] values with the surrounding text, an underline at the
//! offending part of the marker and the error message. Only compiled with the
//! `diagnostics` feature:
//!
//! ```toml
//! [dependencies]
//! citetree = { version = "0.1", features = ["diagnostics"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use citetree::lint_with_diagnostics;
//!
//! let text = "As argued [see @doe99 @smith04], ...";
//! for report in lint_with_diagnostics(text, "chapter1.md") {
//!     eprintln!("{report}");
//! }
//! ```

use crate::error::ParseError;
use crate::syntax::lint;
use ariadne::{Color, Config, IndexType, Label, Report, ReportKind, Source};
use std::ops::Range;

impl ParseError {
    /// Render this error as an Ariadne report over `source`, the text the
    /// marker was found in.
    ///
    /// The returned `String` contains ANSI colour codes when the terminal
    /// supports them.
    pub fn to_diagnostic(&self, filename: &str, source: &str) -> String {
        let range = self.byte_range(source);
        let mut buf = Vec::new();

        let written = Report::build(ReportKind::Error, (filename, range.clone()))
            .with_config(Config::default().with_index_type(IndexType::Byte))
            .with_message(self.to_string())
            .with_label(
                Label::new((filename, range))
                    .with_message(self.error.to_string())
                    .with_color(Color::Red),
            )
            .finish()
            .write((filename, Source::from(source)), &mut buf);

        match written {
            Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => format!("{filename}: {self}"),
        }
    }

    /// The span clamped to `source`, or the start of the text without one.
    fn byte_range(&self, source: &str) -> Range<usize> {
        match self.span {
            Some(span) => {
                let end = span.end.min(source.len());
                span.start.min(end)..end
            }
            None => 0..0,
        }
    }
}

/// Lints `text` and renders every malformed marker as a diagnostic.
pub fn lint_with_diagnostics(text: &str, filename: &str) -> Vec<String> {
    lint(text)
        .iter()
        .map(|error| error.to_diagnostic(filename, text))
        .collect()
}
