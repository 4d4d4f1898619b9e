//! Error types for citation processing.
//!
//! Marker-level problems ([`ParseError`]) are recovered from locally: the
//! offending marker is left in the text as written. Resource, engine and
//! configuration problems surface as [`CitationError`] and abort the whole
//! document.

use thiserror::Error;

/// A byte-offset span into the original source text.
///
/// Both `start` and `end` are byte offsets (not character indices) from the
/// beginning of the source string.  `start` is inclusive, `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    /// Inclusive start byte offset.
    pub start: usize,
    /// Exclusive end byte offset.
    pub end: usize,
}

impl SourceSpan {
    /// Create a new `SourceSpan`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Move the span `offset` bytes to the right.
    pub fn shifted(self, offset: usize) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }
}

/// What kind of external resource failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Bibliography,
    Style,
    Locale,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Bibliography => "bibliography",
            ResourceKind::Style => "citation style",
            ResourceKind::Locale => "locale",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for citation processing.
#[derive(Error, Debug)]
pub enum CitationError {
    #[error("Unable to load {kind} from '{location}': {message}")]
    Resource {
        kind: ResourceKind,
        location: String,
        message: String,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CitationError {
    pub(crate) fn resource(
        kind: ResourceKind,
        location: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        CitationError::Resource {
            kind,
            location: location.into(),
            message: message.to_string(),
        }
    }
}

/// Failure reported by a [`crate::engine::CitationEngine`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Entry '{0}' is not in the bibliography")]
    UnknownEntry(String),

    #[error("Failed to render citation {sequence_id}: {message}")]
    Cluster { sequence_id: usize, message: String },
}

/// A malformed citation marker.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed citation{}: {error}",
    match (segment, span) {
        (Some(s), Some(span)) => format!(" in item {} at byte {}", s + 1, span.start),
        (Some(s), None) => format!(" in item {}", s + 1),
        (None, Some(span)) => format!(" at byte {}", span.start),
        (None, None) => String::new(),
    }
)]
pub struct ParseError {
    /// Byte-offset span of the offending text, relative to the scanned text.
    pub span: Option<SourceSpan>,
    /// Zero-based index of the `;`-separated segment that failed.
    pub segment: Option<usize>,
    /// The specific error that occurred
    pub error: SyntaxError,
}

impl ParseError {
    pub fn new(error: SyntaxError) -> Self {
        Self {
            span: None,
            segment: None,
            error,
        }
    }

    /// Attach a byte-offset span to this error, returning `self` (builder style).
    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    /// Record which segment of a bracketed marker failed.
    pub fn in_segment(mut self, segment: usize) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Move the span so that it is relative to an enclosing text.
    pub(crate) fn offset_by(mut self, offset: usize) -> Self {
        self.span = self.span.map(|span| span.shifted(offset));
        self
    }
}

/// Grammar-level failures inside a citation marker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("Cite key should be in the form of @key")]
    MissingKey,

    #[error("Found {count} cite keys in one item, separate keys with ';'")]
    MultipleKeys { count: usize },

    #[error("Invalid cite key: \"{key}\"")]
    InvalidKey { key: String },

    #[error("Not a citation marker: \"{0}\"")]
    NotAMarker(String),
}
