use thiserror::Error;

/// A byte range within a query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    #[inline]
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    #[inline]
    pub const fn end(self) -> usize {
        self.start + self.len
    }
}

/// Render the standard located error block:
///
/// ```text
/// <message>
/// in the query: <query>
/// at operation: <spaces><carets>
/// for the daf data: <name>
/// ```
///
/// Caret alignment counts characters, not bytes, so multi-byte names line
/// up with their span.
pub(crate) fn render_located(
    message: &str,
    query: &str,
    span: &Span,
    data_name: &Option<String>,
) -> String {
    let start = span.start.min(query.len());
    let end = span.end().min(query.len());
    let prefix_chars = query[..start].chars().count();
    let span_chars = query[start..end].chars().count().max(1);

    let mut out = String::with_capacity(message.len() + query.len() * 2 + 64);
    out.push_str(message);
    out.push('\n');
    out.push_str("in the query: ");
    out.push_str(query);
    out.push('\n');
    out.push_str("at operation: ");
    for _ in 0..prefix_chars {
        out.push(' ');
    }
    for _ in 0..span_chars {
        out.push('\u{25b2}');
    }
    if let Some(name) = data_name {
        out.push('\n');
        out.push_str("for the daf data: ");
        out.push_str(name);
    }
    out
}

pub(crate) fn render_plain(message: &str, query: &str, span: &Span) -> String {
    render_located(message, query, span, &None)
}

/// Malformed query text, anchored to the raw input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_plain(.message, .query, .span))]
pub struct ParseError {
    pub message: String,
    /// The original query text as given to `parse`.
    pub query: String,
    pub span: Span,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, query: &str, span: Span) -> Self {
        Self {
            message: message.into(),
            query: query.to_string(),
            span,
        }
    }
}

/// Structurally invalid pipeline, detected without data access and
/// anchored to the canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_plain(.message, .query, .span))]
pub struct AnalysisError {
    pub message: String,
    /// The canonical query text.
    pub query: String,
    pub span: Span,
}

impl AnalysisError {
    pub(crate) fn new(message: impl Into<String>, query: &str, span: Span) -> Self {
        Self {
            message: message.into(),
            query: query.to_string(),
            span,
        }
    }
}

/// Classification of evaluation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalErrorKind {
    /// A referenced scalar, axis, vector or matrix does not exist.
    MissingName,
    /// A named entry is absent from its axis.
    MissingEntry,
    /// An operation was applied to a value of the wrong element type.
    TypeMismatch,
    /// A comparison or default literal could not be coerced.
    InvalidLiteral,
    /// A reduction over an empty operand without an `||` default.
    EmptyReduction,
    /// An empty-string foreign key without a `??` default.
    EmptyValue,
    /// A fetched value absent from the target axis.
    InvalidValue,
    /// An as-axis group target entry with no observed members and no
    /// `||` default.
    UnusedGroup,
    /// A mask regex pattern that failed to compile.
    InvalidRegex,
}

/// Failure detected only against concrete data, anchored to the canonical
/// text; `data_name` is appended by the public entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render_located(.message, .query, .span, .data_name))]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    /// The canonical query text.
    pub query: String,
    pub span: Span,
    pub data_name: Option<String>,
}

impl EvalError {
    pub(crate) fn new(
        kind: EvalErrorKind,
        message: impl Into<String>,
        query: &str,
        span: Span,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            query: query.to_string(),
            span,
            data_name: None,
        }
    }

    pub(crate) fn with_data_name(mut self, name: &str) -> Self {
        self.data_name = Some(name.to_string());
        self
    }
}

/// Any failure of the public query entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}
