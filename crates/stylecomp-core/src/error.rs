use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Every failure the composer can report. All of them are raised while
/// loading or composing; a built `Composer` never fails a query.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("{span}: {message}")]
    Parse { span: Span, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("recursive import detected: {}", .path.display())]
    RecursiveImport { path: PathBuf },

    #[error("unknown utility '{name}' referenced from '{from}'")]
    UnknownUtility { name: String, from: String },

    #[error("cyclic extension chain: {}", .path.join(" -> "))]
    CyclicExtension { path: Vec<String> },

    #[error("unknown breakpoint '{name}' in '{from}'")]
    UnknownBreakpoint { name: String, from: String },

    #[error("undefined variable '${name}' in '{from}'")]
    UnknownVariable { name: String, from: String },

    #[error("unknown token '@{name}': {reason}")]
    UnknownToken { name: String, reason: String },

    #[error("mixin '{name}' takes {expected} argument(s), got {got}")]
    MixinArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("cannot evaluate '{expr}': {reason}")]
    Value { expr: String, reason: String },
}

impl ComposeError {
    pub(crate) fn parse(span: Span, message: impl Into<String>) -> Self {
        Self::Parse {
            span,
            message: message.into(),
        }
    }
}

pub type Result<T, E = ComposeError> = std::result::Result<T, E>;
