use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentErrorKind {
    Open,
    Corrupt,
    MissingBody,
    Save,
    Cancelled,
}

impl fmt::Display for DocumentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentErrorKind::Open => "open failure",
            DocumentErrorKind::Corrupt => "corrupt document",
            DocumentErrorKind::MissingBody => "missing body part",
            DocumentErrorKind::Save => "save failure",
            DocumentErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Fatal, per-document failure. The original file is left untouched.
#[derive(Debug, Error)]
#[error("{kind}: {}: {source:#}", path.display())]
pub struct DocumentError {
    pub path: PathBuf,
    pub kind: DocumentErrorKind,
    #[source]
    pub source: anyhow::Error,
}

impl DocumentError {
    pub fn new(path: impl Into<PathBuf>, kind: DocumentErrorKind, source: anyhow::Error) -> Self {
        Self {
            path: path.into(),
            kind,
            source,
        }
    }
}

/// Invalid caller input, reported before any document is touched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid replacement map: {}", problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}
