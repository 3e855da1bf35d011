//! Error taxonomy for the two pipeline stages.
//!
//! [`DumpError`] is terminal: a malformed or truncated dump can leave page
//! boundaries corrupted, so no partial table is trusted. [`FetchFailure`] is
//! scoped to a single title and only ever ends up inside a
//! [`ViewOutcome`](crate::views::ViewOutcome).

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("malformed XML at byte {offset}")]
    Parse {
        offset: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("dump ended at byte {offset} with {open} element(s) still open")]
    UnexpectedEof { offset: usize, open: usize },

    #[error("schema violation at byte {offset}: {detail}")]
    SchemaViolation { offset: usize, detail: String },

    /// Decompression or file read failure underneath the XML reader
    #[error("failed to read dump at byte {offset}")]
    Io {
        offset: usize,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl DumpError {
    /// Splits reader failures into I/O faults and malformed XML.
    pub fn from_reader(offset: usize, source: quick_xml::Error) -> Self {
        match source {
            quick_xml::Error::Io(source) => DumpError::Io { offset, source },
            source => DumpError::Parse { offset, source },
        }
    }

    /// Byte offset in the decompressed stream.
    pub fn offset(&self) -> usize {
        match self {
            DumpError::Parse { offset, .. }
            | DumpError::UnexpectedEof { offset, .. }
            | DumpError::SchemaViolation { offset, .. }
            | DumpError::Io { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("fetch deadline exceeded")]
    DeadlineExceeded,

    #[error("fetch task cancelled: {0}")]
    Cancelled(String),
}
