//! Error types shared by every pipeline stage.
//!
//! Library code returns [`Error`]; the CLI layer wraps it in `anyhow` with
//! command-level context. The variants map one-to-one onto the propagation
//! policy of the pipeline:
//!
//! | Variant | Raised by | Effect |
//! |---------|-----------|--------|
//! | [`Error::NotFound`] | loader, extractor | aborts the command |
//! | [`Error::UnsupportedFormat`] | loader, extractor | file skipped, run continues |
//! | [`Error::Retrieval`] | indexer | aborts the current request |
//! | [`Error::InvalidMode`] | prompt assembler | aborts the current request |
//! | [`Error::Completion`] | completion client | aborts the current request |
//! | [`Error::Config`] | config, credentials, templates | aborts the process |

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required input path does not exist.
    #[error("not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// A source file could not be decoded as text or parsed as a Word document.
    #[error("unsupported format in {}: {reason}", .path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// Building or querying the index failed (including embedding API failures).
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The requested generation mode is not one of the known modes.
    #[error("invalid mode '{0}' (expected one of: question, job-description, case-study, case-study-assessment)")]
    InvalidMode(String),

    /// The chat-completion call failed (network, auth, rate limit, bad payload).
    #[error("completion failed: {0}")]
    Completion(String),

    /// Missing credential, invalid configuration or template registry.
    #[error("configuration error: {0}")]
    Config(String),

    /// A template failed to render.
    #[error("template error: {0}")]
    Template(String),

    /// The request carried no topic or question.
    #[error("empty input: enter a question, job role or case study topic")]
    EmptyInput,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn unsupported(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::UnsupportedFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that abort a single request but leave the process usable.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            Error::Retrieval(_)
                | Error::InvalidMode(_)
                | Error::Completion(_)
                | Error::Template(_)
                | Error::EmptyInput
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
