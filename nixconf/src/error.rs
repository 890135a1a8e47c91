//! Crate-level error type.

use std::{io, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::{
    attribute::{Attribute, MalformedAttributeError},
    definition::{EvaluationError, SerializationError},
    types::UnsupportedTypeError,
};

/// Errors produced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A dot-path could not be parsed.
    #[error(transparent)]
    MalformedAttribute(#[from] MalformedAttributeError),

    /// A schema type description is not understood.
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedTypeError),

    /// An expression failed to evaluate.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// A value could not be written as an expression.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// An edit could not be serialized; nothing was written.
    #[error("cannot write `{attribute}`: {source}")]
    Apply {
        /// The edited attribute.
        attribute: Attribute,
        /// The serializer's reason.
        #[source]
        source: SerializationError,
    },

    /// A subprocess was killed after running past its deadline.
    #[error("`{program}` did not finish within {timeout:?}")]
    SubprocessTimeout {
        /// Program name.
        program: String,
        /// Configured deadline.
        timeout: Duration,
    },

    /// A subprocess exited unsuccessfully.
    #[error("`{program}` failed with {status}: {stderr}")]
    Subprocess {
        /// Program name.
        program: String,
        /// Exit status.
        status: ExitStatus,
        /// Captured standard error.
        stderr: String,
    },

    /// Configuration source text could not be parsed or edited.
    #[error("syntax error at byte {offset}: {message}")]
    Syntax {
        /// Byte offset into the source text.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// No schema option or open attribute set covers the attribute.
    #[error("no option covers `{0}`")]
    UnknownAttribute(Attribute),

    /// Editor configuration file with an unknown extension.
    #[error("unsupported config file extension: {0:?}")]
    UnsupportedFormat(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML decoding failure.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Result alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
