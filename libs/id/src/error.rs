//! Errors produced while parsing ids.

use thiserror::Error;

/// Why a string could not be turned into a typed id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("id cannot be empty")]
    Empty,

    /// No `_` between prefix and ULID.
    #[error("id must look like '<prefix>_<ulid>'")]
    MissingSeparator,

    #[error("wrong id prefix: expected '{expected}', got '{actual}'")]
    WrongPrefix {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid ULID: {0}")]
    InvalidUlid(String),
}

impl IdError {
    /// True when the id belongs to a different resource type.
    pub fn is_wrong_resource(&self) -> bool {
        matches!(self, IdError::WrongPrefix { .. })
    }
}
