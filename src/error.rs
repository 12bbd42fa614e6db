//! Error type shared by the ensemble and the spatial grid.

use thiserror::Error;

/// Errors surfaced by the core simulation types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Construction parameters that cannot describe a valid ensemble or grid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// `step` was called before the ensemble was seeded.
    #[error("ensemble must be seeded before stepping")]
    NotSeeded,
}

impl SimError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SimError::InvalidConfiguration(msg.into())
    }
}
