//! Errors raised while parsing shared domain values

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// Cluster id keys in configuration must parse as signed 64-bit integers
    #[error("Invalid cluster id '{input}': expected an integer")]
    InvalidClusterId { input: String },

    #[error("Unknown data domain '{name}'")]
    UnknownDomain { name: String },
}

pub type Result<T> = std::result::Result<T, TypesError>;
