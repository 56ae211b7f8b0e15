//! Error types for ratify verification runs.
//!
//! Every variant here is an operational failure that ends the invocation.
//! Trust failures found while verifying an artifact are not errors: they are
//! recorded inside the verification report instead.

use std::path::PathBuf;

use thiserror::Error;

/// Operational errors with specific exit codes.
#[derive(Error, Debug)]
pub enum RatifyError {
    #[error("Invalid subject reference: {reference}, err: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("Store path does not exist: {}", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("Error creating store from {}: {reason}", path.display())]
    StoreInit { path: PathBuf, reason: String },

    #[error("A store is already registered for repository {repository}")]
    DuplicateStore { repository: String },

    #[error("No store is registered for repository {repository}")]
    UnknownRepository { repository: String },

    #[error("Invalid trust store {}: {reason}", path.display())]
    InvalidTrustStore { path: PathBuf, reason: String },

    #[error("Error loading verifier options: {0}")]
    ConfigParse(String),

    #[error("Error creating verifier {name}: {reason}")]
    VerifierInit { name: String, reason: String },

    #[error("Error validating artifact: {0}")]
    Executor(String),

    #[error("Artifact not found: {reference}")]
    ArtifactNotFound { reference: String },

    #[error("Content of {expected} does not match its descriptor: {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Verification interrupted")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RatifyError {
    /// Returns the exit code for this error.
    ///
    /// Code 2 is left to clap for usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            RatifyError::InvalidReference { .. } => 3,
            RatifyError::StoreNotFound { .. } => 4,
            RatifyError::StoreInit { .. } => 5,
            RatifyError::DuplicateStore { .. } => 6,
            RatifyError::UnknownRepository { .. } => 6,
            RatifyError::InvalidTrustStore { .. } => 7,
            RatifyError::ConfigParse(_) => 8,
            RatifyError::Json(_) => 8, // Config is the only JSON we parse fatally
            RatifyError::VerifierInit { .. } => 9,
            RatifyError::Executor(_) => 10,
            RatifyError::ArtifactNotFound { .. } => 10,
            RatifyError::DigestMismatch { .. } => 10,
            RatifyError::Io(_) => 11,
            RatifyError::Cancelled => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, RatifyError>;
