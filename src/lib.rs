//! Ratify CLI
//!
//! Verifies the supply-chain evidence attached to container artifacts.
//!
//! An artifact reference is resolved in a local OCI image layout (a directory
//! or a tar of one). Every artifact that refers to it, such as a notation
//! signature, is checked by the configured verifiers, and the outcome is a
//! tree of reports mirroring the referrer graph.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use ratify_cli::{run_verify, CancelToken, VerifyRequest};
//!
//! let request = VerifyRequest {
//!     subject: "registry.example.com/app:v1".to_string(),
//!     config_path: PathBuf::from("config.json"),
//!     store_path: PathBuf::from("layout.tar"),
//! };
//! let report = run_verify(&CancelToken::new(), &request)?;
//! println!("succeeded: {}", report.succeeded);
//! # Ok::<(), ratify_cli::RatifyError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod oci;
pub mod reference;
pub mod report;
pub mod store;
pub mod verifier;
pub mod verify;

#[cfg(test)]
mod testutil;

pub use cancel::CancelToken;
pub use error::{RatifyError, Result};
pub use executor::{AllMustPass, Executor, PolicyEnforcer, ValidationReport, ValidationResult};
pub use reference::Reference;
pub use report::{render, to_json, RenderedResult};
pub use verify::{run_verify, VerifyRequest};
