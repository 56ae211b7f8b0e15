//! The `verify` pipeline.
//!
//! Reference → store → verifiers → executor → rendered report. Each stage
//! completes before the next begins and any stage error ends the run.

use std::path::PathBuf;

use tracing::info;

use crate::cancel::CancelToken;
use crate::config::load_verifiers;
use crate::error::Result;
use crate::executor::{Executor, ValidateArtifactOptions};
use crate::reference::Reference;
use crate::report::{render, RenderedResult};
use crate::store::create_store;

/// Inputs of one verification run.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub subject: String,
    pub config_path: PathBuf,
    pub store_path: PathBuf,
}

/// Verify `request.subject` and return the rendered report.
///
/// Trust failures are part of the report; only operational failures are
/// returned as errors.
pub fn run_verify(cancel: &CancelToken, request: &VerifyRequest) -> Result<RenderedResult> {
    let reference = Reference::parse(&request.subject)?;
    let repository = reference.repository_path();

    let store = create_store(cancel, &request.store_path, &repository)?;
    let verifiers = load_verifiers(&request.config_path)?;
    info!(verifiers = verifiers.len(), "loaded verifiers");

    let executor = Executor::new(Box::new(store), verifiers, None)?;
    let result = executor.validate_artifact(
        cancel,
        &ValidateArtifactOptions {
            subject: request.subject.clone(),
        },
    )?;
    cancel.check()?;

    Ok(render(&result, &repository))
}
