//! Verifier interface.
//!
//! A verifier evaluates one kind of evidence (for example notation
//! signatures) attached to a subject. The executor picks verifiers per
//! artifact through [`Verifier::verifiable`], so new kinds plug in without
//! touching it.

pub mod notation;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::RatifyError;
use crate::oci::Descriptor;
use crate::store::Store;

/// Everything a verifier needs to evaluate one referrer of a subject.
pub struct VerifyOptions<'a> {
    pub store: &'a dyn Store,
    pub repository: &'a str,
    pub subject: &'a Descriptor,
    pub artifact: &'a Descriptor,
}

/// One verifier's outcome on one artifact.
#[derive(Debug)]
pub struct VerificationResult {
    pub verifier_name: String,
    pub verifier_type: String,
    pub description: String,
    /// Structured information about a successful verification.
    pub detail: Option<Value>,
    /// Why the verification failed. `None` means it succeeded.
    pub error: Option<anyhow::Error>,
}

impl VerificationResult {
    pub fn success(verifier: &dyn Verifier, description: &str, detail: Option<Value>) -> Self {
        Self {
            verifier_name: verifier.name().to_string(),
            verifier_type: verifier.verifier_type().to_string(),
            description: description.to_string(),
            detail,
            error: None,
        }
    }

    pub fn failure(verifier: &dyn Verifier, description: &str, error: anyhow::Error) -> Self {
        Self {
            verifier_name: verifier.name().to_string(),
            verifier_type: verifier.verifier_type().to_string(),
            description: description.to_string(),
            detail: None,
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    fn verifier_type(&self) -> &str;

    /// Whether this verifier knows how to evaluate `artifact`.
    fn verifiable(&self, artifact: &Descriptor) -> bool;

    /// Evaluate `opts.artifact` as evidence for `opts.subject`.
    ///
    /// Trust failures are reported through [`VerificationResult::error`]. An
    /// `Err` is reserved for the verifier being unable to run at all; the
    /// executor records it as a failed result as well.
    fn verify(
        &self,
        cancel: &CancelToken,
        opts: &VerifyOptions<'_>,
    ) -> anyhow::Result<VerificationResult>;
}

/// Whether `err` was caused by cancellation rather than by the artifact.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RatifyError>(),
            Some(RatifyError::Cancelled)
        )
    })
}
