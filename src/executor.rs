//! Validation executor.
//!
//! Resolves the subject, walks the graph of artifacts referring to it and
//! runs every applicable verifier on each of them. The outcome is a tree of
//! [`ValidationReport`]s mirroring the referrer graph; a [`PolicyEnforcer`]
//! turns that tree into the final verdict.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{RatifyError, Result};
use crate::oci::{Descriptor, Digest};
use crate::reference::Reference;
use crate::store::Store;
use crate::verifier::{is_cancelled, VerificationResult, Verifier, VerifyOptions};

/// How many referrer levels below the subject are evaluated.
pub const DEFAULT_MAX_DEPTH: usize = 8;

const DESCRIPTION_VERIFIER_ERROR: &str = "Verifier could not evaluate the artifact";

pub struct ValidateArtifactOptions {
    /// Reference of the subject, including a tag or digest.
    pub subject: String,
}

/// Verdict on the subject plus the per-referrer evidence behind it.
#[derive(Debug)]
pub struct ValidationResult {
    pub succeeded: bool,
    pub artifact_reports: Vec<ValidationReport>,
}

/// One referrer of a subject, with its verification results and its own referrers.
#[derive(Debug)]
pub struct ValidationReport {
    /// The artifact this one refers to.
    pub subject: String,
    pub artifact: Descriptor,
    pub results: Vec<VerificationResult>,
    pub artifact_reports: Vec<ValidationReport>,
}

impl ValidationReport {
    pub fn artifact_type(&self) -> &str {
        self.artifact.artifact_type()
    }

    /// At least one result, every result passed, every child report passed.
    pub fn succeeded(&self) -> bool {
        !self.results.is_empty()
            && self.results.iter().all(VerificationResult::succeeded)
            && self.artifact_reports.iter().all(ValidationReport::succeeded)
    }
}

/// Decides the overall verdict from the report tree.
pub trait PolicyEnforcer: Send + Sync {
    fn evaluate(&self, reports: &[ValidationReport]) -> bool;
}

/// Passes only when there is evidence and all of it passed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllMustPass;

impl PolicyEnforcer for AllMustPass {
    fn evaluate(&self, reports: &[ValidationReport]) -> bool {
        !reports.is_empty() && reports.iter().all(ValidationReport::succeeded)
    }
}

pub struct Executor {
    store: Box<dyn Store>,
    verifiers: Vec<Box<dyn Verifier>>,
    policy: Box<dyn PolicyEnforcer>,
    max_depth: usize,
}

impl Executor {
    /// `policy` defaults to [`AllMustPass`].
    pub fn new(
        store: Box<dyn Store>,
        verifiers: Vec<Box<dyn Verifier>>,
        policy: Option<Box<dyn PolicyEnforcer>>,
    ) -> Result<Self> {
        if verifiers.is_empty() {
            return Err(RatifyError::Executor(
                "at least one verifier is required".to_string(),
            ));
        }
        Ok(Self {
            store,
            verifiers,
            policy: policy.unwrap_or_else(|| Box::new(AllMustPass)),
            max_depth: DEFAULT_MAX_DEPTH,
        })
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn validate_artifact(
        &self,
        cancel: &CancelToken,
        opts: &ValidateArtifactOptions,
    ) -> Result<ValidationResult> {
        let reference = Reference::parse(&opts.subject)?;
        let target = reference
            .reference()
            .ok_or_else(|| RatifyError::InvalidReference {
                reference: opts.subject.clone(),
                reason: "a tag or digest is required".to_string(),
            })?;
        let repository = reference.repository_path();

        let subject = self.store.resolve(cancel, &repository, &target)?;
        info!(subject = %opts.subject, digest = %subject.digest, "resolved subject");

        let mut visited = HashSet::from([subject.digest.clone()]);
        let artifact_reports = self.validate_referrers(
            cancel,
            &repository,
            &opts.subject,
            &subject,
            1,
            &mut visited,
        )?;
        cancel.check()?;

        let succeeded = self.policy.evaluate(&artifact_reports);
        info!(
            subject = %opts.subject,
            referrers = artifact_reports.len(),
            succeeded,
            "validation finished"
        );
        Ok(ValidationResult {
            succeeded,
            artifact_reports,
        })
    }

    fn validate_referrers(
        &self,
        cancel: &CancelToken,
        repository: &str,
        subject_name: &str,
        subject: &Descriptor,
        depth: usize,
        visited: &mut HashSet<Digest>,
    ) -> Result<Vec<ValidationReport>> {
        let referrers = self.store.list_referrers(cancel, repository, subject)?;
        if referrers.is_empty() {
            return Ok(Vec::new());
        }
        if depth > self.max_depth {
            return Err(RatifyError::Executor(format!(
                "referrers of {repository}@{} are nested deeper than {} levels",
                subject.digest, self.max_depth
            )));
        }
        debug!(subject = subject_name, count = referrers.len(), depth, "found referrers");

        let mut reports = Vec::with_capacity(referrers.len());
        for artifact in referrers {
            if !visited.insert(artifact.digest.clone()) {
                warn!(
                    artifact = %artifact.digest,
                    subject = subject_name,
                    "artifact already evaluated, skipping repeated reference"
                );
                continue;
            }

            let results = self.verify_artifact(cancel, repository, subject, &artifact)?;
            let child_name = format!("{repository}@{}", artifact.digest);
            let artifact_reports = self.validate_referrers(
                cancel,
                repository,
                &child_name,
                &artifact,
                depth + 1,
                visited,
            )?;
            reports.push(ValidationReport {
                subject: subject_name.to_string(),
                artifact,
                results,
                artifact_reports,
            });
        }
        Ok(reports)
    }

    fn verify_artifact(
        &self,
        cancel: &CancelToken,
        repository: &str,
        subject: &Descriptor,
        artifact: &Descriptor,
    ) -> Result<Vec<VerificationResult>> {
        let opts = VerifyOptions {
            store: self.store.as_ref(),
            repository,
            subject,
            artifact,
        };

        let mut results = Vec::new();
        for verifier in self.verifiers.iter().filter(|v| v.verifiable(artifact)) {
            let result = match verifier.verify(cancel, &opts) {
                Ok(result) => result,
                Err(e) if is_cancelled(&e) => return Err(RatifyError::Cancelled),
                Err(e) => {
                    warn!(verifier = verifier.name(), artifact = %artifact.digest, "verifier error: {e:#}");
                    VerificationResult::failure(verifier.as_ref(), DESCRIPTION_VERIFIER_ERROR, e)
                }
            };
            cancel.check()?;
            results.push(result);
        }
        if results.is_empty() {
            debug!(
                artifact = %artifact.digest,
                artifact_type = artifact.artifact_type(),
                "no verifier applies to artifact"
            );
        }
        Ok(results)
    }
}
