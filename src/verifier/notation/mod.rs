//! Notation signature verifier.
//!
//! Evaluates `application/vnd.cncf.notary.signature` artifacts: a manifest
//! whose first layer is a JWS envelope signed by an X.509 chain. The trust
//! policy selected for the repository decides which checks are enforced,
//! which are only logged and which are skipped. Integrity is always enforced.

pub mod envelope;
pub mod policy;
pub mod truststore;
pub mod x509;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use self::envelope::{SignatureEnvelope, SigningScheme};
use self::policy::{TrustPolicy, TrustPolicyDocument, ValidationAction, VerificationLevel};
use self::truststore::X509TrustStore;
use self::x509::{check_chain_validity, issuer, subject, verify_chain};
use super::{is_cancelled, VerificationResult, Verifier, VerifyOptions};
use crate::cancel::CancelToken;
use crate::error::{RatifyError, Result};
use crate::oci::{Descriptor, Manifest};

pub const VERIFIER_TYPE: &str = "notation";
pub const ARTIFACT_TYPE_SIGNATURE: &str = "application/vnd.cncf.notary.signature";

const DESCRIPTION_SUCCEEDED: &str = "Notation signature verification succeeded";
const DESCRIPTION_FAILED: &str = "Notation signature verification failed";
const DESCRIPTION_SKIPPED: &str = "Notation signature verification skipped";

pub struct NotationVerifierOptions {
    pub name: String,
    pub trust_policy_doc: TrustPolicyDocument,
    pub trust_store: X509TrustStore,
}

pub struct NotationVerifier {
    name: String,
    policy: TrustPolicyDocument,
    trust_store: X509TrustStore,
}

enum Outcome {
    Skipped,
    Verified(Value),
}

impl NotationVerifier {
    pub fn new(opts: NotationVerifierOptions) -> Result<Self> {
        opts.trust_policy_doc
            .validate()
            .map_err(|e| RatifyError::VerifierInit {
                name: opts.name.clone(),
                reason: format!("{e:#}"),
            })?;
        debug!(
            verifier = %opts.name,
            policies = opts.trust_policy_doc.trust_policies.len(),
            trust_store = %opts.trust_store.root().display(),
            "created notation verifier"
        );
        Ok(Self {
            name: opts.name,
            policy: opts.trust_policy_doc,
            trust_store: opts.trust_store,
        })
    }

    fn evaluate(&self, cancel: &CancelToken, opts: &VerifyOptions<'_>) -> anyhow::Result<Outcome> {
        let policy = self
            .policy
            .policy_for(opts.repository)
            .ok_or_else(|| anyhow!("no trust policy applies to {}", opts.repository))?;
        if policy.signature_verification.level == VerificationLevel::Skip {
            debug!(verifier = %self.name, policy = %policy.name, "verification level is skip");
            return Ok(Outcome::Skipped);
        }
        let actions = policy.actions();

        let manifest_bytes = opts
            .store
            .fetch(cancel, opts.repository, opts.artifact)
            .context("fetching signature manifest")?;
        let manifest: Manifest =
            serde_json::from_slice(&manifest_bytes).context("parsing signature manifest")?;
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| anyhow!("signature manifest has no layers"))?;
        let blob = opts
            .store
            .fetch(cancel, opts.repository, layer)
            .context("fetching signature envelope")?;
        cancel.check()?;

        let envelope = SignatureEnvelope::parse(&layer.media_type, &blob)?;
        debug!(
            verifier = %self.name,
            artifact = %opts.artifact.digest,
            signing_agent = envelope.signing_agent.as_deref().unwrap_or("unknown"),
            signing_time = %envelope.signing_time.to_rfc3339(),
            "parsed signature envelope"
        );
        envelope
            .verify_integrity()
            .and_then(|()| check_target(&envelope.target_artifact, opts.subject))
            .context("integrity check failed")?;

        let now = Utc::now();
        // A signing authority vouches for its signing time, a plain signer does not.
        let timestamp = match envelope.signing_scheme {
            SigningScheme::X509 => now,
            SigningScheme::X509SigningAuthority => envelope.signing_time,
        };
        self.apply(actions.authenticity, "authenticity", opts, || {
            self.check_authenticity(policy, &envelope)
        })?;
        self.apply(actions.authentic_timestamp, "authentic timestamp", opts, || {
            check_chain_validity(&envelope.cert_chain, timestamp)
        })?;
        self.apply(actions.expiry, "expiry", opts, || check_expiry(&envelope, now))?;
        if actions.revocation != ValidationAction::Skip {
            debug!(
                verifier = %self.name,
                "no revocation endpoints are consulted, certificates treated as not revoked"
            );
        }

        let leaf = envelope.leaf();
        Ok(Outcome::Verified(json!({
            "Issuer": issuer(leaf).to_string(),
            "SN": subject(leaf).to_string(),
        })))
    }

    /// Run one validation according to its action.
    fn apply(
        &self,
        action: ValidationAction,
        check: &str,
        opts: &VerifyOptions<'_>,
        run: impl FnOnce() -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        match action {
            ValidationAction::Skip => Ok(()),
            ValidationAction::Enforce => run().with_context(|| format!("{check} check failed")),
            ValidationAction::Log => {
                if let Err(e) = run() {
                    warn!(
                        verifier = %self.name,
                        artifact = %opts.artifact.digest,
                        "{check} check failed, continuing as the policy only logs it: {e:#}"
                    );
                }
                Ok(())
            }
        }
    }

    fn check_authenticity(
        &self,
        policy: &TrustPolicy,
        envelope: &SignatureEnvelope,
    ) -> anyhow::Result<()> {
        verify_chain(&envelope.cert_chain)?;

        let wanted = envelope.signing_scheme.trust_store_type();
        let root = envelope
            .cert_chain
            .last()
            .ok_or_else(|| anyhow!("certificate chain is empty"))?;
        let mut consulted = 0;
        let mut trusted = false;
        for (store_type, name) in policy.store_refs()? {
            if store_type != wanted {
                continue;
            }
            consulted += 1;
            if self.trust_store.certificates(store_type, &name)?.contains(root) {
                trusted = true;
                break;
            }
        }
        if consulted == 0 {
            bail!(
                "trust policy {:?} lists no {wanted} trust store for this signing scheme",
                policy.name
            );
        }
        if !trusted {
            bail!(
                "certificate chain of {} does not lead to a trusted root",
                subject(envelope.leaf())
            );
        }

        check_chain_validity(&envelope.cert_chain, envelope.signing_time)
            .context("certificate chain was not valid at signing time")?;

        let signer = subject(envelope.leaf());
        if !policy.identities()?.iter().any(|id| id.matches(&signer)) {
            bail!(
                "signing identity {signer} is not trusted by policy {:?}",
                policy.name
            );
        }
        Ok(())
    }
}

fn check_target(target: &Descriptor, subject: &Descriptor) -> anyhow::Result<()> {
    if target.digest != subject.digest {
        bail!(
            "signature is for {} but the subject is {}",
            target.digest,
            subject.digest
        );
    }
    if target.size != subject.size {
        bail!(
            "signed size {} does not match subject size {}",
            target.size,
            subject.size
        );
    }
    if target.media_type != subject.media_type {
        bail!(
            "signed media type {:?} does not match subject media type {:?}",
            target.media_type,
            subject.media_type
        );
    }
    Ok(())
}

fn check_expiry(envelope: &SignatureEnvelope, now: DateTime<Utc>) -> anyhow::Result<()> {
    match envelope.expiry {
        Some(expiry) if now > expiry => bail!("signature expired at {}", expiry.to_rfc3339()),
        _ => Ok(()),
    }
}

impl Verifier for NotationVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn verifier_type(&self) -> &str {
        VERIFIER_TYPE
    }

    fn verifiable(&self, artifact: &Descriptor) -> bool {
        artifact.artifact_type() == ARTIFACT_TYPE_SIGNATURE
    }

    fn verify(
        &self,
        cancel: &CancelToken,
        opts: &VerifyOptions<'_>,
    ) -> anyhow::Result<VerificationResult> {
        let result = match self.evaluate(cancel, opts) {
            Ok(Outcome::Skipped) => VerificationResult::success(self, DESCRIPTION_SKIPPED, None),
            Ok(Outcome::Verified(detail)) => {
                info!(verifier = %self.name, artifact = %opts.artifact.digest, "signature verified");
                VerificationResult::success(self, DESCRIPTION_SUCCEEDED, Some(detail))
            }
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                info!(
                    verifier = %self.name,
                    artifact = %opts.artifact.digest,
                    "signature rejected: {e:#}"
                );
                VerificationResult::failure(self, DESCRIPTION_FAILED, e)
            }
        };
        Ok(result)
    }
}
