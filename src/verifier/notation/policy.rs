//! Notation trust policy documents.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::truststore::{valid_store_name, TrustStoreType};
use super::x509::DistinguishedName;
use crate::reference::Reference;

pub const POLICY_VERSION: &str = "1.0";

const WILDCARD: &str = "*";
const X509_SUBJECT_PREFIX: &str = "x509.subject";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicyDocument {
    pub version: String,
    pub trust_policies: Vec<TrustPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPolicy {
    pub name: String,
    pub registry_scopes: Vec<String>,
    pub signature_verification: SignatureVerification,
    #[serde(default)]
    pub trust_stores: Vec<String>,
    #[serde(default)]
    pub trusted_identities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureVerification {
    pub level: VerificationLevel,
    #[serde(
        rename = "override",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub overrides: BTreeMap<ValidationType, ValidationAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Strict,
    Permissive,
    Audit,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationType {
    Integrity,
    Authenticity,
    AuthenticTimestamp,
    Expiry,
    Revocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationAction {
    Enforce,
    Log,
    Skip,
}

/// Effective action for each validation after overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationActions {
    pub integrity: ValidationAction,
    pub authenticity: ValidationAction,
    pub authentic_timestamp: ValidationAction,
    pub expiry: ValidationAction,
    pub revocation: ValidationAction,
}

impl VerificationLevel {
    pub fn default_actions(self) -> ValidationActions {
        use ValidationAction::*;
        let [integrity, authenticity, authentic_timestamp, expiry, revocation] = match self {
            VerificationLevel::Strict => [Enforce; 5],
            VerificationLevel::Permissive => [Enforce, Enforce, Log, Log, Log],
            VerificationLevel::Audit => [Enforce, Log, Log, Log, Log],
            VerificationLevel::Skip => [Skip; 5],
        };
        ValidationActions {
            integrity,
            authenticity,
            authentic_timestamp,
            expiry,
            revocation,
        }
    }
}

/// A parsed `trustedIdentities` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedIdentity {
    Any,
    X509Subject(DistinguishedName),
}

impl TrustedIdentity {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim() == WILDCARD {
            return Ok(TrustedIdentity::Any);
        }
        let (kind, value) = raw
            .split_once(':')
            .ok_or_else(|| anyhow!("trusted identity {raw:?} is not of the form <type>:<value>"))?;
        if kind.trim() != X509_SUBJECT_PREFIX {
            bail!("trusted identity {raw:?} has unsupported type {:?}", kind.trim());
        }
        let dn = DistinguishedName::parse(value)
            .with_context(|| format!("trusted identity {raw:?}"))?;
        for required in ["C", "ST", "O"] {
            if dn.get(required).is_none() {
                bail!("trusted identity {raw:?} must contain C, ST and O attributes");
            }
        }
        Ok(TrustedIdentity::X509Subject(dn))
    }

    pub fn matches(&self, subject: &DistinguishedName) -> bool {
        match self {
            TrustedIdentity::Any => true,
            TrustedIdentity::X509Subject(dn) => dn.is_subset_of(subject),
        }
    }
}

/// Split `ca:acme` into its type and name.
pub fn parse_trust_store_ref(raw: &str) -> Result<(TrustStoreType, String)> {
    let (kind, name) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("trust store {raw:?} is not of the form <type>:<name>"))?;
    let kind: TrustStoreType = kind.parse()?;
    if !valid_store_name(name) {
        bail!("trust store {raw:?} has an invalid name");
    }
    Ok((kind, name.to_string()))
}

impl TrustPolicyDocument {
    pub fn validate(&self) -> Result<()> {
        if self.version != POLICY_VERSION {
            bail!(
                "trust policy document has unsupported version {:?}, expected {POLICY_VERSION:?}",
                self.version
            );
        }
        if self.trust_policies.is_empty() {
            bail!("trust policy document has no trust policies");
        }

        let mut names = HashSet::new();
        let mut scopes = HashSet::new();
        let mut wildcard_policies = 0;
        for policy in &self.trust_policies {
            if !names.insert(policy.name.as_str()) {
                bail!("multiple trust policies are named {:?}", policy.name);
            }
            policy
                .validate()
                .with_context(|| format!("trust policy {:?}", policy.name))?;
            for scope in &policy.registry_scopes {
                if scope == WILDCARD {
                    wildcard_policies += 1;
                } else if !scopes.insert(scope.as_str()) {
                    bail!("registry scope {scope:?} appears in more than one trust policy");
                }
            }
        }
        if wildcard_policies > 1 {
            bail!("only one trust policy may use the \"*\" registry scope");
        }
        Ok(())
    }

    /// The policy scoped to `repository`, falling back to the wildcard policy.
    pub fn policy_for(&self, repository: &str) -> Option<&TrustPolicy> {
        self.trust_policies
            .iter()
            .find(|p| p.registry_scopes.iter().any(|s| s == repository))
            .or_else(|| {
                self.trust_policies
                    .iter()
                    .find(|p| p.registry_scopes.iter().any(|s| s == WILDCARD))
            })
    }
}

impl TrustPolicy {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("trust policy name is empty");
        }
        self.validate_scopes()?;

        let verification = &self.signature_verification;
        if verification.level == VerificationLevel::Skip {
            if !verification.overrides.is_empty() {
                bail!("level \"skip\" cannot be combined with overrides");
            }
            if !self.trust_stores.is_empty() || !self.trusted_identities.is_empty() {
                bail!("level \"skip\" must not list trust stores or trusted identities");
            }
            return Ok(());
        }
        if verification
            .overrides
            .contains_key(&ValidationType::Integrity)
        {
            bail!("the integrity validation cannot be overridden");
        }

        if self.trust_stores.is_empty() {
            bail!("at least one trust store is required");
        }
        let mut seen = HashSet::new();
        for raw in &self.trust_stores {
            parse_trust_store_ref(raw)?;
            if !seen.insert(raw.as_str()) {
                bail!("trust store {raw:?} is listed twice");
            }
        }

        if self.trusted_identities.is_empty() {
            bail!("at least one trusted identity is required");
        }
        let identities = self.identities()?;
        if identities.len() > 1 && identities.contains(&TrustedIdentity::Any) {
            bail!("the \"*\" trusted identity must be the only entry");
        }
        Ok(())
    }

    fn validate_scopes(&self) -> Result<()> {
        if self.registry_scopes.is_empty() {
            bail!("at least one registry scope is required");
        }
        if self.registry_scopes.iter().any(|s| s == WILDCARD) {
            if self.registry_scopes.len() > 1 {
                bail!("the \"*\" registry scope must be the only scope of its policy");
            }
            return Ok(());
        }
        let mut seen = HashSet::new();
        for scope in &self.registry_scopes {
            let reference = Reference::parse(scope)
                .map_err(|e| anyhow!("registry scope {scope:?} is invalid: {e}"))?;
            if reference.reference().is_some() {
                bail!("registry scope {scope:?} must not carry a tag or digest");
            }
            if !seen.insert(scope.as_str()) {
                bail!("registry scope {scope:?} is listed twice");
            }
        }
        Ok(())
    }

    /// Default actions of the level with overrides applied.
    pub fn actions(&self) -> ValidationActions {
        let verification = &self.signature_verification;
        let mut actions = verification.level.default_actions();
        for (validation, action) in &verification.overrides {
            match validation {
                ValidationType::Integrity => {}
                ValidationType::Authenticity => actions.authenticity = *action,
                ValidationType::AuthenticTimestamp => actions.authentic_timestamp = *action,
                ValidationType::Expiry => actions.expiry = *action,
                ValidationType::Revocation => actions.revocation = *action,
            }
        }
        actions
    }

    pub fn store_refs(&self) -> Result<Vec<(TrustStoreType, String)>> {
        self.trust_stores
            .iter()
            .map(|s| parse_trust_store_ref(s))
            .collect()
    }

    pub fn identities(&self) -> Result<Vec<TrustedIdentity>> {
        self.trusted_identities
            .iter()
            .map(|s| TrustedIdentity::parse(s))
            .collect()
    }
}
