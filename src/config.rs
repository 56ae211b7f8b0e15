//! Verifier configuration file.
//!
//! Either one verifier object or an array of them:
//!
//! ```json
//! {
//!     "name": "notation-1",
//!     "trustPolicyDoc": { "version": "1.0", "trustPolicies": [ ... ] },
//!     "trustStorePath": "/etc/ratify/certs"
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{RatifyError, Result};
use crate::verifier::notation::policy::TrustPolicyDocument;
use crate::verifier::notation::truststore::X509TrustStore;
use crate::verifier::notation::{NotationVerifier, NotationVerifierOptions};
use crate::verifier::Verifier;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotationVerifierConfig {
    pub name: String,
    pub trust_policy_doc: TrustPolicyDocument,
    pub trust_store_path: PathBuf,
}

/// Parse a configuration document into one entry per verifier.
pub fn parse_config(bytes: &[u8]) -> Result<Vec<NotationVerifierConfig>> {
    let parse_error = |e: serde_json::Error| RatifyError::ConfigParse(e.to_string());

    let value: Value = serde_json::from_slice(bytes).map_err(parse_error)?;
    let configs: Vec<NotationVerifierConfig> = if value.is_array() {
        serde_json::from_value(value).map_err(parse_error)?
    } else {
        vec![serde_json::from_value(value).map_err(parse_error)?]
    };

    if configs.is_empty() {
        return Err(RatifyError::ConfigParse(
            "no verifiers are configured".to_string(),
        ));
    }
    let mut names = HashSet::new();
    for config in &configs {
        if config.name.trim().is_empty() {
            return Err(RatifyError::ConfigParse(
                "verifier name must not be empty".to_string(),
            ));
        }
        if !names.insert(config.name.as_str()) {
            return Err(RatifyError::ConfigParse(format!(
                "verifier name {:?} is used more than once",
                config.name
            )));
        }
    }
    Ok(configs)
}

/// Read the configuration at `path` and construct its verifiers.
pub fn load_verifiers(path: &Path) -> Result<Vec<Box<dyn Verifier>>> {
    let bytes = fs::read(path)?;
    let configs = parse_config(&bytes)?;
    debug!(path = %path.display(), count = configs.len(), "loaded verifier configuration");

    let mut verifiers: Vec<Box<dyn Verifier>> = Vec::with_capacity(configs.len());
    for config in configs {
        let trust_store = X509TrustStore::open(&config.trust_store_path)?;
        let verifier = NotationVerifier::new(NotationVerifierOptions {
            name: config.name,
            trust_policy_doc: config.trust_policy_doc,
            trust_store,
        })?;
        info!(verifier = verifier.name(), "verifier ready");
        verifiers.push(Box::new(verifier));
    }
    Ok(verifiers)
}
