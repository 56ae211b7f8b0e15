//! X.509 trust store laid out as `truststore/x509/<type>/<name>/`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context};
use tracing::debug;
use x509_cert::Certificate;

use super::x509::load_certificates;
use crate::error::{RatifyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustStoreType {
    Ca,
    SigningAuthority,
    Tsa,
}

impl TrustStoreType {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustStoreType::Ca => "ca",
            TrustStoreType::SigningAuthority => "signingAuthority",
            TrustStoreType::Tsa => "tsa",
        }
    }
}

impl FromStr for TrustStoreType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "ca" => Ok(TrustStoreType::Ca),
            "signingAuthority" => Ok(TrustStoreType::SigningAuthority),
            "tsa" => Ok(TrustStoreType::Tsa),
            other => Err(anyhow!("unknown trust store type {other:?}")),
        }
    }
}

impl fmt::Display for TrustStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust store name: letters, digits, `_`, `.` and `-`.
pub fn valid_store_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[derive(Debug, Clone)]
pub struct X509TrustStore {
    root: PathBuf,
}

impl X509TrustStore {
    pub fn open(root: &Path) -> Result<Self> {
        let metadata = fs::metadata(root).map_err(|e| RatifyError::InvalidTrustStore {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(RatifyError::InvalidTrustStore {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All certificates of one named store, files read in name order.
    pub fn certificates(
        &self,
        store_type: TrustStoreType,
        name: &str,
    ) -> anyhow::Result<Vec<Certificate>> {
        if !valid_store_name(name) {
            bail!("invalid trust store name {name:?}");
        }
        let dir = self
            .root
            .join("truststore")
            .join("x509")
            .join(store_type.as_str())
            .join(name);

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("trust store {store_type}:{name} at {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut certs = Vec::new();
        for file in &files {
            let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
            let loaded =
                load_certificates(&bytes).with_context(|| format!("loading {}", file.display()))?;
            certs.extend(loaded);
        }
        if certs.is_empty() {
            bail!("trust store {store_type}:{name} has no certificates");
        }
        debug!(store = %format!("{store_type}:{name}"), count = certs.len(), "loaded trust store");
        Ok(certs)
    }
}
