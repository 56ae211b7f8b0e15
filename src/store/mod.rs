//! Content stores.
//!
//! A [`Store`] answers the questions the executor and the verifiers ask about
//! a repository: resolve a tag or digest, list the artifacts that refer to a
//! subject, and fetch verified content. [`StoreMux`] routes those questions to
//! the store registered for the repository.

mod layout;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{RatifyError, Result};
use crate::oci::Descriptor;

pub use layout::OciStore;

/// Read access to artifacts of one or more repositories.
pub trait Store: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Resolve a tag or a digest string to the descriptor of a manifest.
    fn resolve(&self, cancel: &CancelToken, repository: &str, reference: &str)
        -> Result<Descriptor>;

    /// Artifacts whose manifest names `subject` as their subject, in a stable order.
    fn list_referrers(
        &self,
        cancel: &CancelToken,
        repository: &str,
        subject: &Descriptor,
    ) -> Result<Vec<Descriptor>>;

    /// Fetch content, verifying its size and digest against the descriptor.
    fn fetch(&self, cancel: &CancelToken, repository: &str, desc: &Descriptor) -> Result<Vec<u8>>;
}

/// Routing table from repository name to store.
pub struct StoreMux {
    name: String,
    stores: BTreeMap<String, Box<dyn Store>>,
}

impl StoreMux {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stores: BTreeMap::new(),
        }
    }

    /// Register `store` for an exact repository name.
    pub fn register(&mut self, repository: &str, store: Box<dyn Store>) -> Result<()> {
        if repository.is_empty() {
            return Err(RatifyError::Executor(
                "cannot register a store for an empty repository name".to_string(),
            ));
        }
        if self.stores.contains_key(repository) {
            return Err(RatifyError::DuplicateStore {
                repository: repository.to_string(),
            });
        }
        debug!(mux = %self.name, store = store.name(), repository, "registered store");
        self.stores.insert(repository.to_string(), store);
        Ok(())
    }

    fn route(&self, repository: &str) -> Result<&dyn Store> {
        self.stores
            .get(repository)
            .map(|s| s.as_ref())
            .ok_or_else(|| RatifyError::UnknownRepository {
                repository: repository.to_string(),
            })
    }
}

impl Store for StoreMux {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        cancel: &CancelToken,
        repository: &str,
        reference: &str,
    ) -> Result<Descriptor> {
        self.route(repository)?.resolve(cancel, repository, reference)
    }

    fn list_referrers(
        &self,
        cancel: &CancelToken,
        repository: &str,
        subject: &Descriptor,
    ) -> Result<Vec<Descriptor>> {
        self.route(repository)?
            .list_referrers(cancel, repository, subject)
    }

    fn fetch(&self, cancel: &CancelToken, repository: &str, desc: &Descriptor) -> Result<Vec<u8>> {
        self.route(repository)?.fetch(cancel, repository, desc)
    }
}

/// Build a store from a layout directory or tar file and mount it for `repository`.
pub fn create_store(cancel: &CancelToken, store_path: &Path, repository: &str) -> Result<StoreMux> {
    let metadata = match fs::metadata(store_path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RatifyError::StoreNotFound {
                path: store_path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(RatifyError::StoreInit {
                path: store_path.to_path_buf(),
                reason: format!("error checking store path: {e}"),
            })
        }
    };

    let store = if metadata.is_dir() {
        OciStore::from_dir(cancel, "store", store_path)?
    } else {
        OciStore::from_tar(cancel, "store", store_path)?
    };
    info!(
        path = %store_path.display(),
        repository,
        manifests = store.manifest_count(),
        "opened OCI layout store"
    );

    let mut mux = StoreMux::new("multiplexer");
    mux.register(repository, Box::new(store))?;
    Ok(mux)
}
