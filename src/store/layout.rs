//! OCI image layout store.
//!
//! The layout is indexed once when the store is opened: tags come from the
//! `index.json` annotations and every reachable manifest with a `subject` is
//! recorded as a referrer of that subject. Blob content is read on demand and
//! checked against its descriptor on every read.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tar::Archive;
use tracing::{debug, trace};

use super::Store;
use crate::cancel::CancelToken;
use crate::error::{RatifyError, Result};
use crate::oci::{
    Descriptor, Digest, ImageLayout, Index, Manifest, ANNOTATION_REF_NAME, IMAGE_LAYOUT_VERSION,
};

/// Where layout files come from.
trait LayoutSource: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Reads lazily from a directory tree.
struct DirSource {
    root: PathBuf,
}

impl LayoutSource for DirSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(path))
    }
}

/// Holds every regular file of a tar archive in memory.
///
/// The whole archive is loaded up front, so very large archives should be
/// unpacked and opened as a directory instead.
struct TarSource {
    files: HashMap<String, Vec<u8>>,
}

impl TarSource {
    fn load(cancel: &CancelToken, path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive = Archive::new(BufReader::new(file));
        let mut files = HashMap::new();

        for entry in archive.entries()? {
            cancel.check()?;
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = normalize_entry_path(&entry.path()?)?;
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            trace!(entry = %name, size = data.len(), "loaded tar entry");
            files.insert(name, data);
        }

        Ok(Self { files })
    }
}

impl LayoutSource for TarSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{path} not found in archive"))
        })
    }
}

/// Turn `./blobs/sha256/x` into `blobs/sha256/x`, refusing paths that escape the root.
fn normalize_entry_path(path: &Path) -> io::Result<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry {} escapes the layout root", path.display()),
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Only the field needed to classify a manifest blob that `index.json` does not list.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeProbe {
    media_type: Option<String>,
}

/// A read-only store over an OCI image layout.
pub struct OciStore {
    name: String,
    source: Box<dyn LayoutSource>,
    tags: BTreeMap<String, Descriptor>,
    manifests: HashMap<Digest, Descriptor>,
    referrers: HashMap<Digest, Vec<Descriptor>>,
}

impl OciStore {
    /// Open a layout directory. Content is read lazily.
    pub fn from_dir(cancel: &CancelToken, name: &str, root: &Path) -> Result<Self> {
        let source = DirSource {
            root: root.to_path_buf(),
        };
        Self::open(cancel, name, root, Box::new(source)).map_err(|e| init_error(root, e))
    }

    /// Open a tar archive of a layout, reading it fully into memory.
    pub fn from_tar(cancel: &CancelToken, name: &str, path: &Path) -> Result<Self> {
        TarSource::load(cancel, path)
            .and_then(|source| Self::open(cancel, name, path, Box::new(source)))
            .map_err(|e| init_error(path, e))
    }

    fn open(
        cancel: &CancelToken,
        name: &str,
        origin: &Path,
        source: Box<dyn LayoutSource>,
    ) -> Result<Self> {
        let layout: ImageLayout = read_json(source.as_ref(), origin, "oci-layout")?;
        if layout.image_layout_version != IMAGE_LAYOUT_VERSION {
            return Err(RatifyError::StoreInit {
                path: origin.to_path_buf(),
                reason: format!(
                    "unsupported image layout version {:?}",
                    layout.image_layout_version
                ),
            });
        }
        let index: Index = read_json(source.as_ref(), origin, "index.json")?;

        let mut store = Self {
            name: name.to_string(),
            source,
            tags: BTreeMap::new(),
            manifests: HashMap::new(),
            referrers: HashMap::new(),
        };

        for desc in &index.manifests {
            if let Some(tag) = desc.annotations.get(ANNOTATION_REF_NAME) {
                store.tags.insert(tag.clone(), desc.clone());
            }
        }

        // Depth-first in index order so referrer lists come out in a stable order.
        let mut seen = HashSet::new();
        let mut stack: Vec<Descriptor> = index.manifests.into_iter().rev().collect();
        while let Some(desc) = stack.pop() {
            cancel.check()?;
            if !seen.insert(desc.digest.clone()) {
                continue;
            }

            if desc.is_index() {
                let child: Index = parse_blob(&store.read_blob(&desc)?, &desc)?;
                stack.extend(child.manifests.into_iter().rev());
                store.manifests.insert(desc.digest.clone(), desc);
            } else if desc.is_manifest() {
                let manifest: Manifest = parse_blob(&store.read_blob(&desc)?, &desc)?;
                if let Some(subject) = &manifest.subject {
                    store
                        .referrers
                        .entry(subject.digest.clone())
                        .or_default()
                        .push(referrer_descriptor(&desc, &manifest));
                }
                store.manifests.insert(desc.digest.clone(), desc);
            } else {
                debug!(
                    digest = %desc.digest,
                    media_type = %desc.media_type,
                    "skipping non-manifest entry in layout index"
                );
            }
        }

        Ok(store)
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    /// Every manifest reachable from `index.json`, sorted by digest.
    pub fn manifests(&self) -> Vec<&Descriptor> {
        let mut all: Vec<&Descriptor> = self.manifests.values().collect();
        all.sort_by(|a, b| a.digest.cmp(&b.digest));
        all
    }

    /// Tag names, sorted.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.keys().map(String::as_str)
    }

    fn read_blob(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let content = self
            .source
            .read(&desc.digest.blob_path())
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => RatifyError::ArtifactNotFound {
                    reference: desc.digest.to_string(),
                },
                _ => RatifyError::Io(e),
            })?;

        if content.len() as u64 != desc.size {
            return Err(RatifyError::DigestMismatch {
                expected: desc.digest.to_string(),
                actual: format!("size {} instead of {}", content.len(), desc.size),
            });
        }
        if !desc.digest.matches(&content) {
            return Err(RatifyError::DigestMismatch {
                expected: desc.digest.to_string(),
                actual: "content hash differs".to_string(),
            });
        }
        Ok(content)
    }

    /// Describe a manifest blob that exists in the layout without being indexed.
    fn probe_manifest(&self, digest: &Digest) -> Option<Descriptor> {
        let content = self.source.read(&digest.blob_path()).ok()?;
        if !digest.matches(&content) {
            return None;
        }
        let probe: MediaTypeProbe = serde_json::from_slice(&content).ok()?;
        let mut desc = Descriptor::for_content(&probe.media_type?, &content);
        desc.digest = digest.clone();
        (desc.is_manifest() || desc.is_index()).then_some(desc)
    }
}

impl Store for OciStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(
        &self,
        cancel: &CancelToken,
        repository: &str,
        reference: &str,
    ) -> Result<Descriptor> {
        cancel.check()?;
        let not_found = || RatifyError::ArtifactNotFound {
            reference: format!("{repository}@{reference}"),
        };

        match reference.parse::<Digest>() {
            Ok(digest) => self
                .manifests
                .get(&digest)
                .cloned()
                .or_else(|| self.probe_manifest(&digest))
                .ok_or_else(not_found),
            Err(_) => self.tags.get(reference).cloned().ok_or_else(not_found),
        }
    }

    fn list_referrers(
        &self,
        cancel: &CancelToken,
        _repository: &str,
        subject: &Descriptor,
    ) -> Result<Vec<Descriptor>> {
        cancel.check()?;
        Ok(self
            .referrers
            .get(&subject.digest)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch(&self, cancel: &CancelToken, _repository: &str, desc: &Descriptor) -> Result<Vec<u8>> {
        cancel.check()?;
        self.read_blob(desc)
    }
}

/// The descriptor a referrers listing reports for `manifest`.
fn referrer_descriptor(desc: &Descriptor, manifest: &Manifest) -> Descriptor {
    Descriptor {
        media_type: desc.media_type.clone(),
        digest: desc.digest.clone(),
        size: desc.size,
        artifact_type: Some(manifest.effective_artifact_type().to_string()),
        annotations: manifest.annotations.clone(),
    }
}

fn read_json<T: DeserializeOwned>(
    source: &dyn LayoutSource,
    origin: &Path,
    file: &str,
) -> Result<T> {
    let init = |reason: String| RatifyError::StoreInit {
        path: origin.to_path_buf(),
        reason,
    };
    let content = source
        .read(file)
        .map_err(|e| init(format!("reading {file}: {e}")))?;
    serde_json::from_slice(&content).map_err(|e| init(format!("parsing {file}: {e}")))
}

fn parse_blob<T: DeserializeOwned>(content: &[u8], desc: &Descriptor) -> Result<T> {
    serde_json::from_slice(content).map_err(|e| RatifyError::StoreInit {
        path: PathBuf::from(desc.digest.blob_path()),
        reason: format!("parsing {}: {e}", desc.media_type),
    })
}

fn init_error(path: &Path, err: RatifyError) -> RatifyError {
    match err {
        RatifyError::Cancelled => RatifyError::Cancelled,
        RatifyError::StoreInit { path: inner, reason } if inner.as_path() == path => {
            RatifyError::StoreInit { path: inner, reason }
        }
        other => RatifyError::StoreInit {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}
