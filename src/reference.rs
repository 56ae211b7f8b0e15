//! Artifact reference parsing.
//!
//! Parses `<registry>/<repository>[:<tag>][@<digest>]` following the OCI
//! distribution grammar.

use std::fmt;

use crate::error::{RatifyError, Result};
use crate::oci::Digest;

const MAX_TAG_LEN: usize = 128;

/// A parsed registry artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
}

impl Reference {
    /// Parse a reference string.
    ///
    /// When both a tag and a digest are given, the digest is authoritative and
    /// the tag is kept for display only.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| RatifyError::InvalidReference {
            reference: raw.to_string(),
            reason,
        };

        let (registry, path) = raw
            .split_once('/')
            .ok_or_else(|| invalid("missing registry or repository".to_string()))?;
        validate_registry(registry).map_err(invalid)?;

        let (name, digest) = match path.split_once('@') {
            Some((name, digest)) => (name, Some(digest.parse::<Digest>().map_err(invalid)?)),
            None => (path, None),
        };

        let (repository, tag) = match name.split_once(':') {
            Some((repository, tag)) => {
                validate_tag(tag).map_err(invalid)?;
                (repository, Some(tag.to_string()))
            }
            None => (name, None),
        };
        validate_repository(repository).map_err(invalid)?;

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// `registry/repository`, the key stores are registered under.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// The part used to resolve the artifact: digest if present, else tag.
    pub fn reference(&self) -> Option<String> {
        self.digest
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| self.tag.clone())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn validate_registry(registry: &str) -> std::result::Result<(), String> {
    if registry.is_empty() {
        return Err("missing registry".to_string());
    }

    let (host, port) = if let Some(rest) = registry.strip_prefix('[') {
        let (addr, after) = rest
            .split_once(']')
            .ok_or_else(|| format!("invalid registry {registry:?}: unterminated IPv6 literal"))?;
        if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit() || b == b':') {
            return Err(format!("invalid registry {registry:?}: bad IPv6 literal"));
        }
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| format!("invalid registry {registry:?}"))?,
            ),
        };
        (None, port)
    } else {
        match registry.rsplit_once(':') {
            Some((host, port)) => (Some(host), Some(port)),
            None => (Some(registry), None),
        }
    };

    if let Some(host) = host {
        let labels_ok = !host.is_empty()
            && host.split('.').all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            });
        if !labels_ok {
            return Err(format!("invalid registry host {host:?}"));
        }
    }
    if let Some(port) = port {
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) || port.parse::<u16>().is_err()
        {
            return Err(format!("invalid registry port {port:?}"));
        }
    }
    Ok(())
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    if repository.is_empty() {
        return Err("missing repository".to_string());
    }
    if repository.split('/').all(valid_path_component) {
        Ok(())
    } else {
        Err(format!("invalid repository {repository:?}"))
    }
}

fn is_lower_alnum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn valid_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if is_lower_alnum(first) && is_lower_alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_lower_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_lower_alnum(bytes[i]) {
            if !matches!(bytes[i], b'.' | b'_' | b'-') {
                return false;
            }
            i += 1;
        }
        let separator = &component[start..i];
        let ok = matches!(separator, "." | "_" | "__") || separator.bytes().all(|b| b == b'-');
        if !ok {
            return false;
        }
    }
    true
}

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn validate_tag(tag: &str) -> std::result::Result<(), String> {
    let bytes = tag.as_bytes();
    let valid = match bytes.first() {
        Some(&first) => {
            (first.is_ascii_alphanumeric() || first == b'_')
                && bytes.len() <= MAX_TAG_LEN
                && bytes[1..]
                    .iter()
                    .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(format!("invalid tag {tag:?}"))
    }
}
