//! X.509 certificate handling: loading, chain signatures, validity windows and
//! distinguished names.

use std::fmt;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use p256::ecdsa::VerifyingKey;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages};
use x509_cert::name::Name;
use x509_cert::Certificate;

use crate::crypto::{parse_der_signature, parse_public_key, verify_signature};

const ECDSA_WITH_SHA_256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");

/// Short names for the attribute types that show up in signing identities.
const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("2.5.4.6", "C"),
    ("2.5.4.8", "ST"),
    ("2.5.4.7", "L"),
    ("2.5.4.10", "O"),
    ("2.5.4.11", "OU"),
    ("2.5.4.3", "CN"),
    ("2.5.4.5", "SERIALNUMBER"),
    ("1.2.840.113549.1.9.1", "E"),
];

/// An ordered list of `KEY=value` attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinguishedName(Vec<(String, String)>);

impl DistinguishedName {
    /// Parse `C=US, ST=WA, O=Example`. Commas inside values are escaped as `\,`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut attributes: Vec<(String, String)> = Vec::new();
        for part in split_unescaped(raw) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow!("distinguished name {raw:?} has a malformed attribute {part:?}"))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim().replace("\\,", ",");
            if key.is_empty() || value.is_empty() {
                bail!("distinguished name {raw:?} has an empty attribute");
            }
            if attributes.iter().any(|(k, _)| *k == key) {
                bail!("distinguished name {raw:?} repeats attribute {key}");
            }
            attributes.push((key, value));
        }
        if attributes.is_empty() {
            bail!("distinguished name is empty");
        }
        Ok(Self(attributes))
    }

    pub fn from_name(name: &Name) -> Self {
        let mut attributes = Vec::new();
        for rdn in name.0.iter() {
            for atv in rdn.0.iter() {
                let oid = atv.oid.to_string();
                let key = ATTRIBUTE_NAMES
                    .iter()
                    .find(|(o, _)| *o == oid)
                    .map(|(_, k)| k.to_string())
                    .unwrap_or(oid);
                let value = String::from_utf8_lossy(atv.value.value()).into_owned();
                attributes.push((key, value));
            }
        }
        Self(attributes)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Every attribute of `self` is present with the same value in `other`.
    pub fn is_subset_of(&self, other: &DistinguishedName) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={}", v.replace(',', "\\,"))?;
        }
        Ok(())
    }
}

fn split_unescaped(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ',' if !escaped => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => escaped = false,
        }
    }
    parts.push(&raw[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Load one or more certificates from PEM or a single DER certificate.
pub fn load_certificates(bytes: &[u8]) -> Result<Vec<Certificate>> {
    let is_pem = bytes
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(5)
        .eq(b"-----".iter());
    if is_pem {
        Certificate::load_pem_chain(bytes).map_err(|e| anyhow!("invalid PEM certificate: {e}"))
    } else {
        Certificate::from_der(bytes)
            .map(|cert| vec![cert])
            .map_err(|e| anyhow!("invalid DER certificate: {e}"))
    }
}

pub fn subject(cert: &Certificate) -> DistinguishedName {
    DistinguishedName::from_name(&cert.tbs_certificate.subject)
}

pub fn issuer(cert: &Certificate) -> DistinguishedName {
    DistinguishedName::from_name(&cert.tbs_certificate.issuer)
}

/// The certificate's P-256 public key.
pub fn verifying_key(cert: &Certificate) -> Result<VerifyingKey> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    parse_public_key(spki.subject_public_key.raw_bytes())
        .with_context(|| format!("certificate {}", subject(cert)))
}

/// Check that `child` carries a valid ECDSA P-256/SHA-256 signature from `parent`.
fn verify_issued_by(child: &Certificate, parent: &Certificate) -> Result<()> {
    if child.signature_algorithm.oid != ECDSA_WITH_SHA_256 {
        bail!(
            "certificate {} uses unsupported signature algorithm {}",
            subject(child),
            child.signature_algorithm.oid
        );
    }
    let tbs = child
        .tbs_certificate
        .to_der()
        .context("re-encoding certificate")?;
    let signature = parse_der_signature(child.signature.raw_bytes())?;
    let key = verifying_key(parent)?;
    if !verify_signature(&key, &tbs, &signature) {
        bail!(
            "certificate {} is not signed by {}",
            subject(child),
            subject(parent)
        );
    }
    Ok(())
}

/// Verify a leaf-first chain link by link, including the root's self-signature.
///
/// Every certificate must also fit its position: the leaf is a code signing
/// certificate and everything above it is a CA allowed to issue at that depth.
pub fn verify_chain(chain: &[Certificate]) -> Result<()> {
    let root = chain.last().ok_or_else(|| anyhow!("certificate chain is empty"))?;
    for pair in chain.windows(2) {
        verify_issued_by(&pair[0], &pair[1])?;
    }
    verify_issued_by(root, root).context("chain does not end in a self-signed certificate")?;

    check_signing_certificate(&chain[0])?;
    for (i, ca) in chain.iter().enumerate().skip(1) {
        // CAs between this one and the leaf
        check_ca_certificate(ca, i - 1)?;
    }
    Ok(())
}

/// The leaf must be an end-entity certificate usable for code signing.
fn check_signing_certificate(cert: &Certificate) -> Result<()> {
    let constraints: Option<BasicConstraints> = extension(cert, BASIC_CONSTRAINTS)?;
    if constraints.is_some_and(|c| c.ca) {
        bail!("signing certificate {} is a CA certificate", subject(cert));
    }
    let usage: KeyUsage = extension(cert, KEY_USAGE)?
        .ok_or_else(|| anyhow!("signing certificate {} has no key usage", subject(cert)))?;
    if !usage.0.contains(KeyUsages::DigitalSignature) {
        bail!(
            "key usage of signing certificate {} does not include digitalSignature",
            subject(cert)
        );
    }
    let extended: ExtendedKeyUsage = extension(cert, EXTENDED_KEY_USAGE)?.ok_or_else(|| {
        anyhow!("signing certificate {} has no extended key usage", subject(cert))
    })?;
    if !extended.0.contains(&CODE_SIGNING) {
        bail!(
            "extended key usage of signing certificate {} does not include codeSigning",
            subject(cert)
        );
    }
    Ok(())
}

/// An issuing certificate must be a CA with `keyCertSign`, and its path
/// length constraint must allow `cas_below` CAs under it.
fn check_ca_certificate(cert: &Certificate, cas_below: usize) -> Result<()> {
    let constraints: BasicConstraints = extension(cert, BASIC_CONSTRAINTS)?
        .ok_or_else(|| anyhow!("certificate {} issues certificates but is not a CA", subject(cert)))?;
    if !constraints.ca {
        bail!("certificate {} issues certificates but is not a CA", subject(cert));
    }
    if let Some(max) = constraints.path_len_constraint {
        if cas_below > usize::from(max) {
            bail!(
                "certificate {} allows a path length of {max} but has {cas_below} CAs below it",
                subject(cert)
            );
        }
    }
    let usage: KeyUsage = extension(cert, KEY_USAGE)?
        .ok_or_else(|| anyhow!("CA certificate {} has no key usage", subject(cert)))?;
    if !usage.0.contains(KeyUsages::KeyCertSign) {
        bail!(
            "key usage of CA certificate {} does not include keyCertSign",
            subject(cert)
        );
    }
    Ok(())
}

/// Decode the extension `oid` of `cert`, if present.
fn extension<'a, T: Decode<'a>>(cert: &'a Certificate, oid: ObjectIdentifier) -> Result<Option<T>> {
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.extn_id == oid)
    else {
        return Ok(None);
    };
    T::from_der(ext.extn_value.as_bytes())
        .map(Some)
        .map_err(|e| anyhow!("certificate {} has a malformed extension {oid}: {e}", subject(cert)))
}

/// Fail unless `cert` is inside its validity window at `at`.
fn check_validity(cert: &Certificate, at: DateTime<Utc>) -> Result<()> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_unix_duration().as_secs() as i64;
    let not_after = validity.not_after.to_unix_duration().as_secs() as i64;
    let t = at.timestamp();
    if t < not_before {
        bail!(
            "certificate {} is not valid before {}",
            subject(cert),
            format_unix(not_before)
        );
    }
    if t > not_after {
        bail!(
            "certificate {} expired at {}",
            subject(cert),
            format_unix(not_after)
        );
    }
    Ok(())
}

pub fn check_chain_validity(chain: &[Certificate], at: DateTime<Utc>) -> Result<()> {
    chain.iter().try_for_each(|cert| check_validity(cert, at))
}

fn format_unix(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
