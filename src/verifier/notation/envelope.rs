//! Notation JWS signature envelopes.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use super::truststore::TrustStoreType;
use super::x509::verifying_key;
use crate::crypto::{decode_base64, decode_base64_url, parse_signature, verify_signature};
use crate::oci::Descriptor;

pub const MEDIA_TYPE_JWS: &str = "application/jose+json";
pub const MEDIA_TYPE_COSE: &str = "application/cose";
pub const MEDIA_TYPE_PAYLOAD: &str = "application/vnd.cncf.notary.payload.v1+json";

const HEADER_SIGNING_SCHEME: &str = "io.cncf.notary.signingScheme";
const HEADER_EXPIRY: &str = "io.cncf.notary.expiry";
const HEADER_AUTHENTIC_SIGNING_TIME: &str = "io.cncf.notary.authenticSigningTime";
const HEADER_VERIFICATION_PLUGIN: &str = "io.cncf.notary.verificationPlugin";
const HEADER_VERIFICATION_PLUGIN_MIN_VERSION: &str = "io.cncf.notary.verificationPluginMinVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningScheme {
    X509,
    X509SigningAuthority,
}

impl SigningScheme {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "notary.x509" => Ok(SigningScheme::X509),
            "notary.x509.signingAuthority" => Ok(SigningScheme::X509SigningAuthority),
            other => bail!("unsupported signing scheme {other:?}"),
        }
    }

    /// Which trust store type anchors signatures of this scheme.
    pub fn trust_store_type(self) -> TrustStoreType {
        match self {
            SigningScheme::X509 => TrustStoreType::Ca,
            SigningScheme::X509SigningAuthority => TrustStoreType::SigningAuthority,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    payload: String,
    protected: String,
    #[serde(default)]
    header: UnprotectedHeader,
    signature: String,
}

#[derive(Deserialize, Default)]
struct UnprotectedHeader {
    #[serde(default)]
    x5c: Vec<String>,
    #[serde(rename = "io.cncf.notary.signingAgent")]
    signing_agent: Option<String>,
}

#[derive(Deserialize)]
struct ProtectedHeader {
    alg: String,
    cty: String,
    #[serde(default)]
    crit: Vec<String>,
    #[serde(rename = "io.cncf.notary.signingScheme")]
    signing_scheme: String,
    #[serde(rename = "io.cncf.notary.signingTime")]
    signing_time: Option<String>,
    #[serde(rename = "io.cncf.notary.authenticSigningTime")]
    authentic_signing_time: Option<String>,
    #[serde(rename = "io.cncf.notary.expiry")]
    expiry: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    target_artifact: Descriptor,
}

/// A parsed envelope. Nothing about it is trusted until
/// [`SignatureEnvelope::verify_integrity`] succeeds.
#[derive(Debug)]
pub struct SignatureEnvelope {
    pub signing_scheme: SigningScheme,
    pub signing_time: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub signing_agent: Option<String>,
    pub target_artifact: Descriptor,
    /// Leaf first.
    pub cert_chain: Vec<Certificate>,
    signing_input: Vec<u8>,
    signature: Vec<u8>,
}

impl SignatureEnvelope {
    pub fn parse(media_type: &str, bytes: &[u8]) -> Result<Self> {
        match media_type {
            MEDIA_TYPE_JWS => {}
            MEDIA_TYPE_COSE => bail!("COSE signature envelopes are not supported"),
            other => bail!("unsupported signature envelope type {other:?}"),
        }

        let raw: RawEnvelope = serde_json::from_slice(bytes).context("malformed JWS envelope")?;
        let header: ProtectedHeader = serde_json::from_slice(&decode_base64_url(&raw.protected)?)
            .context("malformed JWS protected header")?;

        if header.alg != "ES256" {
            bail!("unsupported signature algorithm {:?}", header.alg);
        }
        if header.cty != MEDIA_TYPE_PAYLOAD {
            bail!("unexpected payload content type {:?}", header.cty);
        }
        check_critical_headers(&header)?;

        let signing_scheme = SigningScheme::parse(&header.signing_scheme)?;
        let signing_time = match signing_scheme {
            SigningScheme::X509 => header.signing_time.as_deref(),
            SigningScheme::X509SigningAuthority => header.authentic_signing_time.as_deref(),
        }
        .ok_or_else(|| anyhow!("signature envelope has no signing time"))
        .and_then(parse_time)?;
        let expiry = header.expiry.as_deref().map(parse_time).transpose()?;

        let payload: Payload = serde_json::from_slice(&decode_base64_url(&raw.payload)?)
            .context("malformed signature payload")?;

        let cert_chain = raw
            .header
            .x5c
            .iter()
            .enumerate()
            .map(|(i, encoded)| {
                let der = decode_base64(encoded)?;
                Certificate::from_der(&der).map_err(|e| anyhow!("x5c certificate {i}: {e}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if cert_chain.is_empty() {
            bail!("signature envelope carries no certificate chain");
        }

        Ok(Self {
            signing_scheme,
            signing_time,
            expiry,
            signing_agent: raw.header.signing_agent,
            target_artifact: payload.target_artifact,
            cert_chain,
            signing_input: format!("{}.{}", raw.protected, raw.payload).into_bytes(),
            signature: decode_base64_url(&raw.signature)?,
        })
    }

    pub fn leaf(&self) -> &Certificate {
        &self.cert_chain[0]
    }

    /// Check the signature over the protected header and payload with the leaf key.
    pub fn verify_integrity(&self) -> Result<()> {
        let key = verifying_key(self.leaf())?;
        let signature = parse_signature(&self.signature)?;
        if !verify_signature(&key, &self.signing_input, &signature) {
            bail!("signature does not match the envelope content and signing certificate");
        }
        Ok(())
    }
}

fn check_critical_headers(header: &ProtectedHeader) -> Result<()> {
    if !header.crit.iter().any(|h| h == HEADER_SIGNING_SCHEME) {
        bail!("protected header must mark {HEADER_SIGNING_SCHEME} as critical");
    }
    for name in &header.crit {
        match name.as_str() {
            HEADER_SIGNING_SCHEME => {}
            HEADER_EXPIRY if header.expiry.is_some() => {}
            HEADER_AUTHENTIC_SIGNING_TIME if header.authentic_signing_time.is_some() => {}
            HEADER_VERIFICATION_PLUGIN | HEADER_VERIFICATION_PLUGIN_MIN_VERSION => {
                bail!("signature requires a verification plugin, which is not supported")
            }
            other => bail!("unsupported or missing critical header {other:?}"),
        }
    }
    if header.expiry.is_some() && !header.crit.iter().any(|h| h == HEADER_EXPIRY) {
        bail!("protected header must mark {HEADER_EXPIRY} as critical");
    }
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {raw:?}"))
}
