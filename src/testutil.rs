//! Builders for OCI layouts and notation signatures used by unit tests.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL},
    Engine,
};
use chrono::{DateTime, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use serde_json::json;
use x509_cert::der::{Decode, Encode};
use x509_cert::Certificate;

use crate::oci::{
    Descriptor, ImageLayout, Index, Manifest, ANNOTATION_REF_NAME, IMAGE_LAYOUT_VERSION,
    MEDIA_TYPE_EMPTY_JSON, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};

pub const TRUSTED_ROOT: &str = include_str!("../tests/fixtures/trusted-root.crt");
pub const TRUSTED_LEAF: &str = include_str!("../tests/fixtures/trusted-leaf.crt");
pub const TRUSTED_LEAF_KEY: &str = include_str!("../tests/fixtures/trusted-leaf.key");
pub const ROGUE_ROOT: &str = include_str!("../tests/fixtures/rogue-root.crt");
pub const ROGUE_LEAF: &str = include_str!("../tests/fixtures/rogue-leaf.crt");
pub const ROGUE_LEAF_KEY: &str = include_str!("../tests/fixtures/rogue-leaf.key");
pub const INTERMEDIATE_CA: &str = include_str!("../tests/fixtures/intermediate-ca.crt");
pub const NESTED_CA: &str = include_str!("../tests/fixtures/nested-ca.crt");

// Leaves below share the key of TRUSTED_LEAF.
pub const INTERMEDIATE_LEAF: &str = include_str!("../tests/fixtures/intermediate-leaf.crt");
pub const NESTED_LEAF: &str = include_str!("../tests/fixtures/nested-leaf.crt");
/// Issued by TRUSTED_LEAF for `O=Victim Corp`.
pub const IMPOSTOR_LEAF: &str = include_str!("../tests/fixtures/impostor-leaf.crt");
/// serverAuth instead of codeSigning.
pub const SERVER_LEAF: &str = include_str!("../tests/fixtures/server-leaf.crt");
/// Valid during 2020 only.
pub const EXPIRED_LEAF: &str = include_str!("../tests/fixtures/expired-leaf.crt");

pub const NOTATION_SIGNATURE: &str = "application/vnd.cncf.notary.signature";

/// Accumulates blobs and index entries, then writes them as a directory or tar.
#[derive(Default)]
pub struct LayoutBuilder {
    blobs: BTreeMap<String, Vec<u8>>,
    index: Vec<Descriptor>,
}

impl LayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(&mut self, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = Descriptor::for_content(media_type, data);
        self.blobs.insert(desc.digest.blob_path(), data.to_vec());
        desc
    }

    /// Store an image manifest with an empty config and return its descriptor.
    pub fn manifest(
        &mut self,
        artifact_type: Option<&str>,
        subject: Option<&Descriptor>,
        layers: Vec<Descriptor>,
    ) -> Descriptor {
        let config = self.blob(MEDIA_TYPE_EMPTY_JSON, b"{}");
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
            artifact_type: artifact_type.map(str::to_string),
            config,
            layers,
            subject: subject.cloned(),
            annotations: BTreeMap::new(),
        };
        let bytes = serde_json::to_vec(&manifest).unwrap();
        self.blob(MEDIA_TYPE_IMAGE_MANIFEST, &bytes)
    }

    /// A plain single-layer image.
    pub fn image(&mut self, layer: &[u8]) -> Descriptor {
        let layer = self.blob("application/vnd.oci.image.layer.v1.tar", layer);
        self.manifest(None, None, vec![layer])
    }

    pub fn add_to_index(&mut self, desc: &Descriptor, tag: Option<&str>) {
        let mut entry = desc.clone();
        if let Some(tag) = tag {
            entry
                .annotations
                .insert(ANNOTATION_REF_NAME.to_string(), tag.to_string());
        }
        self.index.push(entry);
    }

    fn files(&self) -> Vec<(String, Vec<u8>)> {
        let layout = ImageLayout {
            image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
        };
        let index = Index {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_IMAGE_INDEX.to_string()),
            manifests: self.index.clone(),
            annotations: BTreeMap::new(),
        };
        let mut files = vec![
            ("oci-layout".to_string(), serde_json::to_vec(&layout).unwrap()),
            ("index.json".to_string(), serde_json::to_vec(&index).unwrap()),
        ];
        files.extend(self.blobs.iter().map(|(p, d)| (p.clone(), d.clone())));
        files
    }

    pub fn write_dir(&self, dir: &Path) {
        for (path, data) in self.files() {
            let target = dir.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, data).unwrap();
        }
    }

    pub fn write_tar(&self, path: &Path) {
        let mut builder = tar::Builder::new(File::create(path).unwrap());
        for (name, data) in self.files() {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("./{name}"), data.as_slice())
                .unwrap();
        }
        builder.finish().unwrap();
    }
}

/// Knobs for [`jws_envelope`].
pub struct SignOptions<'a> {
    pub key_pem: &'a str,
    pub chain_pem: Vec<&'a str>,
    pub signing_time: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub signing_scheme: &'a str,
    /// Flip a bit of the signature after signing.
    pub tamper: bool,
    /// Sign this descriptor instead of the subject the signature is attached to.
    pub target: Option<Descriptor>,
}

impl Default for SignOptions<'_> {
    fn default() -> Self {
        Self {
            key_pem: TRUSTED_LEAF_KEY,
            chain_pem: vec![TRUSTED_LEAF, TRUSTED_ROOT],
            signing_time: Utc::now(),
            expiry: None,
            signing_scheme: "notary.x509",
            tamper: false,
            target: None,
        }
    }
}

/// Build a JWS notation envelope over `subject`.
pub fn jws_envelope(subject: &Descriptor, opts: &SignOptions<'_>) -> Vec<u8> {
    let mut crit = vec!["io.cncf.notary.signingScheme"];
    let mut protected = json!({
        "alg": "ES256",
        "cty": "application/vnd.cncf.notary.payload.v1+json",
        "io.cncf.notary.signingScheme": opts.signing_scheme,
    });
    if opts.signing_scheme == "notary.x509.signingAuthority" {
        protected["io.cncf.notary.authenticSigningTime"] = json!(opts.signing_time.to_rfc3339());
        crit.push("io.cncf.notary.authenticSigningTime");
    } else {
        protected["io.cncf.notary.signingTime"] = json!(opts.signing_time.to_rfc3339());
    }
    if let Some(expiry) = opts.expiry {
        protected["io.cncf.notary.expiry"] = json!(expiry.to_rfc3339());
        crit.push("io.cncf.notary.expiry");
    }
    protected["crit"] = json!(crit);
    let payload = json!({ "targetArtifact": opts.target.as_ref().unwrap_or(subject) });

    let protected_b64 = BASE64_URL.encode(serde_json::to_vec(&protected).unwrap());
    let payload_b64 = BASE64_URL.encode(serde_json::to_vec(&payload).unwrap());
    let signing_input = format!("{protected_b64}.{payload_b64}");

    let key = SigningKey::from_pkcs8_pem(opts.key_pem).unwrap();
    let signature: Signature = key.sign(signing_input.as_bytes());
    let mut raw = signature.to_bytes().to_vec();
    if opts.tamper {
        raw[10] ^= 0x01;
    }

    let x5c: Vec<String> = opts
        .chain_pem
        .iter()
        .map(|pem| BASE64.encode(pem_to_der(pem)))
        .collect();

    serde_json::to_vec(&json!({
        "payload": payload_b64,
        "protected": protected_b64,
        "header": {
            "x5c": x5c,
            "io.cncf.notary.signingAgent": "ratify-tests/1.0",
        },
        "signature": BASE64_URL.encode(raw),
    }))
    .unwrap()
}

/// Add a notation signature manifest for `subject` to the layout.
pub fn add_notation_signature(
    layout: &mut LayoutBuilder,
    subject: &Descriptor,
    opts: &SignOptions<'_>,
) -> Descriptor {
    let envelope = layout.blob("application/jose+json", &jws_envelope(subject, opts));
    let signature = layout.manifest(Some(NOTATION_SIGNATURE), Some(subject), vec![envelope]);
    layout.add_to_index(&signature, None);
    signature
}

pub fn pem_to_der(pem: &str) -> Vec<u8> {
    let certs = Certificate::load_pem_chain(pem.as_bytes()).unwrap();
    certs[0].to_der().unwrap()
}

pub fn certificate(pem: &str) -> Certificate {
    Certificate::from_der(&pem_to_der(pem)).unwrap()
}

/// Lay out a notation trust store with one `ca` named store.
pub fn write_trust_store(root: &Path, store_name: &str, certs: &[&str]) {
    write_typed_trust_store(root, "ca", store_name, certs);
}

pub fn write_typed_trust_store(root: &Path, store_type: &str, store_name: &str, certs: &[&str]) {
    let dir = root.join("truststore/x509").join(store_type).join(store_name);
    fs::create_dir_all(&dir).unwrap();
    for (i, pem) in certs.iter().enumerate() {
        fs::write(dir.join(format!("cert-{i}.crt")), pem).unwrap();
    }
}

/// A permissive-by-default policy for every repository.
pub fn wildcard_policy(level: &str) -> serde_json::Value {
    json!({
        "version": "1.0",
        "trustPolicies": [{
            "name": "default",
            "registryScopes": ["*"],
            "signatureVerification": { "level": level },
            "trustStores": ["ca:certs"],
            "trustedIdentities": ["*"]
        }]
    })
}
