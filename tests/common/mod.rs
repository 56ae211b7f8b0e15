#![allow(dead_code)]

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use ratify_cli::oci::{
    Descriptor, ANNOTATION_REF_NAME, MEDIA_TYPE_EMPTY_JSON, MEDIA_TYPE_IMAGE_INDEX,
    MEDIA_TYPE_IMAGE_MANIFEST,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use x509_cert::der::Encode;
use x509_cert::Certificate;

pub const TRUSTED_ROOT: &str = include_str!("../fixtures/trusted-root.crt");
pub const TRUSTED_LEAF: &str = include_str!("../fixtures/trusted-leaf.crt");
pub const TRUSTED_LEAF_KEY: &str = include_str!("../fixtures/trusted-leaf.key");
pub const ROGUE_ROOT: &str = include_str!("../fixtures/rogue-root.crt");
pub const ROGUE_LEAF: &str = include_str!("../fixtures/rogue-leaf.crt");
pub const ROGUE_LEAF_KEY: &str = include_str!("../fixtures/rogue-leaf.key");

pub const SUBJECT: &str = "registry.example.com/net-monitor:v1";

/// Who signs, and whether the signature gets corrupted.
#[derive(Clone, Copy)]
pub enum Signer {
    Trusted,
    Tampered,
    Rogue,
}

/// A temp directory holding an OCI layout, a trust store and a config file.
pub struct TestEnv {
    _tmp: TempDir,
    pub root: PathBuf,
    blobs: BTreeMap<String, Vec<u8>>,
    index: Vec<Descriptor>,
    pub image: Descriptor,
}

impl TestEnv {
    /// An unsigned image tagged `v1`.
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let root = tmp.path().to_path_buf();
        let mut env = Self {
            _tmp: tmp,
            root,
            blobs: BTreeMap::new(),
            index: Vec::new(),
            image: Descriptor::for_content(MEDIA_TYPE_IMAGE_MANIFEST, b""),
        };
        let layer = env.blob("application/vnd.oci.image.layer.v1.tar", b"net-monitor");
        env.image = env.manifest(None, None, vec![layer]);
        let mut tagged = env.image.clone();
        tagged
            .annotations
            .insert(ANNOTATION_REF_NAME.to_string(), "v1".to_string());
        env.index.push(tagged);

        let certs = env.root.join("certs/truststore/x509/ca/certs");
        fs::create_dir_all(&certs).expect("create trust store");
        fs::write(certs.join("root.crt"), TRUSTED_ROOT).expect("write trust anchor");
        env
    }

    fn blob(&mut self, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = Descriptor::for_content(media_type, data);
        self.blobs.insert(desc.digest.blob_path(), data.to_vec());
        desc
    }

    fn manifest(
        &mut self,
        artifact_type: Option<&str>,
        subject: Option<&Descriptor>,
        layers: Vec<Descriptor>,
    ) -> Descriptor {
        let config = self.blob(MEDIA_TYPE_EMPTY_JSON, b"{}");
        let mut manifest = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_IMAGE_MANIFEST,
            "config": config,
            "layers": layers,
        });
        if let Some(artifact_type) = artifact_type {
            manifest["artifactType"] = json!(artifact_type);
        }
        if let Some(subject) = subject {
            manifest["subject"] = json!(subject);
        }
        let bytes = serde_json::to_vec(&manifest).expect("encode manifest");
        self.blob(MEDIA_TYPE_IMAGE_MANIFEST, &bytes)
    }

    /// Attach a notation signature to the image.
    pub fn sign(&mut self, signer: Signer) -> &mut Self {
        let (key, chain) = match signer {
            Signer::Trusted | Signer::Tampered => (TRUSTED_LEAF_KEY, [TRUSTED_LEAF, TRUSTED_ROOT]),
            Signer::Rogue => (ROGUE_LEAF_KEY, [ROGUE_LEAF, ROGUE_ROOT]),
        };
        let envelope = jws_envelope(&self.image, key, &chain, matches!(signer, Signer::Tampered));
        let layer = self.blob("application/jose+json", &envelope);
        let image = self.image.clone();
        let signature = self.manifest(
            Some("application/vnd.cncf.notary.signature"),
            Some(&image),
            vec![layer],
        );
        self.index.push(signature);
        self
    }

    fn files(&self) -> Vec<(String, Vec<u8>)> {
        let index = json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_IMAGE_INDEX,
            "manifests": self.index,
        });
        let mut files = vec![
            ("oci-layout".to_string(), br#"{"imageLayoutVersion":"1.0.0"}"#.to_vec()),
            ("index.json".to_string(), serde_json::to_vec(&index).expect("encode index")),
        ];
        files.extend(self.blobs.iter().map(|(p, d)| (p.clone(), d.clone())));
        files
    }

    /// Write the layout as a directory and return its path.
    pub fn layout_dir(&self) -> PathBuf {
        let dir = self.root.join("layout");
        for (path, data) in self.files() {
            let target = dir.join(path);
            fs::create_dir_all(target.parent().expect("blob parent")).expect("create blob dir");
            fs::write(target, data).expect("write blob");
        }
        dir
    }

    /// Write the layout as a tar archive and return its path.
    pub fn layout_tar(&self) -> PathBuf {
        let path = self.root.join("layout.tar");
        let mut builder = tar::Builder::new(File::create(&path).expect("create tar"));
        for (name, data) in self.files() {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, data.as_slice())
                .expect("append tar entry");
        }
        builder.finish().expect("finish tar");
        path
    }

    /// Write a config with one notation verifier at `level` for every repository.
    pub fn config(&self, level: &str) -> PathBuf {
        let config = json!({
            "name": "notation",
            "trustPolicyDoc": {
                "version": "1.0",
                "trustPolicies": [{
                    "name": "default",
                    "registryScopes": ["*"],
                    "signatureVerification": { "level": level },
                    "trustStores": ["ca:certs"],
                    "trustedIdentities": ["x509.subject: C=US, ST=WA, O=Ratify Test"]
                }]
            },
            "trustStorePath": self.root.join("certs"),
        });
        let path = self.root.join("config.json");
        fs::write(&path, config.to_string()).expect("write config");
        path
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("ratify");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Run `ratify verify` and parse the report it prints.
    pub fn verify_json(&self, store: &Path, config: &Path) -> Value {
        let out = self
            .cmd()
            .args(["verify", "--subject", SUBJECT])
            .arg("--config")
            .arg(config)
            .arg("--store")
            .arg(store)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("valid json output")
    }
}

fn jws_envelope(subject: &Descriptor, key_pem: &str, chain: &[&str], tamper: bool) -> Vec<u8> {
    let protected = json!({
        "alg": "ES256",
        "cty": "application/vnd.cncf.notary.payload.v1+json",
        "crit": ["io.cncf.notary.signingScheme"],
        "io.cncf.notary.signingScheme": "notary.x509",
        "io.cncf.notary.signingTime": Utc::now().to_rfc3339(),
    });
    let protected = URL_SAFE_NO_PAD.encode(protected.to_string());
    let payload = URL_SAFE_NO_PAD.encode(json!({ "targetArtifact": subject }).to_string());

    let key = SigningKey::from_pkcs8_pem(key_pem).expect("signing key");
    let signature: Signature = key.sign(format!("{protected}.{payload}").as_bytes());
    let mut raw = signature.to_bytes().to_vec();
    if tamper {
        raw[0] ^= 0x01;
    }

    let x5c: Vec<String> = chain
        .iter()
        .map(|pem| {
            let certs = Certificate::load_pem_chain(pem.as_bytes()).expect("fixture certificate");
            STANDARD.encode(certs[0].to_der().expect("encode certificate"))
        })
        .collect();

    json!({
        "payload": payload,
        "protected": protected,
        "header": { "x5c": x5c },
        "signature": URL_SAFE_NO_PAD.encode(raw),
    })
    .to_string()
    .into_bytes()
}
