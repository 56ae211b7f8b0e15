//! JSON rendering of validation results.

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::Result;
use crate::executor::{ValidationReport, ValidationResult};
use crate::verifier::VerificationResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedResult {
    pub succeeded: bool,
    pub artifact_reports: Vec<RenderedReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedReport {
    pub subject: String,
    /// `repository@digest`
    pub artifact: String,
    pub artifact_type: String,
    pub succeeded: bool,
    pub results: Vec<RenderedVerification>,
    pub artifact_reports: Vec<RenderedReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedVerification {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub verifier_name: String,
    pub verifier_type: String,
    /// Verifier detail on success, the error chain as text on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// Convert an executor result into its serializable form.
pub fn render(result: &ValidationResult, repository: &str) -> RenderedResult {
    RenderedResult {
        succeeded: result.succeeded,
        artifact_reports: render_reports(&result.artifact_reports, repository),
    }
}

fn render_reports(reports: &[ValidationReport], repository: &str) -> Vec<RenderedReport> {
    reports
        .iter()
        .map(|report| RenderedReport {
            subject: report.subject.clone(),
            artifact: format!("{repository}@{}", report.artifact.digest),
            artifact_type: report.artifact_type().to_string(),
            succeeded: report.succeeded(),
            results: report.results.iter().map(render_verification).collect(),
            artifact_reports: render_reports(&report.artifact_reports, repository),
        })
        .collect()
}

fn render_verification(result: &VerificationResult) -> RenderedVerification {
    let detail = match &result.error {
        Some(err) => Some(Value::String(format!("{err:#}"))),
        None => result.detail.clone(),
    };
    RenderedVerification {
        succeeded: result.succeeded(),
        description: Some(result.description.clone()).filter(|d| !d.is_empty()),
        verifier_name: result.verifier_name.clone(),
        verifier_type: result.verifier_type.clone(),
        detail,
    }
}

/// Pretty-print with four-space indentation.
pub fn to_json(rendered: &RenderedResult) -> Result<String> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    rendered.serialize(&mut serializer)?;
    out.push(b'\n');
    // serde_json only emits UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}
