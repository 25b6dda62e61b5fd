//! `CloudTemplate`: a cluster-scoped CRD holding a cloud stack template body.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Parameter, SecretMapping, TemplateFormat};

/// A reusable cloud stack template, validated by the template controller and
/// referenced by name from `CloudResource.spec.templateName`.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloud.appvia.io",
    version = "v1",
    kind = "CloudTemplate",
    status = "CloudTemplateStatus",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudTemplateSpec {
    /// Raw stack template body (CloudFormation YAML/JSON, or the equivalent
    /// for another provider).
    pub content: String,
    /// Format of `content`.
    pub format: TemplateFormat,
    /// Whether this template embeds IAM-style credentials to be minted on create.
    #[serde(default)]
    pub credentials: bool,
    /// Default values for template parameters; resources may override.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Secret mappings every resource built from this template inherits.
    #[serde(default)]
    pub secrets: Vec<SecretMapping>,
    /// How long a deleted resource's stack is held before it is actually torn
    /// down, as a duration string (e.g. `"24h"`). `None` means delete immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

/// Status of the last validation pass over a `CloudTemplate`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudTemplateStatus {
    /// `OK` or `Invalid`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

impl CloudTemplate {
    /// Mirrors the original `CloudTemplate.IsValid()`: returns one
    /// `field=value : detail` string per violation.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errs = Vec::new();
        let spec = &self.spec;

        if spec.content.is_empty() {
            errs.push("spec.content= : no stack template specified".to_string());
        }
        if spec.retention.is_none() {
            errs.push("spec.retention= : no retention policy defined".to_string());
        } else if let Some(retention) = &spec.retention {
            if humantime::parse_duration(retention).is_err() {
                errs.push(format!("spec.retention={retention} : not a valid duration"));
            }
        }
        for param in &spec.parameters {
            errs.extend(param.validate(true));
        }
        for secret in &spec.secrets {
            errs.extend(secret.validate());
        }

        errs
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    pub fn retention_duration(&self) -> Option<std::time::Duration> {
        self.spec
            .retention
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
    }
}
