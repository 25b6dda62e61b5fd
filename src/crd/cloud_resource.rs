//! `CloudResource`: a namespaced request for a concrete instance of a
//! `CloudTemplate`, reconciled into a cloud provider stack.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Parameter, SecretMapping};

/// A requested cloud resource, built from the named template.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloud.appvia.io",
    version = "v1",
    kind = "CloudResource",
    namespaced,
    printcolumn = r#"{"name":"Template", "type":"string", "jsonPath":".spec.templateName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudResourceSpec {
    /// Name of the `CloudTemplate` this resource is built from.
    pub template_name: String,
    /// Whether credentials should be minted from the stack on create.
    #[serde(default)]
    pub credentials: bool,
    /// Parameter overrides/values for the named template's parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Additional secret mappings, merged with the template's own.
    #[serde(default)]
    pub secrets: Vec<SecretMapping>,
    /// Overrides the template's retention for this resource's stack, as a
    /// duration string (e.g. `"24h"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

impl CloudResource {
    pub fn has_parameter(&self, name: &str) -> bool {
        self.spec.parameters.iter().any(|p| p.name == name)
    }

    pub fn has_secret(&self, name: &str) -> bool {
        self.spec.secrets.iter().any(|s| s.name == name)
    }

    /// Adds `mapping` if a secret mapping of the same name isn't already present.
    pub fn add_secret(&mut self, mapping: SecretMapping) {
        if self.has_secret(&mapping.name) {
            return;
        }
        self.spec.secrets.push(mapping);
    }

    /// Mirrors the original `CloudResource.IsValid()`.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errs = Vec::new();

        if self.spec.template_name.is_empty() {
            errs.push("spec.templateName= : no template name defined".to_string());
        }
        for param in &self.spec.parameters {
            errs.extend(param.validate(false));
        }
        for secret in &self.spec.secrets {
            errs.extend(secret.validate());
        }

        errs
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }
}
