//! Shared value types referenced from both `CloudTemplate` and `CloudResource`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single templated input. Either the template supplies a default (`value`)
/// or the resource must supply one, directly or via a named `Secret`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Key name of the parameter.
    pub name: String,
    /// Short human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of a namespace Secret holding the value (exactly one key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    /// A literal value for the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Parameter {
    /// `allow_empty` is true for template-level parameters, which may be
    /// pure defaults with no resource override yet.
    pub fn validate(&self, allow_empty: bool) -> Vec<String> {
        let mut errs = Vec::new();
        if self.name.is_empty() {
            errs.push("parameters.name= : no name given".to_string());
        }
        if self.value.is_none() && self.secret_name.is_none() && !allow_empty {
            errs.push("parameters= : neither parameter value or secret reference set".to_string());
        }
        errs
    }
}

/// Which Kubernetes-secret-facing value a `SecretValue` pulls from.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretValueType {
    /// A stack output, looked up by name.
    Output,
    /// A generated credential, referenced as `<user-id>.username` or `<user-id>.secret`.
    Credential,
}

/// A single key/value mapping destined for a Kubernetes `Secret`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretValue {
    /// Whether `value` names a stack output or a credential reference.
    #[serde(rename = "type")]
    pub r#type: SecretValueType,
    /// Key name to place in the Kubernetes Secret's data.
    pub key: String,
    /// Name of the output, or `<user-id>.username`/`<user-id>.secret` for a credential.
    pub value: String,
}

impl SecretValue {
    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.key.is_empty() {
            errs.push("secrets.values.key= : no key defined".to_string());
        }
        if self.value.is_empty() {
            errs.push("secrets.values.value= : no value defined".to_string());
        }
        errs
    }
}

/// Maps a set of [`SecretValue`]s into a single named Kubernetes `Secret`.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretMapping {
    /// Name of the Kubernetes Secret to create/update.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub values: Vec<SecretValue>,
}

impl SecretMapping {
    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if self.name.is_empty() {
            errs.push("secrets.name= : no name defined".to_string());
        }
        if self.values.is_empty() {
            errs.push("secrets.values= : no values defined".to_string());
        }
        for value in &self.values {
            errs.extend(value.validate());
        }
        errs
    }
}

/// Content format of a `CloudTemplate`'s body.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    Yaml,
    Json,
}
