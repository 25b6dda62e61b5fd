//! `CloudStatus`: namespaced, one-to-one with a `CloudResource` of the same
//! name, carrying the last observed stack state. Written by the resource
//! reconciler only; never by the user.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cloud.appvia.io",
    version = "v1",
    kind = "CloudStatus",
    namespaced,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".spec.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStatusSpec {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    /// Logs pulled from the stack, when the provider exposes any.
    #[serde(default)]
    pub logs: String,
}
