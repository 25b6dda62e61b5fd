//! The `CloudProvider` contract and its two implementations: `aws` (backed by
//! CloudFormation) and `null` (an in-memory fixture used for tests).

pub mod aws;
pub mod null;
pub mod tags;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crd::{CloudResource, CloudTemplate};

/// Errors a [`CloudProvider`] implementation can return. Three sentinels
/// (`StackNotFound`, `Unauthorized`, `Aborted`) get special handling by
/// callers; everything else is a generic transient failure eligible for retry.
#[derive(thiserror::Error, Debug)]
pub enum CloudProviderError {
    #[error("stack not found")]
    StackNotFound,

    #[error("unauthorized to operate on this stack")]
    Unauthorized,

    #[error("operation aborted")]
    Aborted,

    #[error("invalid stack data: {0}")]
    InvalidStack(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("template render error: {0}")]
    Template(String),

    #[error("{0}")]
    Other(String),

    #[error("aws cloudformation error: {0}")]
    CloudFormation(String),

    #[error("aws iam error: {0}")]
    Iam(String),

    #[error("aws ec2 error: {0}")]
    Ec2(String),
}

/// Static configuration a provider is constructed with.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Name of the cluster, used by the AWS provider to scope VPC/subnet lookups.
    pub cluster_name: String,
    /// Cloud region, if the provider needs one. Auto-discovered when empty.
    pub region: String,
    /// Name of this controller instance; written as the ownership tag on
    /// every stack it creates, and checked on every mutation.
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Rendered template parameter values, keyed by parameter name.
    pub context: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    pub wait_on: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GetOptions {}

#[derive(Clone, Debug, Default)]
pub struct WaitOptions {
    pub check_interval: Option<std::time::Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

/// Normalised stack lifecycle state, after translating the provider's native
/// status strings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StackState {
    /// The stack has finished and is usable.
    Done,
    /// Create/update/delete is underway.
    InProgress,
    /// The stack failed and needs operator attention.
    Failed,
    /// The stack is being torn down.
    Deleting,
    /// The stack is unwinding a failed change.
    Rollback,
    /// The provider returned a status string we don't recognise.
    Unknown,
}

impl std::fmt::Display for StackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StackState::Done => "OK",
            StackState::InProgress => "InProgress",
            StackState::Failed => "Failed",
            StackState::Deleting => "Deleting",
            StackState::Rollback => "Rollback",
            StackState::Unknown => "",
        };
        write!(f, "{s}")
    }
}

/// A provider-side projection of a running stack. Not a Kubernetes object.
#[derive(Clone, Debug)]
pub struct Stack {
    pub name: String,
    pub namespace: String,
    pub created: DateTime<Utc>,
    pub spec: StackSpec,
    pub status: StackStatus,
}

#[derive(Clone, Debug, Default)]
pub struct StackSpec {
    /// Name of the CloudResource this stack belongs to.
    pub resource_name: String,
    pub outputs: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub template: String,
    pub retention: std::time::Duration,
    pub delete_on: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
pub struct StackStatus {
    pub status: Option<StackState>,
    pub reason: String,
}

impl Stack {
    pub fn has_delete_tag(&self) -> bool {
        self.spec.tags.contains_key(tags::DELETION_TIME)
    }

    pub fn checksum(&self) -> Option<&str> {
        self.spec.tags.get(tags::CHECKSUM).map(String::as_str)
    }

    pub fn requires_deletion(&self) -> bool {
        if !self.has_delete_tag() {
            return false;
        }
        match self.spec.delete_on {
            Some(when) => when < Utc::now(),
            None => false,
        }
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.spec.outputs.contains_key(name)
    }

    pub fn output(&self, name: &str) -> Option<&str> {
        self.spec.outputs.get(name).map(String::as_str)
    }

    pub fn is_owned_by(&self, provider_name: &str) -> bool {
        self.spec
            .tags
            .get(tags::PROVIDER_NAME)
            .map(|v| v == provider_name)
            .unwrap_or(false)
    }
}

/// A minted credential, mirrored into a Secret via a `credential` [`SecretValue`].
#[derive(Clone, Debug)]
pub struct Credential {
    pub id: String,
    pub user: String,
    pub secret: String,
}

/// The deterministic, injective stack name for a `(namespace, resource)` pair.
/// The namespace's length is encoded ahead of it so that, e.g.,
/// `("ns1_r2", "anything")` and `("ns1", "r2_anything")` can never collide
/// on the same underscore-joined string.
pub fn stack_name(namespace: &str, name: &str) -> String {
    format!("stacks_{}_{namespace}_{name}", namespace.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_name_is_injective_over_namespace_and_name() {
        let pairs = [
            ("ns1", "r1"),
            ("ns1", "r2"),
            ("ns2", "r1"),
            ("ns1_r2", "anything"),
            ("ns1", "r2_anything"),
        ];

        let mut seen = std::collections::HashSet::new();
        for (namespace, name) in pairs {
            let generated = stack_name(namespace, name);
            assert!(seen.insert(generated), "stack_name produced a collision for {namespace:?}/{name:?}");
        }
    }
}

/// Cloud provider contract: create/update/delete/inspect stacks, mint
/// credentials, and manage stack tags.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn credentials(
        &self,
        stack_name: &str,
    ) -> Result<Vec<Credential>, CloudProviderError>;

    async fn create(
        &self,
        stack_name: &str,
        resource: &CloudResource,
        template: &CloudTemplate,
        options: &CreateOptions,
    ) -> Result<(), CloudProviderError>;

    async fn delete(
        &self,
        stack_name: &str,
        options: &DeleteOptions,
    ) -> Result<(), CloudProviderError>;

    async fn exists(&self, stack_name: &str) -> Result<Option<Stack>, CloudProviderError>;

    async fn get(
        &self,
        stack_name: &str,
        options: &GetOptions,
    ) -> Result<Stack, CloudProviderError>;

    async fn list(&self, options: &ListOptions) -> Result<Vec<Stack>, CloudProviderError>;

    async fn logs(
        &self,
        stack_name: &str,
        options: &GetOptions,
    ) -> Result<String, CloudProviderError>;

    async fn status(
        &self,
        stack_name: &str,
        options: &GetOptions,
    ) -> Result<StackState, CloudProviderError>;

    async fn update_tags(
        &self,
        stack_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), CloudProviderError>;

    async fn wait(
        &self,
        stack_name: &str,
        options: &WaitOptions,
    ) -> Result<StackState, CloudProviderError>;
}
