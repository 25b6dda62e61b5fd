//! `CloudResource` reconciler: the create/update/delete state machine that
//! drives a cloud provider stack from a resource's spec.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ObjectMeta};
use kube::runtime::{
    controller::{Action, Controller},
    finalizer::{finalizer, Event},
    watcher::Config as WatcherConfig,
};
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument};

use crate::crd::{CloudResource, CloudStatusSpec, CloudTemplate, SecretValueType};
use crate::error::{Error, Result};
use crate::kube_utils;
use crate::provider::{self, CreateOptions, Credential, DeleteOptions, GetOptions, Stack};
use crate::retry::retry;

use super::ReconcilerContext;

const FINALIZER: &str = "cloud.appvia.io/cloud-resource";

pub async fn run(ctx: Arc<ReconcilerContext>) -> Result<()> {
    let api: Api<CloudResource> = Api::all(ctx.client.clone());

    api.list(&Default::default())
        .await
        .map_err(|_| Error::ConfigError("CloudResource CRD not installed".to_string()))?;

    let concurrency = ctx.max_concurrent_reconciles.max(1);

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(concurrency, |res| async move {
            match res {
                Ok(obj) => debug!(?obj, "reconciled cloud resource"),
                Err(err) => error!(error = %err, "cloud resource reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<CloudResource>, ctx: Arc<ReconcilerContext>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<CloudResource> = Api::namespaced(ctx.client.clone(), &namespace);

    if !ctx.leadership.is_leader() {
        debug!("skipping reconcile, not the leader");
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    finalizer(&api, FINALIZER, obj, |event| async {
        match event {
            Event::Apply(resource) => apply(&ctx, &resource).await,
            Event::Cleanup(resource) => cleanup(&ctx, &resource).await,
        }
    })
    .await
    .map_err(Error::from)
}

fn error_policy(_obj: Arc<CloudResource>, error: &Error, ctx: Arc<ReconcilerContext>) -> Action {
    error!(error = %error, "cloud resource reconcile error");
    if let Some(metrics) = &ctx.metrics {
        metrics.resource_errors.inc();
    }

    let delay = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(120)
    };
    Action::requeue(delay)
}

async fn apply(ctx: &ReconcilerContext, resource: &CloudResource) -> Result<Action> {
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());
    let name = resource.name_any();
    let stack_name = provider::stack_name(&namespace, &name);

    let template = kube_utils::find_cloud_template(&ctx.client, &resource.spec.template_name).await?;

    let outcome = tokio::time::timeout(
        ctx.stack_timeout,
        update_cloud_resource(ctx, &stack_name, resource, &template),
    )
    .await
    .map_err(|_| Error::Aborted)
    .and_then(|r| r);

    write_status(ctx, &namespace, &name, &outcome).await?;

    let stack = outcome?;

    let mut credentials: BTreeMap<String, Credential> = BTreeMap::new();
    if template.spec.credentials {
        for cred in ctx.cloud.credentials(&stack_name).await? {
            credentials.insert(cred.id.clone(), cred);
        }
    }

    update_cloud_secrets(ctx, resource, &stack, &credentials).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

async fn update_cloud_resource(
    ctx: &ReconcilerContext,
    stack_name: &str,
    resource: &CloudResource,
    template: &CloudTemplate,
) -> Result<Stack> {
    if let Some(existing) = ctx.cloud.exists(stack_name).await? {
        let mut stack = existing;
        loop {
            match stack.status.status {
                Some(provider::StackState::Done) => break,
                Some(provider::StackState::Failed) => {
                    return Err(Error::ConfigError(format!(
                        "stack failed on previous creation: {}",
                        stack.status.reason
                    )))
                }
                _ => {
                    ctx.cloud.wait(stack_name, &Default::default()).await?;
                    stack = ctx.cloud.get(stack_name, &GetOptions::default()).await?;
                }
            }
        }

        let checksum = resource_checksum(resource);
        match stack.checksum() {
            None => {
                return Err(Error::ConfigError(
                    "stack does not have a checksum, refusing to continue".to_string(),
                ))
            }
            Some(existing_sum) if existing_sum == checksum => {
                info!("skipping update, nothing has changed");
                return Ok(stack);
            }
            _ => {}
        }
    }

    if !resource.is_valid() {
        return Err(Error::ValidationError(resource.validation_errors().join(", ")));
    }
    if !template.is_valid() {
        return Err(Error::ValidationError(template.validation_errors().join(", ")));
    }

    let model = build_model(&ctx.client, template, resource).await?;
    let checksum = resource_checksum(resource);
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());

    let retention = resource
        .spec
        .retention
        .as_deref()
        .or(template.spec.retention.as_deref())
        .and_then(|s| humantime::parse_duration(s).ok())
        .unwrap_or_default();

    let mut tags = BTreeMap::new();
    tags.insert(provider::tags::CHECKSUM.to_string(), checksum);
    tags.insert(
        provider::tags::CREATED.to_string(),
        chrono::Utc::now().timestamp().to_string(),
    );
    tags.insert(provider::tags::NAMESPACE.to_string(), namespace.clone());
    tags.insert(provider::tags::PROVIDER_NAME.to_string(), ctx.provider_name.clone());
    tags.insert(provider::tags::RESOURCE_NAME.to_string(), resource.name_any());
    tags.insert(provider::tags::RETENTION.to_string(), retention.as_secs().to_string());
    tags.insert(provider::tags::TEMPLATE_NAME.to_string(), resource.spec.template_name.clone());

    info!(stack_name, "creating/updating the stack");
    ctx.cloud
        .create(stack_name, resource, template, &CreateOptions { context: model, tags })
        .await?;

    let status = ctx.cloud.wait(stack_name, &Default::default()).await?;
    let stack = ctx.cloud.get(stack_name, &GetOptions::default()).await?;

    if status != provider::StackState::Done {
        return Err(Error::ConfigError("stack failed to complete successfully".to_string()));
    }

    Ok(stack)
}

async fn cleanup(ctx: &ReconcilerContext, resource: &CloudResource) -> Result<Action> {
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());
    let name = resource.name_any();
    let stack_name = provider::stack_name(&namespace, &name);

    let stack = match ctx.cloud.get(&stack_name, &GetOptions::default()).await {
        Ok(stack) => stack,
        Err(provider::CloudProviderError::StackNotFound) => return Ok(Action::await_change()),
        Err(err) => return Err(Error::from(err)),
    };

    info!(
        retention = ?stack.spec.retention,
        template = %stack.spec.template,
        "cloud resource stack deletion event"
    );

    if stack.spec.retention.is_zero() {
        info!("deleting stack, no retention period set");
        retry(3, Duration::from_secs(10), || async {
            ctx.cloud.delete(&stack_name, &DeleteOptions::default()).await
        })
        .await
        .map_err(Error::from)?;

        kube_utils::delete_cloud_status(&ctx.client, &namespace, &name).await?;
        return Ok(Action::await_change());
    }

    let expiration = chrono::Utc::now() + chrono::Duration::from_std(stack.spec.retention).unwrap_or_default();
    info!(expires = %expiration, "marking stack for deletion later");

    let mut tags = stack.spec.tags.clone();
    tags.insert(provider::tags::DELETION_TIME.to_string(), expiration.timestamp().to_string());

    ctx.cloud.update_tags(&stack_name, &tags).await.map_err(Error::from)?;

    Ok(Action::await_change())
}

/// Builds the template-render model from the template's default parameters
/// and the resource's own parameter overrides, pulling single-key Secret
/// values where referenced.
async fn build_model(
    client: &kube::Client,
    template: &CloudTemplate,
    resource: &CloudResource,
) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();

    for param in &template.spec.parameters {
        if let Some(value) = &param.value {
            values.insert(param.name.clone(), value.clone());
        }
        if !resource.has_parameter(&param.name) {
            return Err(Error::ParameterError(format!(
                "resource parameter: '{}' is required",
                param.name
            )));
        }
    }

    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());

    for param in &resource.spec.parameters {
        if let Some(value) = &param.value {
            values.insert(param.name.clone(), value.clone());
            continue;
        }
        if let Some(secret_name) = &param.secret_name {
            let secret = kube_utils::find_kubernetes_secret(client, &namespace, secret_name)
                .await?
                .ok_or_else(|| {
                    Error::ParameterError(format!(
                        "parameter: '{}' unable to pull from kubernetes secret: not found",
                        param.name
                    ))
                })?;

            let data = secret.data.unwrap_or_default();
            match data.len() {
                0 => {
                    return Err(Error::ParameterError(format!(
                        "parameter: '{}' kubernetes secret has no value",
                        param.name
                    )))
                }
                1 => {
                    let (_, value) = data.into_iter().next().expect("exactly one entry");
                    let value = String::from_utf8(value.0).map_err(|_| {
                        Error::ParameterError(format!("parameter: '{}' secret value is not utf-8", param.name))
                    })?;
                    values.insert(param.name.clone(), value);
                }
                _ => {
                    return Err(Error::ParameterError(format!(
                        "parameter: '{}' kubernetes secret has multiple keys",
                        param.name
                    )))
                }
            }
            continue;
        }
        return Err(Error::ParameterError(format!(
            "resource parameter: '{}' has no value or kubernetes secret set",
            param.name
        )));
    }

    Ok(values)
}

/// Order-stable checksum over the resource's parameter list. Hex-encoded
/// SHA-256 stands in for the original's raw MD5 bytes (see DESIGN.md).
fn resource_checksum(resource: &CloudResource) -> String {
    let mut hasher = Sha256::new();
    for param in &resource.spec.parameters {
        hasher.update(param.name.as_bytes());
        if let Some(secret_name) = &param.secret_name {
            hasher.update(secret_name.as_bytes());
        }
        if let Some(value) = &param.value {
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

async fn write_status(ctx: &ReconcilerContext, namespace: &str, name: &str, outcome: &Result<Stack>) -> Result<()> {
    let owner = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    };

    let status = match outcome {
        Err(err) => CloudStatusSpec {
            status: "Failed".to_string(),
            message: "Failed to update / create the stack".to_string(),
            reason: err.to_string(),
            logs: String::new(),
        },
        Ok(stack) => {
            let status_str = stack.status.status.map(|s| s.to_string()).unwrap_or_default();
            let logs = ctx
                .cloud
                .logs(&provider::stack_name(namespace, name), &GetOptions::default())
                .await
                .unwrap_or_default();
            CloudStatusSpec {
                status: status_str,
                message: String::new(),
                reason: String::new(),
                logs,
            }
        }
    };

    kube_utils::update_cloud_status(&ctx.client, namespace, name, &owner, status).await
}

async fn update_cloud_secrets(
    ctx: &ReconcilerContext,
    resource: &CloudResource,
    stack: &Stack,
    credentials: &BTreeMap<String, Credential>,
) -> Result<()> {
    let namespace = resource.namespace().unwrap_or_else(|| "default".to_string());

    for mapping in &resource.spec.secrets {
        let mut values = BTreeMap::new();
        for value in &mapping.values {
            match value.r#type {
                SecretValueType::Output => {
                    values.insert(value.key.clone(), stack.output(&value.value).unwrap_or_default().to_string());
                }
                SecretValueType::Credential => {
                    let mut parts = value.value.splitn(2, '.');
                    let (Some(user_id), Some(attribute)) = (parts.next(), parts.next()) else {
                        return Err(Error::ParameterError(format!(
                            "invalid credential value: {}, should be username.attribute for secret: {}",
                            value.value, mapping.name
                        )));
                    };
                    let credential = credentials.get(user_id).ok_or_else(|| {
                        Error::ParameterError(format!(
                            "credentials not found for secret: {}, reference: {}",
                            mapping.name, value.value
                        ))
                    })?;
                    let resolved = match attribute {
                        "username" => credential.user.clone(),
                        "secret" => credential.secret.clone(),
                        other => return Err(Error::ParameterError(format!("unknown credential attribute: {other}"))),
                    };
                    values.insert(value.key.clone(), resolved);
                }
            }
        }

        kube_utils::update_kubernetes_secret(
            &ctx.client,
            &namespace,
            &mapping.name,
            resource.meta(),
            "cloud.appvia.io/v1",
            "CloudResource",
            values,
        )
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{self, CountingProvider, CredentialStubProvider};
    use crate::crd::{CloudStatus, Parameter, SecretValue, TemplateFormat};
    use crate::provider::null::NullProvider;
    use http::Method;
    use k8s_openapi::api::core::v1::Secret;

    fn resource(name: &str, namespace: &str, template_name: &str, params: Vec<Parameter>) -> CloudResource {
        CloudResource {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: crate::crd::CloudResourceSpec {
                template_name: template_name.to_string(),
                credentials: false,
                parameters: params,
                secrets: Vec::new(),
                retention: None,
            },
        }
    }

    fn template(name: &str, retention: Option<&str>, credentials: bool) -> CloudTemplate {
        CloudTemplate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: crate::crd::CloudTemplateSpec {
                content: r#"{"X":"{{a}}"}"#.to_string(),
                format: TemplateFormat::Json,
                credentials,
                parameters: Vec::new(),
                secrets: Vec::new(),
                retention: retention.map(str::to_string),
            },
            status: None,
        }
    }

    fn ok_status() -> CloudStatus {
        CloudStatus {
            metadata: ObjectMeta::default(),
            spec: CloudStatusSpec {
                status: "OK".to_string(),
                message: String::new(),
                reason: String::new(),
                logs: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn happy_create_writes_ok_status_and_stack_tags() {
        let (client, mut server) = test_support::mock_client();
        let cloud: Arc<dyn provider::CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud.clone(), true);

        let resource = resource(
            "r1",
            "ns1",
            "t1",
            vec![Parameter {
                name: "a".to_string(),
                description: None,
                secret_name: None,
                value: Some("hello".to_string()),
            }],
        );
        let template = template("t1", Some("1h"), false);

        let responder = async {
            server.expect(Method::GET, "cloudtemplates/t1", &template).await;
            server.expect(Method::PATCH, "namespaces/ns1/cloudstatuses/r1", &ok_status()).await;
        };

        let (outcome, _) = tokio::join!(apply(&ctx, &resource), responder);
        outcome.expect("apply succeeds");

        let stack = cloud
            .get(&provider::stack_name("ns1", "r1"), &GetOptions::default())
            .await
            .unwrap();
        assert_eq!(stack.spec.tags.get(provider::tags::RESOURCE_NAME).unwrap(), "r1");
        assert_eq!(stack.spec.tags.get(provider::tags::NAMESPACE).unwrap(), "ns1");
        assert_eq!(stack.spec.tags.get(provider::tags::TEMPLATE_NAME).unwrap(), "t1");
        assert_eq!(stack.spec.tags.get(provider::tags::RETENTION).unwrap(), "3600");
        assert!(!stack.checksum().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_with_unchanged_parameters_does_not_recreate_the_stack() {
        let (client, mut server) = test_support::mock_client();
        let counting = Arc::new(CountingProvider::new(NullProvider::new("demo-operator".to_string())));
        let cloud: Arc<dyn provider::CloudProvider> = counting.clone();
        let ctx = test_support::test_context(client, cloud, true);

        let resource = resource(
            "r1",
            "ns1",
            "t1",
            vec![Parameter {
                name: "a".to_string(),
                description: None,
                secret_name: None,
                value: Some("hello".to_string()),
            }],
        );
        let template = template("t1", Some("1h"), false);

        let first = async {
            server.expect(Method::GET, "cloudtemplates/t1", &template).await;
            server.expect(Method::PATCH, "namespaces/ns1/cloudstatuses/r1", &ok_status()).await;
        };
        let (outcome, _) = tokio::join!(apply(&ctx, &resource), first);
        outcome.expect("first apply succeeds");
        assert_eq!(counting.create_calls(), 1);

        let second = async {
            server.expect(Method::GET, "cloudtemplates/t1", &template).await;
            server.expect(Method::PATCH, "namespaces/ns1/cloudstatuses/r1", &ok_status()).await;
        };
        let (outcome, _) = tokio::join!(apply(&ctx, &resource), second);
        outcome.expect("replayed apply succeeds");
        assert_eq!(counting.create_calls(), 1, "unchanged parameters must not trigger a second create");
    }

    #[tokio::test]
    async fn delete_with_retention_tags_for_later_removal_instead_of_deleting_now() {
        let (client, _server) = test_support::mock_client();
        let cloud: Arc<dyn provider::CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud.clone(), true);

        let resource = resource("r1", "ns1", "t1", Vec::new());
        let template = template("t1", None, false);
        let mut tags = BTreeMap::new();
        tags.insert(provider::tags::PROVIDER_NAME.to_string(), "demo-operator".to_string());
        tags.insert(provider::tags::RETENTION.to_string(), "3600".to_string());
        let stack_name = provider::stack_name("ns1", "r1");
        cloud
            .create(&stack_name, &resource, &template, &CreateOptions { context: BTreeMap::new(), tags })
            .await
            .unwrap();

        let action = cleanup(&ctx, &resource).await.expect("cleanup succeeds");
        assert_eq!(format!("{action:?}"), format!("{:?}", Action::await_change()));

        let stack = cloud.get(&stack_name, &GetOptions::default()).await.unwrap();
        assert!(stack.has_delete_tag());
    }

    #[tokio::test]
    async fn delete_without_retention_deletes_immediately_and_removes_status() {
        let (client, mut server) = test_support::mock_client();
        let cloud: Arc<dyn provider::CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud.clone(), true);

        let resource = resource("r2", "ns1", "t1", Vec::new());
        let template = template("t1", None, false);
        let mut tags = BTreeMap::new();
        tags.insert(provider::tags::PROVIDER_NAME.to_string(), "demo-operator".to_string());
        tags.insert(provider::tags::RETENTION.to_string(), "0".to_string());
        let stack_name = provider::stack_name("ns1", "r2");
        cloud
            .create(&stack_name, &resource, &template, &CreateOptions { context: BTreeMap::new(), tags })
            .await
            .unwrap();

        let responder = async {
            server.expect(Method::DELETE, "namespaces/ns1/cloudstatuses/r2", &CloudStatus::default()).await;
        };

        let (outcome, _) = tokio::join!(cleanup(&ctx, &resource), responder);
        outcome.expect("cleanup succeeds");

        assert!(cloud.exists(&stack_name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn credential_mirroring_upserts_the_mapped_secret() {
        let (client, mut server) = test_support::mock_client();
        let credential = Credential {
            id: "db_user".to_string(),
            user: "AKIA_EXAMPLE".to_string(),
            secret: "sh-secret".to_string(),
        };
        let cloud: Arc<dyn provider::CloudProvider> =
            Arc::new(CredentialStubProvider::new(NullProvider::new("demo-operator".to_string()), vec![credential]));
        let ctx = test_support::test_context(client, cloud, true);

        let mut resource = resource("r1", "ns1", "t1", Vec::new());
        resource.spec.secrets.push(crate::crd::SecretMapping {
            name: "db".to_string(),
            description: None,
            values: vec![
                SecretValue {
                    r#type: SecretValueType::Credential,
                    key: "user".to_string(),
                    value: "db_user.username".to_string(),
                },
                SecretValue {
                    r#type: SecretValueType::Credential,
                    key: "pwd".to_string(),
                    value: "db_user.secret".to_string(),
                },
            ],
        });
        let template = template("t1", Some("1h"), true);

        let responder = async {
            server.expect(Method::GET, "cloudtemplates/t1", &template).await;
            server.expect(Method::PATCH, "namespaces/ns1/cloudstatuses/r1", &ok_status()).await;
            let body = server.expect(Method::PATCH, "namespaces/ns1/secrets/db", &Secret::default()).await;
            let patched: serde_json::Value = serde_json::from_slice(&body).expect("secret patch is json");
            let string_data = patched.get("stringData").expect("stringData present");
            assert_eq!(string_data.get("user").and_then(|v| v.as_str()), Some("AKIA_EXAMPLE"));
            assert_eq!(string_data.get("pwd").and_then(|v| v.as_str()), Some("sh-secret"));
        };

        let (outcome, _) = tokio::join!(apply(&ctx, &resource), responder);
        outcome.expect("apply succeeds");
    }

    #[tokio::test]
    async fn non_leader_reconcile_skips_the_finalizer_without_touching_the_api() {
        let (client, _server) = test_support::mock_client();
        let cloud: Arc<dyn provider::CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud, false);

        let obj = Arc::new(resource("r1", "ns1", "t1", Vec::new()));
        let action = reconcile(obj, ctx).await.expect("reconcile succeeds even when not leading");
        assert_eq!(format!("{action:?}"), format!("{:?}", Action::requeue(Duration::from_secs(30))));
    }

    fn resource_with_params(params: Vec<Parameter>) -> CloudResource {
        CloudResource {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: crate::crd::CloudResourceSpec {
                template_name: "t".to_string(),
                credentials: false,
                parameters: params,
                secrets: Vec::new(),
                retention: None,
            },
        }
    }

    #[test]
    fn checksum_is_stable_and_order_sensitive() {
        let a = resource_with_params(vec![Parameter {
            name: "p".to_string(),
            description: None,
            secret_name: None,
            value: Some("1".to_string()),
        }]);
        let b = resource_with_params(vec![Parameter {
            name: "p".to_string(),
            description: None,
            secret_name: None,
            value: Some("1".to_string()),
        }]);
        let c = resource_with_params(vec![Parameter {
            name: "p".to_string(),
            description: None,
            secret_name: None,
            value: Some("2".to_string()),
        }]);

        assert_eq!(resource_checksum(&a), resource_checksum(&b));
        assert_ne!(resource_checksum(&a), resource_checksum(&c));
    }

    #[test]
    fn template_parameter_missing_from_resource_is_caught_before_secret_lookup() {
        // build_model's first pass over template parameters rejects a
        // required-but-unset parameter before ever touching the kube client,
        // so the has_parameter check alone is what we assert here.
        let resource = resource_with_params(Vec::new());
        assert!(!resource.has_parameter("required"));
    }
}
