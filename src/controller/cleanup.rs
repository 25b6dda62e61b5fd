//! Retention sweeper: a free-standing 30s ticker that tears down stacks
//! whose deferred-deletion tag has expired.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::kube_utils;
use crate::provider::{DeleteOptions, ListOptions, StackState};
use crate::retry::retry;

use super::ReconcilerContext;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(ctx: Arc<ReconcilerContext>) -> Result<()> {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&ctx).await {
            error!(error = %err, "cleanup sweep failed");
            if let Some(metrics) = &ctx.metrics {
                metrics.cleanup_errors.inc();
            }
        }
    }
}

pub(crate) async fn sweep(ctx: &ReconcilerContext) -> Result<()> {
    if !ctx.leadership.is_leader() {
        debug!("skipping cleanup sweep, not the leader");
        return Ok(());
    }

    let _timer = ctx.metrics.as_ref().map(|m| m.measure_cleanup());

    let stacks = ctx.cloud.list(&ListOptions::default()).await?;

    for stack in stacks {
        if !stack.has_delete_tag() {
            continue;
        }
        if !stack.requires_deletion() {
            debug!(stack = %stack.name, "stack scheduled for deletion but not due yet");
            continue;
        }
        match stack.status.status {
            Some(StackState::Done) | Some(StackState::Failed) => {}
            other => {
                info!(stack = %stack.name, status = ?other, "refusing to delete stack due to current status");
                continue;
            }
        }

        info!(stack = %stack.name, resource = %stack.spec.resource_name, "stack is scheduled for deletion, deleting now");

        let name = stack.name.clone();
        let namespace = stack.namespace.clone();
        let resource_name = stack.spec.resource_name.clone();

        let result = retry(3, Duration::from_secs(10), || async {
            ctx.cloud.delete(&name, &DeleteOptions::default()).await
        })
        .await;

        if let Err(err) = result {
            error!(stack = %stack.name, error = %err, "unable to delete stack");
            continue;
        }

        if let Err(err) = kube_utils::delete_cloud_status(&ctx.client, &namespace, &resource_name).await {
            error!(stack = %stack.name, error = %err, "unable to delete cloud status");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support;
    use crate::provider::{null::NullProvider, tags, CloudProvider, CreateOptions};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn resource(name: &str, ns: &str) -> crate::crd::CloudResource {
        crate::crd::CloudResource {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: crate::crd::CloudResourceSpec {
                template_name: "t".to_string(),
                credentials: false,
                parameters: Vec::new(),
                secrets: Vec::new(),
                retention: None,
            },
        }
    }

    fn template(name: &str) -> crate::crd::CloudTemplate {
        crate::crd::CloudTemplate {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: crate::crd::CloudTemplateSpec {
                content: "{}".to_string(),
                format: crate::crd::TemplateFormat::Json,
                credentials: false,
                parameters: Vec::new(),
                secrets: Vec::new(),
                retention: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn non_leader_sweep_does_not_touch_any_stack() {
        let (client, _server) = test_support::mock_client();
        let cloud: Arc<dyn CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud.clone(), false);

        let r = resource("r1", "ns1");
        let t = template("t1");
        let mut tags_map = BTreeMap::new();
        tags_map.insert(tags::PROVIDER_NAME.to_string(), "demo-operator".to_string());
        tags_map.insert(tags::DELETION_TIME.to_string(), "1".to_string());
        cloud
            .create("stacks_ns1_r1", &r, &t, &CreateOptions { context: BTreeMap::new(), tags: tags_map })
            .await
            .unwrap();

        sweep(&ctx).await.expect("sweep succeeds even when not leading");

        assert!(cloud.exists("stacks_ns1_r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_owned_stacks() {
        let (client, mut server) = test_support::mock_client();
        let cloud: Arc<dyn CloudProvider> = Arc::new(NullProvider::new("demo-operator".to_string()));
        let ctx = test_support::test_context(client, cloud.clone(), true);

        let r = resource("r1", "ns1");
        let t = template("t1");

        let mut expired_tags = BTreeMap::new();
        expired_tags.insert(tags::PROVIDER_NAME.to_string(), "demo-operator".to_string());
        expired_tags.insert(tags::DELETION_TIME.to_string(), "1".to_string());
        cloud
            .create("stacks_ns1_r1", &r, &t, &CreateOptions { context: BTreeMap::new(), tags: expired_tags })
            .await
            .unwrap();

        let mut not_due_tags = BTreeMap::new();
        not_due_tags.insert(tags::PROVIDER_NAME.to_string(), "demo-operator".to_string());
        not_due_tags.insert(
            tags::DELETION_TIME.to_string(),
            (chrono::Utc::now().timestamp() + 3600).to_string(),
        );
        cloud
            .create("stacks_ns1_r2", &r, &t, &CreateOptions { context: BTreeMap::new(), tags: not_due_tags })
            .await
            .unwrap();

        let mut other_owner_tags = BTreeMap::new();
        other_owner_tags.insert(tags::PROVIDER_NAME.to_string(), "other-operator".to_string());
        other_owner_tags.insert(tags::DELETION_TIME.to_string(), "1".to_string());
        cloud
            .create("stacks_ns1_r3", &r, &t, &CreateOptions { context: BTreeMap::new(), tags: other_owner_tags })
            .await
            .unwrap();

        let responder = async {
            server.expect(http::Method::DELETE, "namespaces/ns1/cloudstatuses/r1", &crate::crd::CloudStatus::default()).await;
        };

        let (outcome, _) = tokio::join!(sweep(&ctx), responder);
        outcome.expect("sweep succeeds");

        assert!(cloud.exists("stacks_ns1_r1").await.unwrap().is_none(), "expired owned stack must be deleted");
        assert!(cloud.exists("stacks_ns1_r2").await.unwrap().is_some(), "not-yet-due stack must survive");
        assert!(
            cloud.exists("stacks_ns1_r3").await.unwrap().is_some(),
            "stack owned by a different provider must never be listed for sweeping"
        );
    }
}
