//! `CloudTemplate` validator: watches templates, validates them, and writes
//! the `Ok`/`Invalid` status back. Deletes are ignored — templates own no
//! child Kubernetes objects and need no cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::{
    controller::{Action, Controller},
    watcher::Config as WatcherConfig,
};
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::crd::{CloudTemplate, CloudTemplateStatus};
use crate::error::{Error, Result};
use crate::retry::retry;

use super::ReconcilerContext;

const FIELD_MANAGER: &str = "cloud-resource-operator";

pub async fn run(ctx: Arc<ReconcilerContext>) -> Result<()> {
    let api: Api<CloudTemplate> = Api::all(ctx.client.clone());

    api.list(&Default::default())
        .await
        .map_err(|_| Error::ConfigError("CloudTemplate CRD not installed".to_string()))?;

    let concurrency = ctx.max_concurrent_reconciles.max(1);

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each_concurrent(concurrency, |res| async move {
            match res {
                Ok(obj) => debug!(?obj, "reconciled cloud template"),
                Err(err) => error!(error = %err, "cloud template reconcile failed"),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx, obj), fields(name = %obj.name_any()))]
async fn reconcile(obj: Arc<CloudTemplate>, ctx: Arc<ReconcilerContext>) -> Result<Action> {
    if !ctx.leadership.is_leader() {
        debug!("skipping template validation, not the leader");
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    let errors = obj.validation_errors();
    let status = if errors.is_empty() {
        CloudTemplateStatus {
            status: "OK".to_string(),
            message: String::new(),
            reason: String::new(),
        }
    } else {
        CloudTemplateStatus {
            status: "Invalid".to_string(),
            message: "The cloud template specification is invalid".to_string(),
            reason: errors.join(", "),
        }
    };

    info!(status = %status.status, "validated cloud template");

    let api: Api<CloudTemplate> = Api::all(ctx.client.clone());
    let name = obj.name_any();
    let patch = serde_json::json!({ "status": status });

    retry(5, Duration::from_secs(3), || async {
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
            .await
    })
    .await
    .map_err(Error::from)?;

    Ok(Action::requeue(Duration::from_secs(600)))
}

fn error_policy(_obj: Arc<CloudTemplate>, error: &Error, _ctx: Arc<ReconcilerContext>) -> Action {
    error!(error = %error, "cloud template reconcile error");
    Action::requeue(Duration::from_secs(60))
}
