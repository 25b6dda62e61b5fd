//! Small Kubernetes CRUD helpers shared by the controllers: looking up a
//! `CloudTemplate`, finding/updating a mirrored `Secret`, and writing a
//! `CloudStatus`.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;

use crate::crd::{CloudStatus, CloudStatusSpec, CloudTemplate};
use crate::error::{Error, Result};
use crate::retry::retry;

const FIELD_MANAGER: &str = "cloud-resource-operator";

pub async fn find_cloud_template(client: &Client, name: &str) -> Result<CloudTemplate> {
    let api: Api<CloudTemplate> = Api::all(client.clone());
    retry(3, Duration::from_secs(1), || async { api.get(name).await }).await.map_err(Error::from)
}

/// Writes (creates or replaces) the `Secret` named `name` in `namespace` with
/// the given string data, owned by the given `CloudResource`'s UID so it is
/// garbage-collected alongside it.
pub async fn update_kubernetes_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    owner: &ObjectMeta,
    owner_api_version: &str,
    owner_kind: &str,
    data: BTreeMap<String, String>,
) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let owner_ref = owner
        .uid
        .as_ref()
        .map(|uid| {
            vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: owner_api_version.to_string(),
                kind: owner_kind.to_string(),
                name: owner.name.clone().unwrap_or_default(),
                uid: uid.clone(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]
        })
        .unwrap_or_default();

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(owner_ref),
            ..Default::default()
        },
        string_data: Some(data.into_iter().collect()),
        ..Default::default()
    };

    retry(3, Duration::from_secs(2), || async {
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
    })
    .await
    .map_err(Error::from)?;

    Ok(())
}

pub async fn find_kubernetes_secret(client: &Client, namespace: &str, name: &str) -> Result<Option<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(secret) => Ok(Some(secret)),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(err) => Err(Error::from(err)),
    }
}

/// Creates or replaces the `CloudStatus` mirroring a `CloudResource`'s current
/// reconcile outcome. `CloudStatus` has no status subresource: all fields
/// live on `.spec` and a normal `Patch::Apply` updates them in one call.
pub async fn update_cloud_status(
    client: &Client,
    namespace: &str,
    name: &str,
    owner: &ObjectMeta,
    status: CloudStatusSpec,
) -> Result<()> {
    let api: Api<CloudStatus> = Api::namespaced(client.clone(), namespace);

    let owner_ref = owner.uid.as_ref().map(|uid| {
        vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
            api_version: "cloud.appvia.io/v1".to_string(),
            kind: "CloudResource".to_string(),
            name: owner.name.clone().unwrap_or_default(),
            uid: uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]
    });

    let object = CloudStatus {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner_ref,
            ..Default::default()
        },
        spec: status,
    };

    retry(3, Duration::from_secs(2), || async {
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await
    })
    .await
    .map_err(Error::from)?;

    Ok(())
}

pub async fn delete_cloud_status(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<CloudStatus> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(Error::from(err)),
    }
}
