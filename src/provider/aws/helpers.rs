//! Stack lookup, ownership checks, status normalisation, and IAM credential
//! minting for the AWS provider.

use std::collections::BTreeMap;
use std::time::Duration;

use aws_sdk_cloudformation::types::{Stack as CfnStack, Tag as CfnTag};
use tracing::debug;

use super::MAX_ACCESS_KEYS;
use crate::provider::{tags, CloudProviderError, Stack, StackSpec, StackState, StackStatus};
use crate::retry::retry;

/// Retrieves a stack plus its raw template body. Maps CloudFormation's
/// "stack does not exist" error message into [`CloudProviderError::StackNotFound`].
pub(super) async fn get_stack(
    client: &aws_sdk_cloudformation::Client,
    name: &str,
) -> Result<(CfnStack, String), CloudProviderError> {
    debug!(stack_name = name, "retrieving cloudformation stack");

    let resp = client
        .describe_stacks()
        .stack_name(name)
        .send()
        .await
        .map_err(|e| {
            if e.to_string().contains("does not exist") {
                CloudProviderError::StackNotFound
            } else {
                CloudProviderError::CloudFormation(e.to_string())
            }
        })?;

    let stack = resp
        .stacks()
        .first()
        .cloned()
        .ok_or(CloudProviderError::StackNotFound)?;

    let template = client
        .get_template()
        .stack_name(name)
        .send()
        .await
        .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

    let body = template.template_body().unwrap_or_default().to_string();

    Ok((stack, body))
}

pub(super) async fn has_stack(
    client: &aws_sdk_cloudformation::Client,
    name: &str,
) -> Result<bool, CloudProviderError> {
    match get_stack(client, name).await {
        Ok(_) => Ok(true),
        Err(CloudProviderError::StackNotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

pub(super) fn is_owned(stack: &CfnStack, provider_name: &str) -> bool {
    let cfn_tags = stack.tags();
    if cfn_tags.is_empty() {
        return false;
    }
    cfn_tags
        .iter()
        .any(|t| t.key() == Some(tags::PROVIDER_NAME) && t.value() == Some(provider_name))
}

pub(super) async fn get_access_token(
    client: &aws_sdk_iam::Client,
    username: &str,
) -> Result<(String, String), CloudProviderError> {
    let existing = client
        .list_access_keys()
        .user_name(username)
        .send()
        .await
        .map_err(|e| CloudProviderError::Iam(e.to_string()))?;

    if existing.access_key_metadata().len() >= MAX_ACCESS_KEYS {
        return Err(CloudProviderError::Iam(format!(
            "user: {username} has reached max number of access keys"
        )));
    }

    let created = client
        .create_access_key()
        .user_name(username)
        .send()
        .await
        .map_err(|e| CloudProviderError::Iam(e.to_string()))?;

    let key = created
        .access_key()
        .ok_or_else(|| CloudProviderError::Iam(format!("no access key returned for user: {username}")))?;

    Ok((
        key.access_key_id().to_string(),
        key.secret_access_key().to_string(),
    ))
}

/// Finds `AWS::IAM::User` physical resource IDs within a stack.
pub(super) async fn find_iam_users(
    client: &aws_sdk_cloudformation::Client,
    stack_name: &str,
) -> Result<Vec<String>, CloudProviderError> {
    let resp = client
        .describe_stack_resources()
        .stack_name(stack_name)
        .send()
        .await
        .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

    Ok(resp
        .stack_resources()
        .iter()
        .filter(|r| r.resource_type() == Some("AWS::IAM::User"))
        .filter_map(|r| r.physical_resource_id().map(str::to_string))
        .collect())
}

pub(super) fn make_stack_tags(values: &BTreeMap<String, String>) -> Vec<CfnTag> {
    values
        .iter()
        .map(|(k, v)| CfnTag::builder().key(k).value(v).build().expect("key/value set"))
        .collect()
}

/// Converts an AWS stack plus its raw template body into our provider-neutral [`Stack`].
pub(super) fn make_stack(stack: &CfnStack, body: String) -> Result<Stack, CloudProviderError> {
    let name = stack.stack_name().unwrap_or_default().to_string();
    let created = stack
        .creation_time()
        .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
        .unwrap_or_else(chrono::Utc::now);

    let mut spec = StackSpec {
        resource_name: String::new(),
        outputs: BTreeMap::new(),
        tags: BTreeMap::new(),
        template: body,
        retention: Duration::from_secs(0),
        delete_on: None,
    };
    let mut namespace = String::new();

    for output in stack.outputs() {
        if let (Some(k), Some(v)) = (output.output_key(), output.output_value()) {
            spec.outputs.insert(k.to_string(), v.to_string());
        }
    }

    for tag in stack.tags() {
        let (Some(key), Some(value)) = (tag.key(), tag.value()) else {
            continue;
        };
        spec.tags.insert(key.to_string(), value.to_string());

        match key {
            tags::DELETION_TIME => {
                let secs: i64 = value
                    .parse()
                    .map_err(|_| CloudProviderError::InvalidStack("cannot convert to deletion time".to_string()))?;
                spec.delete_on = chrono::DateTime::from_timestamp(secs, 0);
            }
            tags::NAMESPACE => namespace = value.to_string(),
            tags::RESOURCE_NAME => spec.resource_name = value.to_string(),
            tags::RETENTION => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| CloudProviderError::InvalidStack("cannot convert to duration".to_string()))?;
                spec.retention = Duration::from_secs(secs);
            }
            tags::TEMPLATE_NAME => spec.template = value.to_string(),
            _ => {}
        }
    }

    let status = normalize_status(stack.stack_status().map(|s| s.as_str()).unwrap_or(""));

    Ok(Stack {
        name,
        namespace,
        created,
        spec,
        status: StackStatus {
            status: Some(status),
            reason: stack.stack_status_reason().unwrap_or_default().to_string(),
        },
    })
}

/// Translates a raw CloudFormation stack status string into our normalised
/// [`StackState`].
///
/// `UPDATE_ROLLBACK_FAILED` maps to `Done`, not `Failed` — that anomaly is
/// carried over unchanged (see DESIGN.md).
pub(super) fn normalize_status(status: &str) -> StackState {
    match status {
        "CREATE_COMPLETE" => StackState::Done,
        "CREATE_IN_PROGRESS" => StackState::InProgress,
        "CREATE_FAILED" => StackState::Failed,
        "DELETE_COMPLETE" => StackState::Done,
        "DELETE_FAILED" => StackState::Failed,
        "DELETE_IN_PROGRESS" => StackState::InProgress,
        "REVIEW_IN_PROGRESS" => StackState::InProgress,
        "ROLLBACK_COMPLETE" => StackState::Done,
        "ROLLBACK_FAILED" => StackState::Failed,
        "ROLLBACK_IN_PROGRESS" => StackState::InProgress,
        "UPDATE_COMPLETE" => StackState::Done,
        "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => StackState::InProgress,
        "UPDATE_IN_PROGRESS" => StackState::InProgress,
        "UPDATE_ROLLBACK_COMPLETE" => StackState::Done,
        "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => StackState::InProgress,
        "UPDATE_ROLLBACK_FAILED" => StackState::Done,
        "UPDATE_ROLLBACK_IN_PROGRESS" => StackState::InProgress,
        _ => StackState::Unknown,
    }
}

/// Discovers the AWS region from the environment, falling back to the EC2
/// instance metadata service.
pub(super) async fn find_region() -> String {
    for var in ["AWS_REGION", "AWS_DEFAULT_REGION"] {
        if let Ok(region) = std::env::var(var) {
            if !region.is_empty() {
                debug!(region, "using the aws region from environment");
                return region;
            }
        }
    }

    let loader = aws_config::imds::Client::builder().build();
    let result = retry(5, Duration::from_secs(5), || async {
        loader
            .get("/latest/meta-data/placement/region")
            .await
            .map_err(|e| e.to_string())
    })
    .await;

    result.unwrap_or_default()
}
