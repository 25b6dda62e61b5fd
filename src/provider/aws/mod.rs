//! AWS CloudFormation-backed [`CloudProvider`] implementation.

mod helpers;
mod template;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::crd::{CloudResource, CloudTemplate, TemplateFormat};

use super::{
    CloudProvider, CloudProviderError, CreateOptions, Credential, DeleteOptions, GetOptions,
    ListOptions, ProviderConfig, Stack, StackState, WaitOptions,
};

pub(crate) const MAX_ACCESS_KEYS: usize = 2;

/// CloudFormation-backed provider. One instance per controller process.
pub struct AwsProvider {
    pub(crate) cloudformation: aws_sdk_cloudformation::Client,
    pub(crate) iam: aws_sdk_iam::Client,
    pub(crate) ec2: aws_sdk_ec2::Client,
    pub(crate) config: ProviderConfig,
}

impl AwsProvider {
    pub async fn new(mut config: ProviderConfig) -> Result<Self, CloudProviderError> {
        if config.cluster_name.is_empty() {
            return Err(CloudProviderError::Config(
                "you have not set the clustername".to_string(),
            ));
        }
        if config.name.is_empty() {
            return Err(CloudProviderError::Config(
                "you have not set the provider name".to_string(),
            ));
        }

        if config.region.is_empty() {
            debug!("no aws region has been specified, using the metadata service or environment variables");
            config.region = helpers::find_region().await;
        }
        if config.region.is_empty() {
            return Err(CloudProviderError::Config(
                "you must specify the aws region, no metadata service available".to_string(),
            ));
        }

        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_cloudformation::config::Region::new(config.region.clone()))
            .load()
            .await;

        Ok(Self {
            cloudformation: aws_sdk_cloudformation::Client::new(&shared_config),
            iam: aws_sdk_iam::Client::new(&shared_config),
            ec2: aws_sdk_ec2::Client::new(&shared_config),
            config,
        })
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    async fn credentials(&self, stack_name: &str) -> Result<Vec<Credential>, CloudProviderError> {
        let users = helpers::find_iam_users(&self.cloudformation, stack_name).await?;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut list = Vec::with_capacity(users.len());
        for user in users {
            let (access, secret) = helpers::get_access_token(&self.iam, &user).await?;
            list.push(Credential {
                id: user,
                user: access,
                secret,
            });
        }

        Ok(list)
    }

    async fn create(
        &self,
        stack_name: &str,
        _resource: &CloudResource,
        template: &CloudTemplate,
        options: &CreateOptions,
    ) -> Result<(), CloudProviderError> {
        let rendered = template::render(&self.ec2, &self.config, &options.context, &template.spec.content).await?;

        self.cloudformation
            .validate_template()
            .template_body(&rendered)
            .send()
            .await
            .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

        let found = helpers::has_stack(&self.cloudformation, stack_name).await?;

        let body = if matches!(template.spec.format, TemplateFormat::Yaml) {
            let value: serde_yaml::Value = serde_yaml::from_str(&rendered)
                .map_err(|e| CloudProviderError::Template(format!("invalid yaml template: {e}")))?;
            serde_json::to_string(&value)
                .map_err(|e| CloudProviderError::Template(format!("unable to convert yaml to json format: {e}")))?
        } else {
            rendered
        };

        let tags = helpers::make_stack_tags(&options.tags);

        if !found {
            self.cloudformation
                .create_stack()
                .stack_name(stack_name)
                .capabilities(aws_sdk_cloudformation::types::Capability::CapabilityIam)
                .disable_rollback(true)
                .enable_termination_protection(true)
                .template_body(&body)
                .set_tags(Some(tags))
                .send()
                .await
                .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;
        } else {
            self.cloudformation
                .update_stack()
                .stack_name(stack_name)
                .template_body(&body)
                .set_tags(Some(tags))
                .send()
                .await
                .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;
        }

        Ok(())
    }

    async fn delete(&self, stack_name: &str, _options: &DeleteOptions) -> Result<(), CloudProviderError> {
        let stack = match helpers::get_stack(&self.cloudformation, stack_name).await {
            Ok(stack) => stack,
            Err(CloudProviderError::StackNotFound) => return Ok(()),
            Err(err) => return Err(err),
        };

        if !helpers::is_owned(&stack.0, &self.config.name) {
            return Err(CloudProviderError::Unauthorized);
        }

        self.cloudformation
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

        Ok(())
    }

    async fn exists(&self, stack_name: &str) -> Result<Option<Stack>, CloudProviderError> {
        match self.get(stack_name, &GetOptions::default()).await {
            Ok(stack) => Ok(Some(stack)),
            Err(CloudProviderError::StackNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, stack_name: &str, _options: &GetOptions) -> Result<Stack, CloudProviderError> {
        let (stack, body) = helpers::get_stack(&self.cloudformation, stack_name).await?;
        helpers::make_stack(&stack, body)
    }

    async fn list(&self, _options: &ListOptions) -> Result<Vec<Stack>, CloudProviderError> {
        let resp = self
            .cloudformation
            .list_stacks()
            .send()
            .await
            .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

        let mut list = Vec::new();
        for summary in resp.stack_summaries() {
            let Some(name) = summary.stack_name() else {
                continue;
            };
            let (stack, body) = helpers::get_stack(&self.cloudformation, name).await?;
            if !helpers::is_owned(&stack, &self.config.name) {
                continue;
            }
            list.push(helpers::make_stack(&stack, body)?);
        }

        Ok(list)
    }

    async fn logs(&self, stack_name: &str, _options: &GetOptions) -> Result<String, CloudProviderError> {
        helpers::get_stack(&self.cloudformation, stack_name).await?;
        // CloudFormation has no "logs" concept of its own; stack events stand in.
        let resp = self
            .cloudformation
            .describe_stack_events()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

        let lines: Vec<String> = resp
            .stack_events()
            .iter()
            .map(|event| {
                format!(
                    "{} {} {}",
                    event.timestamp().map(|t| t.to_string()).unwrap_or_default(),
                    event.resource_status().map(|s| s.as_str()).unwrap_or(""),
                    event.resource_status_reason().unwrap_or("")
                )
            })
            .collect();

        Ok(lines.join("\n"))
    }

    async fn status(&self, stack_name: &str, _options: &GetOptions) -> Result<StackState, CloudProviderError> {
        let (stack, _) = helpers::get_stack(&self.cloudformation, stack_name).await?;
        Ok(helpers::normalize_status(
            stack.stack_status().map(|s| s.as_str()).unwrap_or(""),
        ))
    }

    async fn update_tags(&self, stack_name: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudProviderError> {
        self.cloudformation
            .update_stack()
            .stack_name(stack_name)
            .set_tags(Some(helpers::make_stack_tags(tags)))
            .send()
            .await
            .map_err(|e| CloudProviderError::CloudFormation(e.to_string()))?;

        Ok(())
    }

    async fn wait(&self, stack_name: &str, options: &WaitOptions) -> Result<StackState, CloudProviderError> {
        let interval = options.check_interval.unwrap_or(Duration::from_secs(5));

        if !helpers::has_stack(&self.cloudformation, stack_name).await? {
            return Err(CloudProviderError::StackNotFound);
        }

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let status = self.status(stack_name, &GetOptions::default()).await?;
            if status != StackState::InProgress {
                return Ok(status);
            }
        }
    }
}
