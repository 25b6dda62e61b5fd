//! In-memory test-double provider. Creates complete immediately, waits
//! return immediately, nothing ever talks to a real cloud API. This is the
//! primary fixture the reconciler test suite runs against.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::crd::{CloudResource, CloudTemplate};

use super::{
    tags, CloudProvider, CloudProviderError, CreateOptions, Credential, DeleteOptions, GetOptions,
    ListOptions, Stack, StackSpec, StackState, StackStatus, WaitOptions,
};

pub struct NullProvider {
    name: String,
    stacks: Mutex<BTreeMap<String, Stack>>,
}

impl NullProvider {
    pub fn new(name: String) -> Self {
        info!(name, "creating a new null cloud provider");
        Self {
            name,
            stacks: Mutex::new(BTreeMap::new()),
        }
    }

    fn get_locked(&self, name: &str) -> Result<Stack, CloudProviderError> {
        self.stacks
            .lock()
            .expect("null provider lock poisoned")
            .get(name)
            .cloned()
            .ok_or(CloudProviderError::StackNotFound)
    }
}

#[async_trait]
impl CloudProvider for NullProvider {
    async fn credentials(&self, _stack_name: &str) -> Result<Vec<Credential>, CloudProviderError> {
        Ok(Vec::new())
    }

    async fn create(
        &self,
        stack_name: &str,
        resource: &CloudResource,
        template: &CloudTemplate,
        options: &CreateOptions,
    ) -> Result<(), CloudProviderError> {
        info!(stack_name, resource = %resource.metadata.name.clone().unwrap_or_default(), "creating a new stack");

        let retention = options
            .tags
            .get(tags::RETENTION)
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs)
            .unwrap_or_default();

        let delete_on = options
            .tags
            .get(tags::DELETION_TIME)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));

        let stack = Stack {
            name: stack_name.to_string(),
            namespace: resource.metadata.namespace.clone().unwrap_or_default(),
            created: Utc::now(),
            spec: StackSpec {
                resource_name: resource.metadata.name.clone().unwrap_or_default(),
                outputs: BTreeMap::new(),
                tags: options.tags.clone(),
                template: template.metadata.name.clone().unwrap_or_default(),
                retention,
                delete_on,
            },
            status: StackStatus {
                status: Some(StackState::Done),
                reason: String::new(),
            },
        };

        self.stacks
            .lock()
            .expect("null provider lock poisoned")
            .insert(stack_name.to_string(), stack);

        Ok(())
    }

    async fn delete(
        &self,
        stack_name: &str,
        _options: &DeleteOptions,
    ) -> Result<(), CloudProviderError> {
        info!(stack_name, "deleting the stack");
        let mut stacks = self.stacks.lock().expect("null provider lock poisoned");
        let Some(stack) = stacks.get(stack_name) else {
            return Ok(());
        };
        if !stack.is_owned_by(&self.name) {
            return Err(CloudProviderError::Unauthorized);
        }
        stacks.remove(stack_name);
        Ok(())
    }

    async fn exists(&self, stack_name: &str) -> Result<Option<Stack>, CloudProviderError> {
        match self.get_locked(stack_name) {
            Ok(stack) => Ok(Some(stack)),
            Err(CloudProviderError::StackNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get(&self, stack_name: &str, _options: &GetOptions) -> Result<Stack, CloudProviderError> {
        self.get_locked(stack_name)
    }

    async fn list(&self, _options: &ListOptions) -> Result<Vec<Stack>, CloudProviderError> {
        Ok(self
            .stacks
            .lock()
            .expect("null provider lock poisoned")
            .values()
            .filter(|stack| stack.is_owned_by(&self.name))
            .cloned()
            .collect())
    }

    async fn logs(&self, stack_name: &str, _options: &GetOptions) -> Result<String, CloudProviderError> {
        self.get_locked(stack_name)?;
        Ok(String::new())
    }

    async fn status(
        &self,
        stack_name: &str,
        _options: &GetOptions,
    ) -> Result<StackState, CloudProviderError> {
        Ok(self
            .get_locked(stack_name)?
            .status
            .status
            .unwrap_or(StackState::Unknown))
    }

    async fn update_tags(
        &self,
        stack_name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), CloudProviderError> {
        let mut stacks = self.stacks.lock().expect("null provider lock poisoned");
        let stack = stacks
            .get_mut(stack_name)
            .ok_or(CloudProviderError::StackNotFound)?;
        for (k, v) in tags {
            stack.spec.tags.insert(k.clone(), v.clone());
        }
        if let Some(removal) = stack.spec.tags.get(tags::DELETION_TIME) {
            if let Ok(secs) = removal.parse::<i64>() {
                stack.spec.delete_on = chrono::DateTime::from_timestamp(secs, 0);
            }
        }
        Ok(())
    }

    async fn wait(
        &self,
        _stack_name: &str,
        _options: &WaitOptions,
    ) -> Result<StackState, CloudProviderError> {
        Ok(StackState::Done)
    }
}
