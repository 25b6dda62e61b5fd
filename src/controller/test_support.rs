//! Shared fixture for controller integration tests: a mocked Kubernetes API
//! server driven one request at a time, plus a `ReconcilerContext` wired to
//! it and to an always-leader `Leadership` handle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use tower_test::mock;

use crate::crd::{CloudResource, CloudTemplate};
use crate::metrics::Metrics;
use crate::provider::{
    CloudProvider, CloudProviderError, CreateOptions, Credential, DeleteOptions, GetOptions, ListOptions, Stack,
    StackState, WaitOptions,
};

use super::leadership::Leadership;
use super::ReconcilerContext;

pub type ApiHandle = mock::Handle<Request<Body>, Response<Body>>;

/// Scripts the request/response exchange a controller call is expected to
/// make against the Kubernetes API, one call at a time. A request the test
/// doesn't drain leaves the controller awaiting a response until the test's
/// own timeout fires, which is how a missing or surplus call is caught.
pub struct ApiServer(ApiHandle);

impl ApiServer {
    /// Waits for the next request, asserts its method and that its path
    /// contains `path_contains`, then responds with `body` JSON-encoded.
    /// Returns the request body so the caller can inspect what was sent.
    pub async fn expect<T: serde::Serialize>(&mut self, method: Method, path_contains: &str, body: &T) -> Bytes {
        let (request, send) = self.0.next_request().await.expect("api server was not called");
        assert_eq!(request.method(), method, "unexpected method for {}", request.uri());
        assert!(
            request.uri().path().contains(path_contains),
            "expected a path containing {path_contains:?}, got {}",
            request.uri()
        );
        let received = request.into_body().collect().await.expect("request body is readable").to_bytes();
        let response = serde_json::to_vec(body).expect("response body serializes");
        send.send_response(Response::builder().status(200).body(Body::from(response)).unwrap());
        received
    }
}

pub fn mock_client() -> (Client, ApiServer) {
    let (service, handle) = mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(service, "default"), ApiServer(handle))
}

pub fn test_context(client: Client, cloud: Arc<dyn CloudProvider>, is_leader: bool) -> Arc<ReconcilerContext> {
    Arc::new(ReconcilerContext {
        client,
        cloud,
        leadership: Leadership::for_test(is_leader),
        metrics: Some(Metrics::default()),
        provider_name: "demo-operator".to_string(),
        stack_timeout: Duration::from_secs(30),
        max_concurrent_reconciles: 1,
    })
}

/// Wraps a [`CloudProvider`] and counts `create` invocations, so a test can
/// assert a no-op reconcile didn't re-create the stack.
pub struct CountingProvider<P> {
    inner: P,
    pub creates: AtomicUsize,
}

impl<P> CountingProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: CloudProvider> CloudProvider for CountingProvider<P> {
    async fn credentials(&self, stack_name: &str) -> Result<Vec<Credential>, CloudProviderError> {
        self.inner.credentials(stack_name).await
    }

    async fn create(
        &self,
        stack_name: &str,
        resource: &CloudResource,
        template: &CloudTemplate,
        options: &CreateOptions,
    ) -> Result<(), CloudProviderError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(stack_name, resource, template, options).await
    }

    async fn delete(&self, stack_name: &str, options: &DeleteOptions) -> Result<(), CloudProviderError> {
        self.inner.delete(stack_name, options).await
    }

    async fn exists(&self, stack_name: &str) -> Result<Option<Stack>, CloudProviderError> {
        self.inner.exists(stack_name).await
    }

    async fn get(&self, stack_name: &str, options: &GetOptions) -> Result<Stack, CloudProviderError> {
        self.inner.get(stack_name, options).await
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<Stack>, CloudProviderError> {
        self.inner.list(options).await
    }

    async fn logs(&self, stack_name: &str, options: &GetOptions) -> Result<String, CloudProviderError> {
        self.inner.logs(stack_name, options).await
    }

    async fn status(&self, stack_name: &str, options: &GetOptions) -> Result<StackState, CloudProviderError> {
        self.inner.status(stack_name, options).await
    }

    async fn update_tags(&self, stack_name: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudProviderError> {
        self.inner.update_tags(stack_name, tags).await
    }

    async fn wait(&self, stack_name: &str, options: &WaitOptions) -> Result<StackState, CloudProviderError> {
        self.inner.wait(stack_name, options).await
    }
}

/// Wraps a [`CloudProvider`] and returns a fixed set of credentials instead
/// of delegating, so a test can exercise credential mirroring without the
/// AWS provider's IAM key-minting.
pub struct CredentialStubProvider<P> {
    inner: P,
    credentials: Vec<Credential>,
}

impl<P> CredentialStubProvider<P> {
    pub fn new(inner: P, credentials: Vec<Credential>) -> Self {
        Self { inner, credentials }
    }
}

#[async_trait]
impl<P: CloudProvider> CloudProvider for CredentialStubProvider<P> {
    async fn credentials(&self, _stack_name: &str) -> Result<Vec<Credential>, CloudProviderError> {
        Ok(self.credentials.clone())
    }

    async fn create(
        &self,
        stack_name: &str,
        resource: &CloudResource,
        template: &CloudTemplate,
        options: &CreateOptions,
    ) -> Result<(), CloudProviderError> {
        self.inner.create(stack_name, resource, template, options).await
    }

    async fn delete(&self, stack_name: &str, options: &DeleteOptions) -> Result<(), CloudProviderError> {
        self.inner.delete(stack_name, options).await
    }

    async fn exists(&self, stack_name: &str) -> Result<Option<Stack>, CloudProviderError> {
        self.inner.exists(stack_name).await
    }

    async fn get(&self, stack_name: &str, options: &GetOptions) -> Result<Stack, CloudProviderError> {
        self.inner.get(stack_name, options).await
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<Stack>, CloudProviderError> {
        self.inner.list(options).await
    }

    async fn logs(&self, stack_name: &str, options: &GetOptions) -> Result<String, CloudProviderError> {
        self.inner.logs(stack_name, options).await
    }

    async fn status(&self, stack_name: &str, options: &GetOptions) -> Result<StackState, CloudProviderError> {
        self.inner.status(stack_name, options).await
    }

    async fn update_tags(&self, stack_name: &str, tags: &BTreeMap<String, String>) -> Result<(), CloudProviderError> {
        self.inner.update_tags(stack_name, tags).await
    }

    async fn wait(&self, stack_name: &str, options: &WaitOptions) -> Result<StackState, CloudProviderError> {
        self.inner.wait(stack_name, options).await
    }
}
