//! The three reconcile loops (`resources`, `templates`, `cleanup`) plus
//! leader election, all sharing a [`ReconcilerContext`].

pub mod cleanup;
pub mod leadership;
pub mod resources;
#[cfg(test)]
pub(crate) mod test_support;
pub mod templates;

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::metrics::Metrics;
use crate::provider::CloudProvider;

use self::leadership::Leadership;

/// Shared state every controller loop is constructed with.
pub struct ReconcilerContext {
    pub client: Client,
    pub cloud: Arc<dyn CloudProvider>,
    pub leadership: Leadership,
    pub metrics: Option<Metrics>,
    pub provider_name: String,
    pub stack_timeout: Duration,
    pub max_concurrent_reconciles: usize,
}
