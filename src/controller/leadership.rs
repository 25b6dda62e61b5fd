//! Leader election. Only the elected replica runs side-effecting
//! reconciles; the others keep their informer caches warm and no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tracing::{info, warn};

const LEASE_TTL: Duration = Duration::from_secs(10);
const RENEW_PERIOD: Duration = Duration::from_secs(5);

/// Cloneable leadership query handle. Cheap to pass around; every
/// side-effecting controller path checks `is_leader()` before acting.
#[derive(Clone)]
pub struct Leadership {
    leading: Arc<AtomicBool>,
}

impl Leadership {
    pub fn is_leader(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    /// Builds a handle with a fixed leadership state, bypassing the
    /// acquire/renew loop. Used by controller tests.
    #[cfg(test)]
    pub(crate) fn for_test(leading: bool) -> Self {
        Self {
            leading: Arc::new(AtomicBool::new(leading)),
        }
    }
}

/// Starts the acquire/renew loop as a background task and returns a handle
/// to query the current leadership state. The loop never stops on its own;
/// it runs for the lifetime of the process.
pub fn spawn(client: Client, namespace: &str, holder_id: String, endpoint: &str) -> Leadership {
    let leading = Arc::new(AtomicBool::new(false));
    let handle = Leadership {
        leading: leading.clone(),
    };

    let lock = LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: format!("{endpoint}-leader"),
            lease_ttl: LEASE_TTL,
        },
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RENEW_PERIOD);
        loop {
            ticker.tick().await;
            match lock.try_acquire_or_renew().await {
                Ok(lease) => {
                    let was_leader = leading.swap(lease.acquired_lease, Ordering::SeqCst);
                    if lease.acquired_lease && !was_leader {
                        info!("acquired leadership");
                    } else if !lease.acquired_lease && was_leader {
                        warn!("lost leadership");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "leader election renew failed");
                    leading.store(false, Ordering::SeqCst);
                }
            }
        }
    });

    handle
}
