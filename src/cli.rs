//! Command-line configuration, ported from the original `cmd/controller/main.go`
//! flag table onto `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum CloudProviderKind {
    Aws,
    Null,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "cloud-resource-operator", version, about = "Reconciles CloudResource objects against a cloud provider")]
pub struct Config {
    /// Name of this controller instance; written as the ownership tag on every stack it creates.
    #[arg(long, env = "PROVIDER_NAME", default_value = "cloud-resource-operator")]
    pub name: String,

    /// Which cloud provider backend to use.
    #[arg(long, env = "CLOUD_PROVIDER", value_enum, default_value = "aws")]
    pub cloud_provider: CloudProviderKind,

    /// Name of the cluster, used to scope VPC/subnet lookups for the AWS provider.
    #[arg(long, env = "CLUSTER_NAME", default_value = "")]
    pub cluster_name: String,

    /// Namespace the leader election `Lease` is created in.
    #[arg(long, env = "KUBE_NAMESPACE", default_value = "kube-system")]
    pub election_namespace: String,

    /// Listen address for the metrics/health REST surface.
    #[arg(long, env = "METRICS_LISTEN", default_value = "0.0.0.0:9090")]
    pub metrics_listen: String,

    /// Whether to expose the `/metrics` endpoint.
    #[arg(long, env = "ENABLE_METRICS", default_value_t = true)]
    pub enable_metrics: bool,

    /// Informer resync interval.
    #[arg(long, env = "RESYNC_DURATION", value_parser = parse_duration, default_value = "10m")]
    pub resync_duration: Duration,

    /// Deadline for a single stack create/update/delete operation.
    #[arg(long, env = "STACK_TIMEOUT", value_parser = parse_duration, default_value = "30m")]
    pub stack_timeout: Duration,

    /// Number of concurrent reconciles per controller.
    #[arg(long, env = "THREADNESS", default_value_t = 5)]
    pub threadness: usize,

    /// Enables debug-level logging.
    #[arg(long, env = "VERBOSE", default_value_t = false)]
    pub verbose: bool,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}
