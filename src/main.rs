//! cloud-resource-operator entry point.
//!
//! Starts the resource, template and cleanup reconcile loops plus the
//! optional health/metrics REST surface.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloud_resource_operator::cli::{CloudProviderKind, Config};
use cloud_resource_operator::controller::{self, leadership, ReconcilerContext};
use cloud_resource_operator::metrics::Metrics;
use cloud_resource_operator::provider::{aws::AwsProvider, null::NullProvider, CloudProvider, ProviderConfig};
use cloud_resource_operator::{telemetry, Error};

/// Resolves once any of SIGINT, SIGTERM, SIGHUP or SIGQUIT arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sighup.recv() => info!("received SIGHUP"),
            _ = sigquit.recv() => info!("received SIGQUIT"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received SIGINT");
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();

    let default_level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if otel_enabled {
        let otel_layer = telemetry::init_telemetry(&registry);
        registry.with(otel_layer).init();
        info!("OpenTelemetry tracing initialized");
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!("starting cloud-resource-operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("connected to kubernetes cluster");

    let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    info!(%holder_id, "leader election identity");

    let leadership = leadership::spawn(
        client.clone(),
        &config.election_namespace,
        holder_id,
        "cloud-resource-operator",
    );

    let cloud: Arc<dyn CloudProvider> = match config.cloud_provider {
        CloudProviderKind::Aws => {
            let provider_config = ProviderConfig {
                cluster_name: config.cluster_name.clone(),
                region: std::env::var("AWS_REGION").unwrap_or_default(),
                name: config.name.clone(),
            };
            Arc::new(AwsProvider::new(provider_config).await?)
        }
        CloudProviderKind::Null => Arc::new(NullProvider::new(config.name.clone())),
    };

    let metrics = if config.enable_metrics { Some(Metrics::default()) } else { None };

    let ctx = Arc::new(ReconcilerContext {
        client: client.clone(),
        cloud,
        leadership,
        metrics,
        provider_name: config.name.clone(),
        stack_timeout: config.stack_timeout,
        max_concurrent_reconciles: config.threadness,
    });

    let mut resources_handle = tokio::spawn(controller::resources::run(ctx.clone()));
    let mut templates_handle = tokio::spawn(controller::templates::run(ctx.clone()));
    let mut cleanup_handle = tokio::spawn(controller::cleanup::run(ctx.clone()));

    #[cfg(feature = "rest-api")]
    let api_handle = if config.enable_metrics {
        let api_ctx = ctx.clone();
        let listen = config.metrics_listen.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = cloud_resource_operator::rest_api::run_server(api_ctx, &listen).await {
                tracing::error!(error = ?e, "health/metrics server exited with an error");
            }
        }))
    } else {
        None
    };

    let result = tokio::select! {
        res = &mut resources_handle => res.map_err(|e| Error::ConfigError(format!("resource controller panicked: {e}")))?,
        res = &mut templates_handle => res.map_err(|e| Error::ConfigError(format!("template controller panicked: {e}")))?,
        res = &mut cleanup_handle => res.map_err(|e| Error::ConfigError(format!("cleanup loop panicked: {e}")))?,
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining workers");
            let drain = tokio::time::timeout(
                std::time::Duration::from_secs(600),
                futures::future::join3(&mut resources_handle, &mut templates_handle, &mut cleanup_handle),
            )
            .await;

            match drain {
                Ok((res, tes, ces)) => {
                    res.map_err(|e| Error::ConfigError(format!("resource controller panicked: {e}")))??;
                    tes.map_err(|e| Error::ConfigError(format!("template controller panicked: {e}")))??;
                    ces.map_err(|e| Error::ConfigError(format!("cleanup loop panicked: {e}")))?
                }
                Err(_) => {
                    error!("workers did not drain within 10 minutes, aborting");
                    resources_handle.abort();
                    templates_handle.abort();
                    cleanup_handle.abort();
                    Ok(())
                }
            }
        }
    };

    #[cfg(feature = "rest-api")]
    if let Some(handle) = api_handle {
        handle.abort();
    }

    telemetry::shutdown_telemetry();

    result
}
