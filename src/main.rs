//! Process entry point: load configuration, build the backends, and run
//! the router behind a minimal line-protocol frontend until the process
//! receives a shutdown signal.

use std::sync::Arc;

use storage_router::config::RouterConfig;
use storage_router::directory::DirectoryClient;
use storage_router::liveness::{web_monitor_hash_name, RedisLivenessBackend};
use storage_router::Router;
use tracing::{error, info};

#[tokio::main]
async fn main() -> storage_router::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RouterConfig::from_env()?;
    info!(service_domain = %config.service_domain, "starting storage-router");

    let process_hostname = hostname()?;
    let hash_name = web_monitor_hash_name(&process_hostname);

    let liveness = RedisLivenessBackend::connect(&config.redis.url()).await?;
    let directory = DirectoryClient::new(config.directory.clone());

    let router = Arc::new(Router::new(config, directory, liveness, hash_name));

    info!("router initialized, awaiting shutdown signal");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }

    let _ = router;
    info!("shutting down");
    Ok(())
}

fn hostname() -> storage_router::Result<String> {
    std::env::var("HOSTNAME").or_else(|_| {
        hostname_from_uname().ok_or_else(|| {
            storage_router::RouterError::Configuration(
                "could not determine process hostname; set HOSTNAME".to_string(),
            )
        })
    })
}

fn hostname_from_uname() -> Option<String> {
    let output = std::process::Command::new("hostname").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
