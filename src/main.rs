use clawgate::admin::AdminApi;
use clawgate::backend::BackendCli;
use clawgate::config::Config;
use clawgate::pool::GatewayPool;
use clawgate::ratelimit::{RateLimiter, ADMIN_MAX_ATTEMPTS, ADMIN_WINDOW, SWEEP_INTERVAL};
use clawgate::ready::DEFAULT_READY_TIMEOUT;
use clawgate::server::GateServer;
use clawgate::supervisor::GatewaySupervisor;
use clawgate::token::resolve_gateway_token;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clawgate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config = Arc::new(Config::from_env().map_err(|e| {
        error!(error = %e, "failed to resolve configuration from environment");
        e
    })?);

    print_startup_banner(&config);

    if config.setup_password.is_none() {
        warn!("SETUP_PASSWORD is not set; the admin surface will refuse every request");
    }

    let token = resolve_gateway_token(&config);
    let pool = GatewayPool::new(&config.internal_host, config.internal_port, &token)?;
    let supervisor = GatewaySupervisor::new(
        Arc::clone(&config),
        Arc::clone(&token),
        Arc::clone(&pool),
        DEFAULT_READY_TIMEOUT,
    );
    let cli = Arc::new(BackendCli::new(Arc::clone(&config)));
    let limiter = RateLimiter::new(ADMIN_WINDOW, ADMIN_MAX_ATTEMPTS);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn the rate-limiter sweep
    tokio::spawn(Arc::clone(&limiter).sweep_loop(SWEEP_INTERVAL, shutdown_rx.clone()));

    // If already onboarded, bring the gateway up without waiting for traffic
    if config.is_configured() {
        let boot_supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            if let Err(e) = boot_supervisor.ensure_running().await {
                error!(error = %e, "failed to start gateway at boot");
            }
        });
    }

    let admin = Arc::new(AdminApi::new(
        Arc::clone(&config),
        Arc::clone(&supervisor),
        cli,
        Arc::clone(&limiter),
        Arc::clone(&token),
    ));

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", config.public_port)
        .parse()
        .map_err(|e| {
            error!(port = config.public_port, error = %e, "invalid bind address");
            anyhow::anyhow!("invalid bind address: {}", e)
        })?;

    let server = GateServer::new(
        bind_addr,
        Arc::clone(&config),
        Arc::clone(&supervisor),
        pool,
        admin,
        Arc::clone(&token),
        shutdown_rx.clone(),
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "wrapper server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown: stop accepting, then take the gateway down
    let _ = shutdown_tx.send(true);

    info!("Stopping gateway...");
    supervisor.shutdown().await;

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = "clawgate", version = VERSION, "Starting gateway wrapper");
    info!(
        port = config.public_port,
        gateway_target = %config.gateway_target(),
        state_dir = %config.state_dir.display(),
        workspace_dir = %config.workspace_dir.display(),
        config_path = %config.config_path().display(),
        configured = config.is_configured(),
        setup_password = config.setup_password.is_some(),
        "Server configuration"
    );
    info!(
        entry = %config.entry,
        node = %config.node,
        "Gateway invocation"
    );
    info!(
        setup_url = %format!("http://localhost:{}/admin", config.public_port),
        "Setup wizard"
    );
}
