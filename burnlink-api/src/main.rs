//! Burnlink API Server
//!
//! See [`burnlink_api::config`] for the environment variables it reads.
//!
//! Signals:
//!   SIGHUP   re-read BURNLINK_KEYRING_FILE and rotate if its first key is new
//!   SIGINT   graceful shutdown

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use burnlink_api::config::{Config, KeySource, LogFormat};
use burnlink_api::{keys, AppState, RateLimiter, Shared};
use burnlink_vault::{FileBackend, InMemoryBackend, RetrievalGateway, SecretStore};

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "burnlink_api=info,burnlink_vault=info,audit=info,tower_http=info".into()
    });
    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn SecretStore>> {
    Ok(match &config.data_dir {
        Some(dir) => {
            let store = FileBackend::new(dir.join("secrets"))
                .with_context(|| format!("opening data directory {}", dir.display()))?;
            tracing::info!(dir = %store.dir().display(), "file-backed secret store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("BURNLINK_DATA_DIR unset, secrets are kept in memory only");
            Arc::new(InMemoryBackend::new())
        }
    })
}

/// Sweep expired secrets, retire old keys and forget idle rate-limit buckets.
fn spawn_maintenance(state: Shared, every: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match state.gateway.sweep().await {
                Ok(0) => {}
                Ok(reclaimed) => tracing::info!(reclaimed, "expired secrets swept"),
                Err(e) => tracing::warn!(error = %e, "sweep failed"),
            }
            state.gateway.retire_keys();
            state.rate_limiter.cleanup().await;
        }
    });
}

#[cfg(unix)]
fn spawn_key_reload(state: Shared, path: PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match keys::reload_keyring(&state.gateway, &path) {
                Ok(Some(version)) => tracing::info!(version, "keyring reloaded, new key installed"),
                Ok(None) => tracing::info!("keyring reloaded, newest key unchanged"),
                Err(e) => {
                    tracing::error!(error = %e, "keyring reload failed, keeping current keys")
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_key_reload(_state: Shared, path: PathBuf) -> anyhow::Result<()> {
    tracing::warn!(path = %path.display(), "key reload on SIGHUP is unavailable on this platform");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let keyring = keys::load_keyring(&config.keys).context("loading server keys")?;
    let store = open_store(&config)?;

    let gateway = RetrievalGateway::new(store, Arc::new(keyring), config.gateway.clone());
    let state: Shared = Arc::new(AppState {
        gateway,
        rate_limiter: RateLimiter::new(config.rate_limit_rps, config.rate_limit_burst),
    });

    spawn_maintenance(state.clone(), config.sweep_interval);
    if let KeySource::File(path) = &config.keys {
        spawn_key_reload(state.clone(), path.clone())?;
    }

    tracing::info!(
        port = config.port,
        rate_rps = config.rate_limit_rps,
        rate_burst = config.rate_limit_burst,
        max_secret_bytes = config.gateway.max_secret_bytes,
        "starting Burnlink API Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    burnlink_api::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}
