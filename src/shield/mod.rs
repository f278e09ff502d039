use crate::config::{self, Config};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

pub mod api;
pub mod entropy;
pub mod http;
pub mod identity;
pub mod judge;
pub mod metrics;
pub mod penalty;
pub mod pipeline;
pub mod response;
pub mod sieve;
pub mod signatures;
pub mod upstream;

use judge::JudgeClient;
use metrics::ShieldMetrics;
use penalty::PenaltyStore;
use pipeline::{BlockKind, Pipeline};
use sieve::SieveClient;
use signatures::SignatureScanner;
use upstream::UpstreamClient;

/// Shared state for all requests.
pub struct ShieldState {
    pub pipeline: Pipeline,
    pub penalties: Arc<PenaltyStore>,
    pub upstream: UpstreamClient,
    pub metrics: ShieldMetrics,
}

impl ShieldState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let scanner = SignatureScanner::new(&config.security)
            .context("failed to compile security patterns")?;
        debug!(
            role_hijack = config.security.role_hijack.len(),
            instruction_override = config.security.instruction_override.len(),
            "compiled signature patterns"
        );

        let penalties = Arc::new(PenaltyStore::new(&config.penalty));

        let sieve = SieveClient::new(
            &config.sieve,
            Duration::from_secs(config.timeouts.sieve_s),
            config::resolve_secret(&config.sieve.api_key_env),
        )?;

        let judge = if config.judge.enabled {
            Some(JudgeClient::new(
                &config.judge,
                Duration::from_secs(config.timeouts.judge_s),
                config::resolve_secret(&config.judge.api_key_env),
            )?)
        } else {
            None
        };

        let upstream = UpstreamClient::new(
            &config.upstream,
            Duration::from_secs(config.timeouts.upstream_s),
            config::resolve_secret(&config.upstream.api_key_env),
        )?;

        let pipeline = Pipeline::new(
            config.entropy.clone(),
            config.compression.clone(),
            scanner,
            config.judge.enabled,
            Arc::clone(&penalties),
            sieve,
            judge,
        );

        Ok(Self {
            pipeline,
            penalties,
            upstream,
            metrics: ShieldMetrics::new(),
        })
    }

    pub(crate) fn record_block(&self, kind: BlockKind) {
        self.metrics
            .requests_total
            .with_label_values(&["blocked"])
            .inc();
        self.metrics
            .blocks_total
            .with_label_values(&[http::kind_label(kind)])
            .inc();
    }
}

pub async fn run(config: Config) -> Result<()> {
    let state = Arc::new(ShieldState::from_config(&config)?);

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    info!(addr = %listener.local_addr()?, "listening for requests");

    let app = http::router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
    }
}
