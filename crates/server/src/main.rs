use anyhow::Result;
use axum::serve;
use portico_core::{
    auth::{HttpAuthClient, InternalTokenSigner, TokenVerifier},
    breaker::BreakerRegistry,
    cache::{RedisStore, RemoteStore, TieredCache},
    config::AppConfig,
    health::HealthRegistry,
    metrics::MetricsCollector,
    proxy::{Dispatcher, ForwardClient, ServiceResolver},
    ratelimit::RateLimiter,
};
use server::{build_router, AppState};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    signal,
    sync::{broadcast, Notify},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let default_level = if config.tracing.enabled {
        "warn,portico_core=debug,server=debug"
    } else {
        "warn,portico_core=info,server=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", default_level, config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

/// Container for initialized core services.
struct CoreServices {
    state: AppState,
    redis: Option<Arc<RedisStore>>,
    sweeper: tokio::task::JoinHandle<()>,
}

/// Initializes all core services and starts the background tasks.
async fn init_core_services(
    config: AppConfig,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<CoreServices> {
    let config = Arc::new(config);
    let metrics = Arc::new(MetricsCollector::new());

    // L2 is optional: a missing or unreachable Redis degrades to L1-only.
    let redis = match &config.cache.redis_url {
        Some(url) => match RedisStore::connect(url, config.cache.redis_pool_size) {
            Ok(store) => {
                let store = Arc::new(store);
                match tokio::time::timeout(Duration::from_secs(5), store.ping()).await {
                    Ok(Ok(())) => {
                        info!("redis L2 cache initialized");
                        Some(store)
                    }
                    Ok(Err(e)) => {
                        error!(error = %e, "redis unreachable, continuing with L1-only cache");
                        None
                    }
                    Err(_) => {
                        error!("redis ping timed out, continuing with L1-only cache");
                        None
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "failed to initialize redis pool");
                None
            }
        },
        None => None,
    };

    let cache = Arc::new(TieredCache::new(
        config.cache.l1_max_cost,
        Duration::from_secs(config.cache.l1_max_ttl_seconds),
        redis.clone().map(|store| store as Arc<dyn RemoteStore>),
    ));

    let rate_limiter = Arc::new(
        RateLimiter::new(config.rate_limit.rps, config.rate_limit.burst).with_reclamation(
            Duration::from_secs(config.rate_limit.idle_ttl_seconds),
            Duration::from_secs(config.rate_limit.sweep_interval_seconds),
        ),
    );
    let sweeper = rate_limiter.start_sweeper(shutdown_tx.subscribe());

    let auth_client = Arc::new(HttpAuthClient::new(
        &config.auth.auth_service_url,
        config.request_timeout(),
    )?);
    let verifier = Arc::new(
        TokenVerifier::new(auth_client, Arc::clone(&cache))
            .with_max_ttl(Duration::from_secs(config.auth.token_cache_ttl_seconds))
            .with_metrics(Arc::clone(&metrics)),
    );
    let signer = Arc::new(InternalTokenSigner::new(
        &config.auth.jwt_secret,
        Duration::from_secs(config.auth.internal_token_ttl_seconds),
    ));

    let breakers = Arc::new(
        BreakerRegistry::new(config.breaker_config(), config.breaker.enabled)
            .with_metrics(Arc::clone(&metrics)),
    );
    let resolver = Arc::new(ServiceResolver::new(config.services.targets.clone()));
    let forward_client = ForwardClient::new(
        Duration::from_secs(config.proxy.dial_timeout_seconds),
        config.proxy.retry_max_attempts,
        Duration::from_millis(config.proxy.retry_base_delay_ms),
    )?
    .with_metrics(Arc::clone(&metrics));
    let dispatcher = Arc::new(
        Dispatcher::new(
            resolver,
            forward_client,
            Arc::clone(&breakers),
            config.services.system_default.clone(),
            config.proxy.failover_status_threshold,
        )
        .with_metrics(Arc::clone(&metrics)),
    );

    let health = Arc::new(build_health_registry(&config, redis.clone()));
    info!(
        services = config.services.targets.len(),
        health_checks = health.len(),
        "core services initialized"
    );

    Ok(CoreServices {
        state: AppState {
            config,
            metrics,
            rate_limiter,
            verifier,
            signer,
            dispatcher,
            breakers,
            health,
        },
        redis,
        sweeper,
    })
}

/// Registers one check per configured upstream plus the L2 store.
fn build_health_registry(config: &AppConfig, redis: Option<Arc<RedisStore>>) -> HealthRegistry {
    let mut registry = HealthRegistry::new();

    let probe = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .timeout(Duration::from_secs(4))
        .build()
        .ok();

    if let Some(probe) = probe {
        for (name, url) in &config.services.targets {
            if !url.starts_with("http") {
                continue;
            }
            let probe = probe.clone();
            let url = format!("{}/health", url.trim_end_matches('/'));
            let check_name = if name.ends_with("-service") {
                name.clone()
            } else {
                format!("{name}-service")
            };
            registry.register(check_name, move || {
                let probe = probe.clone();
                let url = url.clone();
                async move {
                    match probe.get(&url).send().await {
                        Ok(response) if response.status().is_success() => Ok(()),
                        Ok(response) => Err(format!("status {}", response.status().as_u16())),
                        Err(_) => Err("unreachable".to_string()),
                    }
                }
            });
        }
    }

    if let Some(redis) = redis {
        registry.register("redis", move || {
            let redis = Arc::clone(&redis);
            async move { redis.ping().await.map_err(|e| e.to_string()) }
        });
    }
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration invalid: {e}"))?;

    init_logging(&config);
    info!(
        environment = %config.environment,
        port = config.server.port,
        breaker_enabled = config.breaker.enabled,
        metrics_enabled = config.metrics.enabled,
        "starting portico gateway"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let addr = config
        .socket_addr()
        .map_err(|e| anyhow::anyhow!("invalid listener address: {e}"))?;
    let grace = config.shutdown_grace();

    let services = init_core_services(config, &shutdown_tx).await?;
    let app = build_router(services.state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "gateway listening");

    // The notify fires when the first signal arrives, so the grace timer
    // only starts once draining begins.
    let draining = Arc::new(Notify::new());
    let server = serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&draining)));

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        }
        () = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "grace period elapsed, aborting in-flight requests");
        }
    }

    shutdown(&shutdown_tx, services).await;
    Ok(())
}

/// Tears down background tasks and external connections. Idempotent under
/// repeated invocation.
async fn shutdown(shutdown_tx: &broadcast::Sender<()>, services: CoreServices) {
    static SHUTDOWN_STARTED: AtomicBool = AtomicBool::new(false);
    if SHUTDOWN_STARTED.swap(true, Ordering::SeqCst) {
        warn!("shutdown already in progress, ignoring duplicate");
        return;
    }

    info!("shutting down gateway");
    if shutdown_tx.send(()).is_err() {
        warn!("no background tasks were listening for shutdown");
    }

    if tokio::time::timeout(Duration::from_secs(5), services.sweeper)
        .await
        .is_err()
    {
        warn!("sweeper did not stop within 5s");
    }

    if let Some(redis) = services.redis {
        redis.close();
        info!("redis pool closed");
    }

    info!("gateway stopped");
}

async fn shutdown_signal(draining: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
    draining.notify_waiters();
}
