use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quillpost::config::AppConfig;
use quillpost::http;
use quillpost::infra::broadcast::{Broadcaster, MemoryBroadcaster, RedisBroadcaster};
use quillpost::infra::cache::{Cache, MemoryCache, RedisCache};
use quillpost::infra::db::Db;
use quillpost::infra::store::PgStore;
use quillpost::AppState;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config).await?;
    db.migrate().await?;

    let (cache, broadcaster) = connect_redis(&config).await?;

    let state = AppState {
        store: Arc::new(PgStore::new(db)),
        cache,
        broadcaster,
        paseto_access_key: config.paseto_access_key,
        access_ttl_minutes: config.access_ttl_minutes,
        posts_per_page: config.posts_per_page,
        cache_ttl_seconds: config.cache_ttl_seconds,
    };

    let app: Router = http::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes)),
    );

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Redis backs both the read cache and event fan-out. With
/// `REDIS_FALLBACK_TO_MEMORY` set, an unreachable Redis degrades to
/// process-local implementations instead of aborting start-up.
async fn connect_redis(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn Cache>, Arc<dyn Broadcaster>)> {
    let connect = tokio::time::timeout(
        Duration::from_secs(config.db_connect_timeout_seconds),
        RedisCache::connect(&config.redis_url),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out connecting to redis"))
    .and_then(|result| result);

    match connect {
        Ok(cache) => {
            let broadcaster = RedisBroadcaster::new(cache.client().clone());
            Ok((Arc::new(cache), Arc::new(broadcaster)))
        }
        Err(err) if config.redis_fallback_to_memory => {
            tracing::warn!(error = ?err, "redis unavailable, using in-memory cache and broadcaster");
            Ok((
                Arc::new(MemoryCache::new()),
                Arc::new(MemoryBroadcaster::default()),
            ))
        }
        Err(err) => Err(err),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
