//! Application wiring: config → ledger → router.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;
use tracing::info;

use covenant_auth::Hs256JwtValidator;
use covenant_infra::projections::ProjectionWorkerHandle;
use covenant_infra::Ledger;

use crate::config::{AppConfig, EventStoreBackend, RateLimitBackend};
use crate::middleware::{auth_middleware, AuthState};
use crate::routes;

pub struct AppServices {
    pub ledger: Arc<Ledger>,
    pub config: AppConfig,
}

/// Build the ledger and router for the configured backend. Bootstraps the
/// primordial realm on first run and starts the projection worker.
pub async fn build(
    config: AppConfig,
) -> anyhow::Result<(Router, Arc<AppServices>, ProjectionWorkerHandle)> {
    let ledger = match config.event_store.backend {
        EventStoreBackend::Memory => Arc::new(Ledger::in_memory_with(config.bootstrap.clone())),
        EventStoreBackend::Relational => {
            let url = config
                .event_store
                .url
                .as_deref()
                .expect("checked at config parse time");
            let pool = sqlx::PgPool::connect(url).await?;
            Arc::new(Ledger::relational(pool, config.bootstrap.clone()).await?)
        }
    };

    if ledger.bootstrap().await.map_err(|e| anyhow::anyhow!("{e:?}"))? {
        info!("first run: primordial realm bootstrapped");
    }
    let worker = ledger.start_projections();

    if config.rate_limit.backend == RateLimitBackend::Redis {
        // The limiter itself is an external collaborator; we only carry its
        // configuration.
        info!(url = ?config.rate_limit.redis_url, "rate limiting delegated to external redis limiter");
    }

    let mut jwt = Hs256JwtValidator::new(config.auth.jwt_secret.clone().into_bytes());
    if let Some(issuer) = &config.auth.issuer {
        jwt = jwt.with_issuer(issuer.clone());
    }
    if let Some(audience) = &config.auth.audience {
        jwt = jwt.with_audience(audience.clone());
    }

    let auth_state = AuthState {
        authn: ledger.authn.clone(),
        jwt: Arc::new(jwt),
    };

    let services = Arc::new(AppServices {
        ledger,
        config,
    });

    let router = Router::new()
        .route("/intent", post(routes::intent::post_intent))
        .route("/ws", get(routes::ws::ws_handler))
        .route("/healthz", get(routes::system::healthz))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    auth_state,
                    auth_middleware,
                ))
                .layer(Extension(services.clone())),
        );

    Ok((router, services, worker))
}
