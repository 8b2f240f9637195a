//! # fido: Transaction ledger API
//!
//! `fido` keeps user balances and the credit and debit transactions that move them. It serves a
//! JSON API for users, transactions and per-user analytics, and feeds settled transactions into
//! Redis processing queues that maintain user statistics and credit scores and send notification
//! emails.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); all state lives in PostgreSQL.
//!
//! ### Request Flow
//!
//! A `POST /api/v1/transactions` request validates the amount, records the transaction as
//! `pending` and returns 201 straight away. The handler raises a
//! [`events::BalanceUpdateEvent`] on a bounded channel; the settlement worker picks it up, locks
//! the transaction and user rows, applies the credit or debit (a debit that would overdraw marks
//! the transaction `failed` instead) and commits. After commit the worker invalidates cached views
//! of the user's ledger and, when the queue is enabled, publishes a [`queue::TransactionEvent`].
//!
//! ### Core Components
//!
//! - [`api`]: handlers and request/response models. Amounts cross the API as decimal strings.
//! - [`db`]: repositories over `users` and `transactions`. Amounts are integer cents.
//! - [`cache`]: read-through cache for GET endpoints, backed by Redis or memory.
//! - [`events`]: the settlement channel and worker.
//! - [`queue`]: Redis queue publisher and the worker draining the processing queues.
//! - [`email`]: transaction notification emails.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use fido::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = fido::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     fido::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! fido::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod db;
pub mod email;
pub mod errors;
pub mod events;
pub mod keygen;
pub mod money;
mod openapi;
pub mod queue;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    cache::{CacheManager, memory::MemoryStore, redis_store::RedisStore},
    config::{CacheBackend, CorsOrigin},
    crypto::FieldCipher,
    email::EmailService,
    events::{
        EventDispatcher,
        settlement::{SettlementWorker, Settler},
    },
    openapi::{ApiDoc, REDOC_HTML},
    queue::{QueueService, QueueWorker},
};
use anyhow::Context;
use axum::{
    Json, Router,
    http::{self, HeaderValue},
    response::Html,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use redis::aio::ConnectionManager;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info, instrument, warn};
use utoipa_scalar::{Scalar, Servable};

pub use types::{TransactionId, UserId};

/// Application state shared across all request handlers.
///
/// - `db`: PostgreSQL pool
/// - `config`: application configuration
/// - `cipher`: encrypts user names at rest
/// - `cache`: read-through response cache (possibly disabled)
/// - `events`: sender for the settlement worker
/// - `redis`: shared Redis connection, present when the cache or queue needs one
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub cipher: FieldCipher,
    pub cache: CacheManager,
    pub events: EventDispatcher,
    pub redis: Option<ConnectionManager>,
}

/// Get the fido database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL and run migrations
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let settings = &config.database.pool;
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
        .connect(&config.database.connection_url())
        .await
        .context("Database connection failed")?;

    migrator().run(&pool).await.context("Database migration failed")?;
    Ok(pool)
}

/// Open the shared Redis connection. Returns the client too, since the queue worker needs its own
/// connection for blocking pops.
async fn setup_redis(config: &Config) -> anyhow::Result<(redis::Client, ConnectionManager)> {
    let client = redis::Client::open(config.redis.connection_url()).map_err(|e| anyhow::anyhow!("Redis connection failed: {e}"))?;
    let conn = ConnectionManager::new(client.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Redis connection failed: {e}"))?;
    info!(host = %config.redis.host, port = config.redis.port, "Connected to Redis");
    Ok((client, conn))
}

fn needs_redis(config: &Config) -> bool {
    config.cache.backend == CacheBackend::Redis || config.queue.enabled
}

fn create_cache(config: &Config, redis: Option<&ConnectionManager>) -> CacheManager {
    let ttl = config.cache.default_ttl;
    match (config.cache.backend, redis) {
        (CacheBackend::Redis, Some(conn)) => CacheManager::new(Arc::new(RedisStore::new(conn.clone())), ttl),
        (CacheBackend::Memory, _) => CacheManager::new(Arc::new(MemoryStore::new(config.cache.max_capacity)), ttl),
        (CacheBackend::Redis, None) | (CacheBackend::Disabled, _) => CacheManager::disabled(),
    }
}

/// Create CORS layer from configuration.
///
/// A wildcard origin mirrors the request's origin, methods and headers, so it can be combined
/// with credentials.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;
    let wildcard = cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard));

    let mut cors = if wildcard {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::PUT,
                http::Method::PATCH,
                http::Method::DELETE,
                http::Method::OPTIONS,
            ])
            .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
    };

    cors = cors
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - Health probes at the root
/// - The versioned API under `api_prefix`, with its OpenAPI JSON at `{api_prefix}/openapi.json`
/// - Scalar at `/docs` and ReDoc at `/redoc`
/// - Prometheus metrics at `/internal/metrics` when enabled
/// - CORS and request tracing around everything
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{health, transactions, users};

    let prefix = state.config.api_prefix.clone();
    let openapi = ApiDoc::with_prefix(&prefix);
    let spec_url = format!("{prefix}/openapi.json");
    let redoc_page = Html(REDOC_HTML.replace("$spec_url", &spec_url));
    let openapi_json = Json(openapi.clone());

    let api_routes = Router::new()
        // Users
        .route("/users", post(users::create_user).get(users::list_users))
        .route(
            "/users/{id}",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        )
        .route("/users/{id}/balance", get(users::get_user_balance))
        // Transactions
        .route(
            "/transactions",
            post(transactions::create_transaction).get(transactions::list_transactions),
        )
        .route(
            "/transactions/{id}",
            get(transactions::get_transaction)
                .put(transactions::update_transaction)
                .delete(transactions::delete_transaction),
        )
        .route("/transactions/user/{user_id}", get(transactions::get_user_transactions))
        .route("/transactions/analytics/{user_id}", get(transactions::get_transaction_analytics))
        .route("/openapi.json", get(|| async move { openapi_json }))
        .with_state(state.clone());

    let router = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .with_state(state.clone())
        .nest(&prefix, api_routes)
        .route("/redoc", get(|| async move { redoc_page }))
        .merge(Scalar::with_url("/docs", openapi));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server:
/// - the settlement worker draining [`events::BalanceUpdateEvent`]s
/// - the queue worker draining the Redis processing queues (when enabled)
///
/// [`shutdown`](BackgroundServices::shutdown) cancels the shared token and waits for every task.
/// Dropping the struct cancels the token through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Everything the background tasks need, gathered during startup
struct BackgroundSetup {
    settler: Settler,
    receiver: tokio::sync::mpsc::Receiver<events::BalanceUpdateEvent>,
    dispatcher: EventDispatcher,
    queue_client: Option<redis::Client>,
}

/// Start the settlement worker, re-dispatch leftover pending transactions and start the queue worker
async fn setup_background_services(
    setup: BackgroundSetup,
    config: &Config,
    shutdown_token: CancellationToken,
) -> anyhow::Result<BackgroundServices> {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    let BackgroundSetup {
        settler,
        receiver,
        dispatcher,
        queue_client,
    } = setup;

    let worker = SettlementWorker::new(settler.clone(), receiver);
    let settlement_shutdown = shutdown_token.clone();
    background_tasks.push(tokio::spawn(async move {
        worker.run(settlement_shutdown).await;
    }));

    if config.settlement.recover_pending_on_startup {
        match settler.recover_pending(&dispatcher).await {
            Ok(0) => debug!("No pending transactions to recover"),
            Ok(count) => info!(count, "Re-dispatched pending transactions"),
            Err(e) => warn!(error = %format!("{e:#}"), "Failed to recover pending transactions"),
        }
    }

    if let Some(client) = queue_client {
        let email = if config.email.enable_notifications {
            Some(Arc::new(
                EmailService::new(&config.email).map_err(|e| anyhow::anyhow!("Email setup failed: {e}"))?,
            ))
        } else {
            info!("Transaction notification emails are disabled");
            None
        };

        let queue_worker = QueueWorker::new(client, email, config.queue.clone());
        let queue_shutdown = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            if let Err(e) = queue_worker.run(queue_shutdown).await {
                error!(error = %format!("{e:#}"), "Queue worker exited");
            }
        }));
    }

    Ok(BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    })
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to PostgreSQL and Redis, runs migrations and
///    starts the background workers
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown future resolves, stops the workers and closes the pool
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Like [`Application::new`], reusing `pool` when given (migrations still run)
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting fido with configuration: {:#?}", config);

        let pool = match pool {
            Some(pool) => {
                migrator().run(&pool).await.context("Database migration failed")?;
                pool
            }
            None => setup_database(&config).await?,
        };

        let encryption_key = config.encryption_key.as_deref().context("encryption_key is not configured")?;
        let cipher = FieldCipher::from_key(encryption_key).context("invalid encryption_key")?;

        let (redis_client, redis) = if needs_redis(&config) {
            let (client, conn) = setup_redis(&config).await?;
            (Some(client), Some(conn))
        } else {
            (None, None)
        };

        let cache = create_cache(&config, redis.as_ref());
        let queue = match (&redis, config.queue.enabled) {
            (Some(conn), true) => Some(QueueService::new(conn.clone())),
            _ => None,
        };

        let (dispatcher, receiver) = EventDispatcher::channel(config.settlement.channel_capacity);
        let settler = Settler::new(pool.clone(), cipher.clone(), cache.clone(), queue);

        let shutdown_token = CancellationToken::new();
        let setup = BackgroundSetup {
            settler,
            receiver,
            dispatcher: dispatcher.clone(),
            queue_client: redis_client.filter(|_| config.queue.enabled),
        };
        let bg_services = setup_background_services(setup, &config, shutdown_token).await?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .cipher(cipher)
            .cache(cache)
            .events(dispatcher)
            .maybe_redis(redis)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        info!(
            "Fido listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Let in-flight settlements finish before the pool goes away
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::*;
    use axum::http::{HeaderValue, StatusCode, header};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_docs_are_served(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool).await;

        let response = app.get("/api/v1/openapi.json").await;
        response.assert_status_ok();
        let doc: serde_json::Value = response.json();
        assert!(doc["paths"]["/api/v1/transactions"].is_object());
        assert!(doc["paths"]["/health"].is_object());

        let response = app.get("/redoc").await;
        response.assert_status_ok();
        assert!(response.text().contains("spec-url=\"/api/v1/openapi.json\""));

        app.get("/docs").await.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_route_is_404(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool).await;
        app.get("/api/v2/users").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cors_mirrors_origin_with_credentials(pool: PgPool) {
        let (app, _bg_services) = create_test_app(pool).await;

        let response = app
            .get("/health")
            .add_header(header::ORIGIN, HeaderValue::from_static("https://app.example.com"))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            HeaderValue::from_static("https://app.example.com")
        );
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            HeaderValue::from_static("true")
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_pending_transactions_are_recovered_on_startup(pool: PgPool) {
        let user = create_test_user(&pool, 0).await;
        let transaction_id: i64 = sqlx::query_scalar(
            "INSERT INTO transactions (user_id, transaction_date, transaction_amount, transaction_type, transaction_status)
             VALUES ($1, NOW(), 700, 'credit', 'pending') RETURNING id",
        )
        .bind(user.id)
        .fetch_one(&pool)
        .await
        .unwrap();

        let (_app, bg_services) = create_test_app(pool.clone()).await;

        let mut status = String::new();
        for _ in 0..100 {
            status = sqlx::query_scalar("SELECT transaction_status FROM transactions WHERE id = $1")
                .bind(transaction_id)
                .fetch_one(&pool)
                .await
                .unwrap();
            if status != "pending" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(status, "success");

        let balance: i64 = sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(balance, 700);

        bg_services.shutdown().await;
    }
}
