use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef},
    routing::{get, post},
};
use deadpool_redis::Pool;
use medsuite_auth::middleware::AuthState;
use medsuite_auth::storage::{
    InMemoryRevocationList, InMemorySessionStore, RevocationList, SessionStore, SessionTracker,
};
use medsuite_auth::token::JwtService;
use medsuite_auth::{CredentialVerifier, RbacEngine};
use medsuite_notifications::{
    EventConsumer, EventPublisher, EventStream, InMemoryNotificationStore, InMemoryScheduleStore,
    MemoryEventStream, NotificationStore, RedisEventStream, ReminderScheduler, ScheduleStore,
    TemplateRenderer,
};
use medsuite_notifications_postgres::PostgresNotificationStorage;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::{RedisRevocationList, RedisSessionStore, create_redis_pool, ping};
use crate::client::ServiceClient;
use crate::config::AppConfig;
use crate::handlers;
use crate::sources::{HttpReminderSource, HttpUserDirectory};

// =============================================================================
// Backends
// =============================================================================

/// Pings the backends the process depends on.
#[derive(Clone, Default)]
pub struct HealthCheck {
    redis: Option<Pool>,
    postgres: Option<PostgresNotificationStorage>,
}

impl HealthCheck {
    pub async fn check(&self) -> Result<(), String> {
        if let Some(ref pool) = self.redis {
            ping(pool).await.map_err(|e| format!("redis: {e}"))?;
        }
        if let Some(ref pg) = self.postgres {
            pg.ping().await.map_err(|e| format!("postgres: {e}"))?;
        }
        Ok(())
    }
}

/// Storage and stream handles shared by the HTTP layer and the workers.
#[derive(Clone)]
pub struct Backends {
    pub stream: Arc<dyn EventStream>,
    pub notifications: Arc<dyn NotificationStore>,
    pub schedules: Arc<dyn ScheduleStore>,
    pub revocations: Arc<dyn RevocationList>,
    pub sessions: Arc<dyn SessionStore>,
    pub health: HealthCheck,
}

impl Backends {
    /// Everything in process memory. One process only.
    pub fn in_memory() -> Self {
        Self {
            stream: Arc::new(MemoryEventStream::new()),
            notifications: Arc::new(InMemoryNotificationStore::new()),
            schedules: Arc::new(InMemoryScheduleStore::new()),
            revocations: Arc::new(InMemoryRevocationList::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            health: HealthCheck::default(),
        }
    }

    /// Connects Redis and PostgreSQL as configured.
    pub async fn connect(cfg: &AppConfig) -> anyhow::Result<Self> {
        let mut backends = Self::in_memory();

        if cfg.redis.enabled {
            let pool = create_redis_pool(&cfg.redis)
                .await
                .map_err(anyhow::Error::msg)?;
            backends.stream =
                Arc::new(RedisEventStream::new(pool.clone(), cfg.events.stream.clone()));
            backends.revocations = Arc::new(RedisRevocationList::new(pool.clone()));
            backends.sessions = Arc::new(RedisSessionStore::new(pool.clone()));
            backends.health.redis = Some(pool);
        } else {
            tracing::warn!(
                "Redis disabled: event stream, revocations and sessions are process-local"
            );
        }

        if let Some(ref pg) = cfg.postgres {
            let storage = PostgresNotificationStorage::connect_with_options(
                &pg.connection_url(),
                pg.pool_size,
                pg.connect_timeout(),
            )
            .await
            .context("failed to connect to PostgreSQL")?;
            storage
                .ensure_schema()
                .await
                .context("failed to bootstrap notification schema")?;
            tracing::info!(host = %pg.host, database = %pg.database, "Connected to PostgreSQL");

            backends.notifications = Arc::new(storage.notification_store());
            backends.schedules = Arc::new(storage.schedule_store());
            backends.health.postgres = Some(storage);
        } else {
            tracing::warn!("No postgres section: notifications are kept in memory");
        }

        Ok(backends)
    }
}

// =============================================================================
// Application state
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthState,
    pub notifications: Arc<dyn NotificationStore>,
    pub publisher: EventPublisher,
    pub health: HealthCheck,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, backends: &Backends) -> Self {
        let verifier = CredentialVerifier::from_config(&config.auth, backends.revocations.clone());
        let rbac = RbacEngine::default().with_owner_fields(config.auth.owner_fields.clone());
        let sessions = SessionTracker::new(
            backends.sessions.clone(),
            config.auth.session_ttl,
            config.auth.max_sessions_per_user,
        );

        Self {
            auth: AuthState::new(Arc::new(verifier), Arc::new(rbac)).with_sessions(sessions),
            notifications: backends.notifications.clone(),
            publisher: EventPublisher::new(backends.stream.clone())
                .with_max_len(config.events.max_len),
            health: backends.health.clone(),
            config,
        }
    }
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/health/", get(handlers::health::health))
        .route("/api/auth/logout/", post(handlers::auth::logout))
        .route("/api/events/", post(handlers::events::publish))
        .route("/api/notifications/", get(handlers::notifications::list))
        .route(
            "/api/notifications/unread-count/",
            get(handlers::notifications::unread_count),
        )
        .route(
            "/api/notifications/read-all/",
            post(handlers::notifications::mark_all_read),
        )
        .route(
            "/api/notifications/{id}/read/",
            post(handlers::notifications::mark_read),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}

// =============================================================================
// Background workers
// =============================================================================

/// The stream consumer and the reminder scheduler, not yet started.
pub struct Workers {
    consumer: Option<EventConsumer>,
    scheduler: Option<ReminderScheduler>,
}

impl Workers {
    pub fn from_config(cfg: &AppConfig, backends: &Backends) -> anyhow::Result<Self> {
        let consumer = cfg.events.consumer_enabled.then(|| {
            EventConsumer::new(
                backends.stream.clone(),
                backends.notifications.clone(),
                cfg.events.consumer_settings(),
            )
        });

        let scheduler = if cfg.scheduler.enabled {
            let client = Arc::new(
                ServiceClient::new(cfg.service.name.clone(), &cfg.services)
                    .context("failed to build service client")?
                    .with_service_credentials(
                        JwtService::new(cfg.auth.jwt_secret.as_bytes(), cfg.auth.leeway_secs),
                        cfg.services.service_identity(&cfg.service.name),
                        cfg.services.service_token_lifetime,
                    ),
            );
            Some(ReminderScheduler::new(
                Arc::new(HttpReminderSource::new(client.clone())),
                Arc::new(HttpUserDirectory::new(client)),
                backends.schedules.clone(),
                Arc::new(TemplateRenderer::with_defaults()),
                cfg.scheduler.settings().map_err(anyhow::Error::msg)?,
            ))
        } else {
            None
        };

        Ok(Self {
            consumer,
            scheduler,
        })
    }

    /// Spawns the enabled loops and returns their shutdown senders.
    #[must_use]
    pub fn start(self) -> Vec<watch::Sender<bool>> {
        let mut senders = Vec::new();
        if let Some(consumer) = self.consumer {
            senders.push(consumer.start());
        }
        if let Some(scheduler) = self.scheduler {
            senders.push(scheduler.start());
        }
        senders
    }
}

// =============================================================================
// Server
// =============================================================================

pub struct MedsuiteServer {
    addr: SocketAddr,
    app: Router,
    workers: Workers,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    backends: Option<Backends>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            backends: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Use these handles instead of connecting from the configuration.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub async fn build(self) -> anyhow::Result<MedsuiteServer> {
        let backends = match self.backends {
            Some(b) => b,
            None => Backends::connect(&self.config).await?,
        };
        let workers = Workers::from_config(&self.config, &backends)?;
        let state = AppState::new(Arc::new(self.config), &backends);

        Ok(MedsuiteServer {
            addr: self.addr,
            app: build_app(state),
            workers,
        })
    }
}

impl MedsuiteServer {
    pub fn into_parts(self) -> (Router, Workers) {
        (self.app, self.workers)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let stops = self.workers.start();
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        for stop in stops {
            let _ = stop.send(true);
        }
        tracing::info!("background workers stopped");

        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
