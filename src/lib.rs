//! Fedibox - inbound ActivityPub activity processing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Personal and shared inboxes                              │
//! │  - Health and metrics                                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Federation Layer                          │
//! │  - Activity processor and collaborator traits               │
//! │  - Remote fetch, signed delivery                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - moka actor cache                                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers
//! - `federation`: Activity processing and federation plumbing
//! - `service`: Notifications
//! - `data`: Database and cache layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

/// Largest activity body accepted by the inboxes
const MAX_ACTIVITY_BYTES: usize = 1024 * 1024;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Storage collaborators (actors, objects, edges, keys)
    pub store: Arc<federation::LocalStore>,

    /// Notification dispatcher and feed
    pub notifier: Arc<service::Notifier>,

    /// Inbound activity processor
    pub processor: Arc<federation::ActivityProcessor>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database (runs migrations)
    /// 2. Build HTTP clients for fetching and delivery
    /// 3. Create configured local actors
    /// 4. Wire the activity processor
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let timeout = Duration::from_secs(config.federation.fetch_timeout_seconds);
        let fetcher =
            federation::RemoteFetcher::new(timeout, config.federation.allow_private_addresses)?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fedibox/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        let actor_cache = data::ActorCache::new(
            config.federation.actor_cache_max_items,
            Duration::from_secs(config.federation.actor_cache_ttl),
        );
        let store = Arc::new(federation::LocalStore::new(
            db.clone(),
            fetcher,
            actor_cache,
            config.server.domain.clone(),
            config.federation.user_kek.clone(),
        ));

        store
            .ensure_local_actors(&config.federation.local_actors)
            .await?;
        tracing::info!(
            count = config.federation.local_actors.len(),
            "Local actors ready"
        );

        let notifier = Arc::new(service::Notifier::new(
            db.clone(),
            config.notifications.feed_capacity,
        ));
        let delivery = federation::ActivityDelivery::new(Arc::new(http_client));

        let push = federation::PushSettings {
            admin_email: config.notifications.admin_email.clone(),
            vapid_public_key: config.notifications.vapid_public_key.clone(),
            vapid_private_key: config.notifications.vapid_private_key.clone(),
        };
        let processor = federation::ActivityProcessor::new(
            config.server.domain.clone(),
            federation::Collaborators::from_store(
                store.clone(),
                notifier.clone(),
                Arc::new(delivery),
            ),
            push,
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            notifier,
            processor: Arc::new(processor),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .merge(api::inbox_router())
        .layer(RequestBodyLimitLayer::new(MAX_ACTIVITY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::ops_router())
}
