//! Common test utilities for E2E tests

use axum::{Json, Router, body::Bytes, extract::State, http::HeaderMap, routing::get, routing::post};
use fedibox::{AppState, config, data::Actor};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const DOMAIN: &str = "local.test";

static METRICS: Once = Once::new();

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

/// Build a test configuration rooted in `temp_dir`
pub fn test_config(temp_dir: &TempDir, local_actors: Vec<String>) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            domain: DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig {
            path: temp_dir.path().join("test.db"),
        },
        federation: config::FederationConfig {
            user_kek: "test-kek-0123456789abcdef".to_string(),
            fetch_timeout_seconds: 5,
            allow_private_addresses: true,
            actor_cache_ttl: 60,
            actor_cache_max_items: 100,
            local_actors,
        },
        notifications: config::NotificationConfig {
            admin_email: "admin@local.test".to_string(),
            vapid_public_key: None,
            vapid_private_key: None,
            feed_capacity: 16,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_local_actors(Vec::new()).await
    }

    /// Create a test server that provisions `local_actors` at startup
    pub async fn with_local_actors(local_actors: Vec<String>) -> Self {
        METRICS.call_once(fedibox::metrics::init_metrics);

        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir, local_actors);
        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = fedibox::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a local actor with a small test keypair
    pub async fn create_local_actor(&self, handle: &str) -> Actor {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        let public_pem = rsa::RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        self.state
            .store
            .create_local_actor_with_key(handle, &private_pem, &public_pem)
            .await
            .unwrap()
    }

    /// Store a remote actor as if it had been fetched before
    pub async fn seed_remote_actor(&self, id: &str) -> Actor {
        let actor = Actor::from_document(
            &json!({
                "id": id,
                "type": "Person",
                "preferredUsername": id.rsplit('/').next().unwrap(),
                "inbox": format!("{id}/inbox"),
            }),
            false,
        )
        .unwrap();
        self.state.db.upsert_actor(&actor).await.unwrap();
        actor
    }

    /// POST an activity to `path`
    pub async fn post_activity(&self, path: &str, activity: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("Content-Type", "application/activity+json")
            .body(activity.to_string())
            .send()
            .await
            .unwrap()
    }
}

/// Requests received by a [`RemoteServer`] inbox
pub type Delivered = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

/// A stand-in remote instance serving one actor, one note and an inbox
pub struct RemoteServer {
    pub base: String,
    pub delivered: Delivered,
}

impl RemoteServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));

        let actor_base = base.clone();
        let note_base = base.clone();
        let router = Router::new()
            .route(
                "/users/alice",
                get(move || {
                    let base = actor_base.clone();
                    async move {
                        Json(json!({
                            "id": format!("{base}/users/alice"),
                            "type": "Person",
                            "preferredUsername": "alice",
                            "name": "Alice",
                            "inbox": format!("{base}/users/alice/inbox"),
                            "followers": format!("{base}/users/alice/followers"),
                        }))
                    }
                }),
            )
            .route(
                "/notes/1",
                get(move || {
                    let base = note_base.clone();
                    async move {
                        Json(json!({
                            "id": format!("{base}/notes/1"),
                            "type": "Note",
                            "attributedTo": format!("{base}/users/alice"),
                            "content": "<p>remote note</p>",
                        }))
                    }
                }),
            )
            .route(
                "/users/alice/inbox",
                post(
                    |State(delivered): State<Delivered>, headers: HeaderMap, body: Bytes| async move {
                        let activity: Value = serde_json::from_slice(&body).unwrap();
                        delivered.lock().unwrap().push((headers, activity));
                        axum::http::StatusCode::ACCEPTED
                    },
                ),
            )
            .with_state(delivered.clone());

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base, delivered }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}
