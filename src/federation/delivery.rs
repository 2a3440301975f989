//! Activity delivery
//!
//! Signs and POSTs activities to remote inboxes.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::collaborators::ActivitySender;
use crate::data::{Actor, SigningKey};
use crate::error::AppError;
use crate::metrics::ACTIVITYPUB_ACTIVITIES_SENT;

/// Activity delivery service
#[derive(Clone)]
pub struct ActivityDelivery {
    http_client: Arc<reqwest::Client>,
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }

    /// Deliver activity to a single inbox
    ///
    /// # Errors
    /// Returns error if delivery fails (network, signature, rejection)
    pub async fn deliver_to_inbox(
        &self,
        key: &SigningKey,
        inbox_uri: &str,
        activity: &Value,
        domain: &str,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?;

        let sig_headers = super::sign_request(
            "POST",
            inbox_uri,
            Some(&body),
            &key.private_key_pem,
            &key.key_id,
        )?;

        let mut request = self
            .http_client
            .post(inbox_uri)
            .header("Content-Type", "application/activity+json")
            .header(
                "User-Agent",
                format!("fedibox/{} (+https://{}/)", env!("CARGO_PKG_VERSION"), domain),
            )
            .header("Date", sig_headers.date)
            .header("Signature", sig_headers.signature);

        if let Some(digest) = sig_headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await.map_err(|e| {
            AppError::Federation(format!("Failed to deliver to {}: {}", inbox_uri, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "Inbox {} rejected activity: HTTP {}",
                inbox_uri,
                response.status()
            )));
        }

        tracing::info!(inbox = %inbox_uri, "Delivered activity");
        Ok(())
    }
}

#[async_trait]
impl ActivitySender for ActivityDelivery {
    async fn deliver(
        &self,
        key: &SigningKey,
        from: &Actor,
        to: &Actor,
        activity: &Value,
        domain: &str,
    ) -> Result<(), AppError> {
        let activity_type = activity
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let inbox = to.inbox.as_ref().ok_or_else(|| {
            AppError::Federation(format!("Actor {} has no inbox", to.id))
        })?;

        tracing::debug!(
            from = %from.id,
            to = %to.id,
            activity_type,
            "Delivering activity"
        );

        let result = self
            .deliver_to_inbox(key, inbox.as_str(), activity, domain)
            .await;

        let status = if result.is_ok() { "success" } else { "failure" };
        ACTIVITYPUB_ACTIVITIES_SENT
            .with_label_values(&[activity_type, status])
            .inc();

        result
    }
}

/// Builders for the activities this instance sends
pub mod builder {
    use serde_json::Value;

    /// Build an Accept activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (accepter)
    /// * `object` - Original activity being accepted (usually a Follow)
    pub fn accept(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Accept",
            "id": id,
            "actor": actor,
            "object": object
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, extract::State, http::HeaderMap, http::StatusCode, routing::post};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use serde_json::json;
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

    fn test_key() -> SigningKey {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        SigningKey {
            key_id: "https://local.example/ap/users/bob#main-key".to_string(),
            private_key_pem: private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        }
    }

    fn actor(id: &str, inbox: Option<String>) -> Actor {
        Actor::from_document(
            &json!({ "id": id, "type": "Person", "inbox": inbox }),
            false,
        )
        .unwrap()
    }

    async fn spawn_inbox(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route(
                "/users/alice/inbox",
                post(
                    move |State(received): State<Received>,
                          headers: HeaderMap,
                          axum::Json(body): axum::Json<Value>| async move {
                        received.lock().unwrap().push((headers, body));
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{addr}/users/alice/inbox"), received)
    }

    #[tokio::test]
    async fn deliver_posts_signed_activity_to_inbox() {
        let (inbox, received) = spawn_inbox(StatusCode::ACCEPTED).await;
        let delivery = ActivityDelivery::new(Arc::new(reqwest::Client::new()));
        let accept = builder::accept(
            "https://local.example/ap/a/1",
            "https://local.example/ap/users/bob",
            json!({ "type": "Follow" }),
        );

        delivery
            .deliver(
                &test_key(),
                &actor("https://local.example/ap/users/bob", None),
                &actor("https://remote.example/users/alice", Some(inbox)),
                &accept,
                "local.example",
            )
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (headers, body) = &received[0];
        assert_eq!(body["type"], "Accept");
        assert!(headers.contains_key("signature"));
        assert!(headers.contains_key("digest"));
        assert!(
            headers["signature"]
                .to_str()
                .unwrap()
                .contains("keyId=\"https://local.example/ap/users/bob#main-key\"")
        );
    }

    #[tokio::test]
    async fn deliver_reports_rejection() {
        let (inbox, _received) = spawn_inbox(StatusCode::UNAUTHORIZED).await;
        let delivery = ActivityDelivery::new(Arc::new(reqwest::Client::new()));

        let result = delivery
            .deliver(
                &test_key(),
                &actor("https://local.example/ap/users/bob", None),
                &actor("https://remote.example/users/alice", Some(inbox)),
                &json!({ "type": "Accept" }),
                "local.example",
            )
            .await;

        assert!(matches!(result, Err(AppError::Federation(message)) if message.contains("401")));
    }

    #[tokio::test]
    async fn deliver_requires_inbox() {
        let delivery = ActivityDelivery::new(Arc::new(reqwest::Client::new()));
        let result = delivery
            .deliver(
                &test_key(),
                &actor("https://local.example/ap/users/bob", None),
                &actor("https://remote.example/users/alice", None),
                &json!({ "type": "Accept" }),
                "local.example",
            )
            .await;

        assert!(matches!(result, Err(AppError::Federation(_))));
    }
}
