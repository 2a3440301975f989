//! SQLite-backed storage collaborators
//!
//! `LocalStore` implements every storage-side trait the processor uses on
//! top of [`Database`], with a moka cache in front of actor lookups and a
//! [`RemoteFetcher`] for documents this instance has not seen yet.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use url::Url;

use super::collaborators::{
    ActorDirectory, FollowStore, KeyStore, LikeStore, ObjectStore, ReblogStore, ReplyStore,
    Timelines,
};
use super::fetch::RemoteFetcher;
use super::keys;
use super::recipients::local_actor_url;
use crate::data::{
    Actor, ActorCache, ApObject, CacheOutcome, Database, EntityId, ObjectType, SigningKey,
};
use crate::error::AppError;

fn sanitize_remote_html(content: &str) -> String {
    ammonia::clean(content)
}

/// Sanitize the HTML-bearing fields of an object document
fn sanitize_object(raw: &Value) -> Value {
    let mut document = raw.clone();
    let Some(map) = document.as_object_mut() else {
        return document;
    };

    for field in ["content", "summary", "name"] {
        if let Some(Value::String(html)) = map.get_mut(field) {
            *html = sanitize_remote_html(html);
        }
    }

    if let Some(Value::Object(content_map)) = map.get_mut("contentMap") {
        for value in content_map.values_mut() {
            if let Value::String(html) = value {
                *html = sanitize_remote_html(html);
            }
        }
    }

    document
}

fn url_from_stored(value: &str) -> Result<Url, AppError> {
    Url::parse(value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored id {value} is not a URL: {e}")))
}

/// Storage collaborators on SQLite
pub struct LocalStore {
    db: Arc<Database>,
    fetcher: RemoteFetcher,
    actor_cache: ActorCache,
    domain: String,
    user_kek: String,
}

impl LocalStore {
    pub fn new(
        db: Arc<Database>,
        fetcher: RemoteFetcher,
        actor_cache: ActorCache,
        domain: impl Into<String>,
        user_kek: impl Into<String>,
    ) -> Self {
        Self {
            db,
            fetcher,
            actor_cache,
            domain: domain.into(),
            user_kek: user_kek.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Create a local actor with the given keypair
    ///
    /// An existing actor with the same handle is overwritten.
    pub async fn create_local_actor_with_key(
        &self,
        handle: &str,
        private_key_pem: &str,
        public_key_pem: &str,
    ) -> Result<Actor, AppError> {
        let id = local_actor_url(&self.domain, handle)
            .map_err(|e| AppError::Validation(format!("invalid handle {handle}: {e}")))?;

        let document = json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                "https://w3id.org/security/v1"
            ],
            "id": id.as_str(),
            "type": "Person",
            "preferredUsername": handle,
            "inbox": format!("{id}/inbox"),
            "outbox": format!("{id}/outbox"),
            "followers": format!("{id}/followers"),
            "following": format!("{id}/following"),
            "publicKey": {
                "id": format!("{id}#main-key"),
                "owner": id.as_str(),
                "publicKeyPem": public_key_pem,
            },
        });
        let actor = Actor::from_document(&document, true)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("local actor document has no id")))?;

        let sealed = keys::encrypt_private_key(private_key_pem, &self.user_kek)?;
        self.db.upsert_actor(&actor).await?;
        self.db
            .upsert_actor_key(actor.id.as_str(), &sealed, public_key_pem)
            .await?;
        self.actor_cache.invalidate(actor.id.as_str()).await;

        tracing::info!(actor = %actor.id, "Local actor created");
        Ok(actor)
    }

    /// Create a local actor with a freshly generated keypair
    pub async fn create_local_actor(&self, handle: &str) -> Result<Actor, AppError> {
        let (private_key_pem, public_key_pem) =
            tokio::task::spawn_blocking(keys::generate_keypair)
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("key generation task failed: {e}")))??;

        self.create_local_actor_with_key(handle, &private_key_pem, &public_key_pem)
            .await
    }

    /// Create each listed local actor that does not exist yet
    pub async fn ensure_local_actors(&self, handles: &[String]) -> Result<(), AppError> {
        for handle in handles {
            let id = local_actor_url(&self.domain, handle)
                .map_err(|e| AppError::Validation(format!("invalid handle {handle}: {e}")))?;
            if self.db.get_actor(id.as_str()).await?.is_none() {
                self.create_local_actor(handle).await?;
            }
        }
        Ok(())
    }

    async fn cache_actor(&self, actor: &Actor) {
        self.actor_cache.insert(actor.clone()).await;
    }
}

#[async_trait]
impl ActorDirectory for LocalStore {
    async fn get_by_id(&self, id: &Url) -> Result<Option<Actor>, AppError> {
        if let Some(actor) = self.actor_cache.get(id.as_str()).await {
            return Ok(Some(actor.as_ref().clone()));
        }

        let actor = self.db.get_actor(id.as_str()).await?;
        if let Some(actor) = &actor {
            self.cache_actor(actor).await;
        }
        Ok(actor)
    }

    async fn get_or_fetch(&self, id: &Url) -> Result<Actor, AppError> {
        if let Some(actor) = ActorDirectory::get_by_id(self, id).await? {
            return Ok(actor);
        }

        if id.host_str() == Some(self.domain.as_str()) {
            return Err(AppError::UnknownEntity(format!("local actor {id}")));
        }

        let document = self.fetcher.fetch_document(id).await?;
        let actor = Actor::from_document(&document, false)
            .ok_or_else(|| AppError::RemoteFetch(format!("{id}: document has no id")))?;

        if actor.id.host_str() != id.host_str() {
            return Err(AppError::RemoteFetch(format!(
                "{id}: document id {} is on another host",
                actor.id
            )));
        }

        self.db.upsert_actor(&actor).await?;
        self.cache_actor(&actor).await;

        tracing::debug!(actor = %actor.id, "Cached remote actor");
        Ok(actor)
    }

    async fn update(&self, id: &Url, document: &Value) -> Result<bool, AppError> {
        let Some(existing) = self.db.get_actor(id.as_str()).await? else {
            return Ok(false);
        };

        let mut document = document.clone();
        if let Some(map) = document.as_object_mut() {
            map.insert("id".to_string(), Value::String(existing.id.to_string()));
        }
        let updated = Actor::from_document(&document, existing.is_local)
            .ok_or_else(|| AppError::MalformedActivity(format!("actor update for {id}")))?;

        let changed = self.db.update_actor_properties(&updated).await?;
        self.actor_cache.invalidate(id.as_str()).await;
        Ok(changed)
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get_by_id(&self, id: &Url) -> Result<Option<ApObject>, AppError> {
        self.db.get_object(id.as_str()).await
    }

    async fn get_by_original_id(&self, original_id: &Url) -> Result<Option<ApObject>, AppError> {
        self.db.get_object_by_original_id(original_id.as_str()).await
    }

    async fn cache_object(
        &self,
        domain: &str,
        raw: &Value,
        owner: &Url,
        original_id: &Url,
        local: bool,
    ) -> Result<Option<CacheOutcome>, AppError> {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let Some(object_type) = ObjectType::from_str(kind) else {
            tracing::debug!(object = %original_id, object_type = %kind, "Object type is not cached");
            return Ok(None);
        };

        if let Some(object) = self.db.get_object_by_original_id(original_id.as_str()).await? {
            return Ok(Some(CacheOutcome {
                created: false,
                object,
            }));
        }

        let id = Url::parse(&format!("https://{domain}/ap/o/{}", EntityId::new().0))
            .map_err(|e| AppError::Validation(format!("invalid domain {domain}: {e}")))?;
        let published = raw
            .get("published")
            .and_then(Value::as_str)
            .and_then(|published| DateTime::parse_from_rfc3339(published).ok())
            .map(|published| published.with_timezone(&Utc));

        let object = ApObject {
            id,
            original_object_id: original_id.clone(),
            original_actor_id: owner.clone(),
            kind: object_type.as_str().to_string(),
            local,
            properties: sanitize_object(raw),
            published,
            created_at: Utc::now(),
        };

        let created = self.db.insert_object_if_absent(&object).await?;
        let stored = self
            .db
            .get_object_by_original_id(original_id.as_str())
            .await?
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "object {original_id} missing after insert"
                ))
            })?;

        Ok(Some(CacheOutcome {
            created,
            object: stored,
        }))
    }

    async fn update(&self, object: &ApObject, raw: &Value) -> Result<bool, AppError> {
        self.db
            .update_object_properties(object.id.as_str(), &sanitize_object(raw))
            .await
    }

    async fn delete(&self, object: &ApObject) -> Result<bool, AppError> {
        self.db.delete_object(object.id.as_str()).await
    }

    async fn fetch_remote(&self, id: &Url) -> Result<Value, AppError> {
        self.fetcher.fetch_document(id).await
    }
}

#[async_trait]
impl FollowStore for LocalStore {
    async fn add(
        &self,
        follower: &Actor,
        followee: &Actor,
        target_acct: &str,
    ) -> Result<bool, AppError> {
        self.db
            .insert_following_if_absent(follower.id.as_str(), followee.id.as_str(), target_acct)
            .await
    }

    async fn accept(&self, follower: &Actor, followee: &Actor) -> Result<(), AppError> {
        let updated = self
            .db
            .accept_following(follower.id.as_str(), followee.id.as_str())
            .await?;
        if !updated {
            tracing::debug!(
                follower = %follower.id,
                followee = %followee.id,
                "Accept for a follow that was never requested"
            );
        }
        Ok(())
    }

    async fn followers_of_collection(&self, collection: &Url) -> Result<Vec<Url>, AppError> {
        self.db
            .get_follower_ids_by_collection(collection.as_str())
            .await?
            .iter()
            .map(|id| url_from_stored(id))
            .collect()
    }
}

#[async_trait]
impl ReplyStore for LocalStore {
    async fn insert(
        &self,
        actor: &Actor,
        object: &ApObject,
        parent: &ApObject,
    ) -> Result<(), AppError> {
        self.db
            .insert_reply(actor.id.as_str(), object.id.as_str(), parent.id.as_str())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LikeStore for LocalStore {
    async fn insert(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError> {
        self.db
            .insert_favourite(actor.id.as_str(), object.id.as_str())
            .await
    }

    async fn exists(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError> {
        self.db
            .has_favourite(actor.id.as_str(), object.id.as_str())
            .await
    }
}

#[async_trait]
impl ReblogStore for LocalStore {
    async fn insert(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError> {
        self.db
            .insert_reblog(actor.id.as_str(), object.id.as_str())
            .await
    }

    async fn exists(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError> {
        self.db
            .has_reblog(actor.id.as_str(), object.id.as_str())
            .await
    }
}

#[async_trait]
impl Timelines for LocalStore {
    async fn add_to_outbox(
        &self,
        actor: &Actor,
        object: &ApObject,
        published: DateTime<Utc>,
        target: &str,
    ) -> Result<(), AppError> {
        self.db
            .insert_outbox_object(actor.id.as_str(), object.id.as_str(), published, target)
            .await?;
        Ok(())
    }

    async fn add_to_inbox(&self, actor: &Actor, object: &ApObject) -> Result<(), AppError> {
        self.db
            .insert_inbox_object(actor.id.as_str(), object.id.as_str())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for LocalStore {
    async fn signing_key(&self, actor: &Actor) -> Result<SigningKey, AppError> {
        let sealed = self
            .db
            .get_encrypted_actor_key(actor.id.as_str())
            .await?
            .ok_or_else(|| AppError::UnknownEntity(format!("signing key of {}", actor.id)))?;

        Ok(SigningKey {
            key_id: format!("{}#main-key", actor.id),
            private_key_pem: keys::decrypt_private_key(&sealed, &self.user_kek)?,
        })
    }
}
