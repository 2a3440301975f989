//! Interfaces the activity processor depends on
//!
//! The processor only orchestrates; storage, remote fetching, delivery and
//! notifications live behind these traits. [`LocalStore`](super::LocalStore)
//! implements the storage side on SQLite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::data::{Actor, ApObject, CacheOutcome, NotificationId, NotificationKind, SigningKey};
use crate::error::AppError;

/// Actor lookup and get-or-fetch
#[async_trait]
pub trait ActorDirectory: Send + Sync {
    /// Actor already known to this instance
    async fn get_by_id(&self, id: &Url) -> Result<Option<Actor>, AppError>;

    /// Known actor, or fetch and cache the remote document
    async fn get_or_fetch(&self, id: &Url) -> Result<Actor, AppError>;

    /// Replace the stored document of a known actor
    async fn update(&self, id: &Url, document: &Value) -> Result<bool, AppError>;
}

/// Federated content objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_by_id(&self, id: &Url) -> Result<Option<ApObject>, AppError>;

    async fn get_by_original_id(&self, original_id: &Url) -> Result<Option<ApObject>, AppError>;

    /// Store `raw` unless `original_id` is already known
    ///
    /// Returns `None` for object types this instance does not cache.
    async fn cache_object(
        &self,
        domain: &str,
        raw: &Value,
        owner: &Url,
        original_id: &Url,
        local: bool,
    ) -> Result<Option<CacheOutcome>, AppError>;

    async fn update(&self, object: &ApObject, raw: &Value) -> Result<bool, AppError>;

    /// Returns false when the object was already gone
    async fn delete(&self, object: &ApObject) -> Result<bool, AppError>;

    /// Fetch a remote document without storing it
    async fn fetch_remote(&self, id: &Url) -> Result<Value, AppError>;
}

/// Follow edges
#[async_trait]
pub trait FollowStore: Send + Sync {
    /// Insert a pending edge; false if the pair already existed
    async fn add(&self, follower: &Actor, followee: &Actor, target_acct: &str)
    -> Result<bool, AppError>;

    async fn accept(&self, follower: &Actor, followee: &Actor) -> Result<(), AppError>;

    /// Follower ids of the actor owning `collection`
    async fn followers_of_collection(&self, collection: &Url) -> Result<Vec<Url>, AppError>;
}

#[async_trait]
pub trait ReplyStore: Send + Sync {
    async fn insert(&self, actor: &Actor, object: &ApObject, parent: &ApObject)
    -> Result<(), AppError>;
}

#[async_trait]
pub trait LikeStore: Send + Sync {
    /// false if the edge already existed
    async fn insert(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError>;

    async fn exists(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ReblogStore: Send + Sync {
    /// false if the edge already existed
    async fn insert(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError>;

    async fn exists(&self, actor: &Actor, object: &ApObject) -> Result<bool, AppError>;
}

/// Per-actor inbox and outbox
#[async_trait]
pub trait Timelines: Send + Sync {
    async fn add_to_outbox(
        &self,
        actor: &Actor,
        object: &ApObject,
        published: DateTime<Utc>,
        target: &str,
    ) -> Result<(), AppError>;

    async fn add_to_inbox(&self, actor: &Actor, object: &ApObject) -> Result<(), AppError>;
}

/// Signing keys of local actors
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn signing_key(&self, actor: &Actor) -> Result<SigningKey, AppError>;
}

/// Push delivery settings handed to the notification dispatcher
#[derive(Debug, Clone, Default)]
pub struct PushSettings {
    pub admin_email: String,
    pub vapid_public_key: Option<String>,
    pub vapid_private_key: Option<String>,
}

/// A created notification, ready to be sent
#[derive(Debug, Clone)]
pub struct Notice {
    pub id: NotificationId,
    pub kind: NotificationKind,
    pub recipient: Actor,
    pub source: Actor,
    pub object: Option<ApObject>,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Persist a notification
    async fn create(
        &self,
        kind: NotificationKind,
        recipient: &Actor,
        source: &Actor,
        object: Option<&ApObject>,
    ) -> Result<NotificationId, AppError>;

    /// Hand a created notification to delivery
    async fn send(&self, notice: &Notice, push: &PushSettings) -> Result<(), AppError>;
}

/// Outbound delivery of a signed activity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivitySender: Send + Sync {
    async fn deliver(
        &self,
        key: &SigningKey,
        from: &Actor,
        to: &Actor,
        activity: &Value,
        domain: &str,
    ) -> Result<(), AppError>;
}

/// Everything the processor talks to
#[derive(Clone)]
pub struct Collaborators {
    pub actors: Arc<dyn ActorDirectory>,
    pub objects: Arc<dyn ObjectStore>,
    pub follows: Arc<dyn FollowStore>,
    pub replies: Arc<dyn ReplyStore>,
    pub likes: Arc<dyn LikeStore>,
    pub reblogs: Arc<dyn ReblogStore>,
    pub timelines: Arc<dyn Timelines>,
    pub keys: Arc<dyn KeyStore>,
    pub notifications: Arc<dyn NotificationDispatcher>,
    pub sender: Arc<dyn ActivitySender>,
}

impl Collaborators {
    /// Use one store for every storage-side interface
    pub fn from_store<S>(
        store: Arc<S>,
        notifications: Arc<dyn NotificationDispatcher>,
        sender: Arc<dyn ActivitySender>,
    ) -> Self
    where
        S: ActorDirectory
            + ObjectStore
            + FollowStore
            + ReplyStore
            + LikeStore
            + ReblogStore
            + Timelines
            + KeyStore
            + 'static,
    {
        Self {
            actors: store.clone(),
            objects: store.clone(),
            follows: store.clone(),
            replies: store.clone(),
            likes: store.clone(),
            reblogs: store.clone(),
            timelines: store.clone(),
            keys: store,
            notifications,
            sender,
        }
    }
}
