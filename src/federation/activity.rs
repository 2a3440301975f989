//! Activity processing
//!
//! Single entry point for inbound activities. Dispatches on the activity type
//! and orchestrates the collaborators. Every handler reports a typed
//! [`Disposition`]: malformed structure and spoofed updates are errors,
//! everything a misbehaving or merely unusual peer can send is a
//! [`DropReason`] that is logged and counted.

use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::time::Instant;
use url::Url;

use super::collaborators::{Collaborators, Notice, PushSettings};
use super::delivery::builder;
use super::identifier::{Activity, Reference};
use super::recipients::{Recipient, RecipientResolver};
use crate::data::{Actor, ApObject, EntityId, NotificationKind, ObjectType};
use crate::error::AppError;
use crate::metrics::{ACTIVITIES_RECEIVED_TOTAL, observe_activity};

/// ActivityPub Activity types handled here
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    Create,
    Update,
    Delete,
    Follow,
    Accept,
    Like,
    Announce,
}

impl ActivityType {
    /// Parse activity type from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Update" => Some(Self::Update),
            "Delete" => Some(Self::Delete),
            "Follow" => Some(Self::Follow),
            "Accept" => Some(Self::Accept),
            "Like" => Some(Self::Like),
            "Announce" => Some(Self::Announce),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Like => "Like",
            Self::Announce => "Announce",
        }
    }
}

/// Why an activity was dropped without effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnsupportedActivity(String),
    UnsupportedObjectType(String),
    /// Already applied (retried delivery, re-announcement)
    Duplicate,
    UnknownActor(String),
    UnknownObject(String),
    /// Actor is not the owner of the object it tries to mutate
    Unauthorized { actor: String, owner: String },
    RemoteFetch(String),
}

impl DropReason {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnsupportedActivity(_) => "unsupported_activity",
            Self::UnsupportedObjectType(_) => "unsupported_object_type",
            Self::Duplicate => "duplicate",
            Self::UnknownActor(_) => "unknown_actor",
            Self::UnknownObject(_) => "unknown_object",
            Self::Unauthorized { .. } => "unauthorized",
            Self::RemoteFetch(_) => "remote_fetch",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedActivity(kind) => write!(f, "unsupported activity type {kind}"),
            Self::UnsupportedObjectType(kind) => write!(f, "unsupported object type {kind}"),
            Self::Duplicate => f.write_str("duplicate delivery"),
            Self::UnknownActor(id) => write!(f, "unknown actor {id}"),
            Self::UnknownObject(id) => write!(f, "unknown object {id}"),
            Self::Unauthorized { actor, owner } => {
                write!(f, "actor {actor} does not own the object (owner {owner})")
            }
            Self::RemoteFetch(reason) => write!(f, "remote fetch failed: {reason}"),
        }
    }
}

/// Outcome of processing one activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Dropped(DropReason),
}

/// Either the resolved value, or the reason the activity is dropped
type Resolution<T> = Result<T, DropReason>;

/// Turn a resolution failure into a drop reason, keeping storage errors fatal
fn fetch_failure(error: AppError) -> Result<DropReason, AppError> {
    match error {
        AppError::RemoteFetch(reason) => Ok(DropReason::RemoteFetch(reason)),
        AppError::UnknownEntity(id) => Ok(DropReason::UnknownActor(id)),
        error @ (AppError::HttpClient(_) | AppError::Federation(_) | AppError::Forbidden) => {
            Ok(DropReason::RemoteFetch(error.to_string()))
        }
        other => Err(other),
    }
}

/// Owner of a fetched object document
fn attributed_to(document: &Value) -> Option<Url> {
    let attributed = document.get("attributedTo")?;
    serde_json::from_value::<Reference>(attributed.clone())
        .ok()?
        .raw_id()
        .and_then(|id| Url::parse(&id).ok())
}

/// Activity processor
///
/// Processes incoming ActivityPub activities from inboxes.
pub struct ActivityProcessor {
    /// Public domain of this instance
    domain: String,
    c: Collaborators,
    recipients: RecipientResolver,
    push: PushSettings,
}

impl ActivityProcessor {
    /// Create new activity processor
    pub fn new(domain: impl Into<String>, collaborators: Collaborators, push: PushSettings) -> Self {
        let domain = domain.into();
        let recipients = RecipientResolver::new(
            domain.clone(),
            collaborators.actors.clone(),
            collaborators.follows.clone(),
        );

        Self {
            domain,
            c: collaborators,
            recipients,
            push,
        }
    }

    /// Process an incoming activity
    ///
    /// # Arguments
    /// * `raw` - Activity JSON, signature already verified upstream
    ///
    /// # Returns
    /// `Applied` or `Dropped(reason)`; an error means the activity is
    /// malformed or not authorized and the sender should be told so.
    pub async fn process(&self, raw: Value) -> Result<Disposition, AppError> {
        let started = Instant::now();

        let activity = match Activity::from_value(raw.clone()) {
            Ok(activity) => activity,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected inbound document");
                observe_activity("invalid", "error", started.elapsed());
                return Err(e);
            }
        };

        let activity_type = ActivityType::from_str(&activity.kind);
        let type_label = activity_type.map(|t| t.as_str()).unwrap_or("other");
        ACTIVITIES_RECEIVED_TOTAL
            .with_label_values(&[type_label])
            .inc();

        let result = match activity_type {
            Some(ActivityType::Create) => self.handle_create(&activity).await,
            Some(ActivityType::Update) => self.handle_update(&activity).await,
            Some(ActivityType::Delete) => self.handle_delete(&activity).await,
            Some(ActivityType::Follow) => self.handle_follow(&activity, &raw).await,
            Some(ActivityType::Accept) => self.handle_accept(&activity).await,
            Some(ActivityType::Like) => self.handle_like(&activity).await,
            Some(ActivityType::Announce) => self.handle_announce(&activity).await,
            None => Ok(Disposition::Dropped(DropReason::UnsupportedActivity(
                activity.kind.clone(),
            ))),
        };

        let actor = activity.actor.raw_id().unwrap_or_default();
        let object = activity.object.raw_id().unwrap_or_default();
        let outcome = match &result {
            Ok(Disposition::Applied) => {
                tracing::debug!(activity_type = %activity.kind, %actor, %object, "Activity applied");
                "applied"
            }
            Ok(Disposition::Dropped(reason)) => {
                tracing::info!(
                    activity_type = %activity.kind,
                    %actor,
                    %object,
                    reason = %reason,
                    "Activity dropped"
                );
                reason.label()
            }
            Err(e) => {
                tracing::warn!(
                    activity_type = %activity.kind,
                    %actor,
                    %object,
                    error = %e,
                    "Activity failed"
                );
                "error"
            }
        };
        observe_activity(type_label, outcome, started.elapsed());

        result
    }

    /// Resolve an actor, fetching it when unknown
    async fn resolve_actor(&self, id: &Url) -> Result<Resolution<Actor>, AppError> {
        match self.c.actors.get_or_fetch(id).await {
            Ok(actor) => Ok(Ok(actor)),
            Err(e) => fetch_failure(e).map(Err),
        }
    }

    /// Create a notification and hand it to delivery
    ///
    /// Failures are logged; a notification never fails the activity.
    async fn notify(
        &self,
        kind: NotificationKind,
        recipient: &Actor,
        source: &Actor,
        object: Option<&ApObject>,
    ) {
        let id = match self
            .c
            .notifications
            .create(kind, recipient, source, object)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    kind = kind.as_str(),
                    recipient = %recipient.id,
                    error = %e,
                    "Failed to create notification"
                );
                return;
            }
        };

        self.send_notice(Notice {
            id,
            kind,
            recipient: recipient.clone(),
            source: source.clone(),
            object: object.cloned(),
        })
        .await;
    }

    async fn send_notice(&self, notice: Notice) {
        if let Err(e) = self.c.notifications.send(&notice, &self.push).await {
            tracing::error!(
                notification = %notice.id,
                recipient = %notice.recipient.id,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    /// Handle Update activity
    ///
    /// The target must already exist and belong to the activity's actor.
    async fn handle_update(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let object = activity.embedded_object()?;
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;
        let document = Value::Object(object.clone());

        match activity.object.embedded_type() {
            Some("Note") => {
                let existing = self
                    .c
                    .objects
                    .get_by_original_id(&object_id)
                    .await?
                    .ok_or_else(|| AppError::UnknownEntity(format!("object {object_id}")))?;

                if existing.original_actor_id != actor_id {
                    return Err(AppError::AuthorizationMismatch {
                        actor: actor_id.to_string(),
                        owner: existing.original_actor_id.to_string(),
                    });
                }

                if !self.c.objects.update(&existing, &document).await? {
                    return Err(AppError::Internal(anyhow::anyhow!(
                        "update of {object_id} did not apply"
                    )));
                }
            }
            Some(kind @ ("Person" | "Service")) => {
                if self.c.actors.get_by_id(&object_id).await?.is_none() {
                    return Err(AppError::UnknownEntity(format!("actor {object_id}")));
                }

                if actor_id != object_id {
                    return Err(AppError::AuthorizationMismatch {
                        actor: actor_id.to_string(),
                        owner: object_id.to_string(),
                    });
                }

                if !self.c.actors.update(&object_id, &document).await? {
                    return Err(AppError::Internal(anyhow::anyhow!(
                        "update of {kind} {object_id} did not apply"
                    )));
                }
            }
            other => {
                return Ok(Disposition::Dropped(DropReason::UnsupportedObjectType(
                    other.unwrap_or("unknown").to_string(),
                )));
            }
        }

        tracing::info!(actor = %actor_id, object = %object_id, "Applied update");
        Ok(Disposition::Applied)
    }

    /// Handle Create activity
    async fn handle_create(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let object = activity.embedded_object()?;
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;
        let target = activity.target();

        let author = match self.resolve_actor(&actor_id).await? {
            Ok(author) => author,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        let document = Value::Object(object.clone());
        let Some(outcome) = self
            .c
            .objects
            .cache_object(&self.domain, &document, &author.id, &object_id, author.is_local)
            .await?
        else {
            return Ok(Disposition::Dropped(DropReason::UnsupportedObjectType(
                activity
                    .object
                    .embedded_type()
                    .unwrap_or("unknown")
                    .to_string(),
            )));
        };

        if !outcome.created {
            return Ok(Disposition::Dropped(DropReason::Duplicate));
        }
        let note = outcome.object;

        if note.kind == ObjectType::Note.as_str() {
            if let Some(parent) = note.in_reply_to() {
                self.record_reply(&author, &note, parent).await?;
            }
        }

        let published = activity
            .published_at()
            .or(note.published)
            .unwrap_or_else(Utc::now);
        self.c
            .timelines
            .add_to_outbox(&author, &note, published, target)
            .await?;

        for recipient in self.recipients.resolve(activity).await {
            match recipient {
                Recipient::Local(actor) => {
                    let (inbox, ()) = tokio::join!(
                        self.c.timelines.add_to_inbox(&actor, &note),
                        self.notify(NotificationKind::Mention, &actor, &author, Some(&note)),
                    );
                    inbox?;
                }
                Recipient::Collection { uri, members } => {
                    // Members are not delivered to.
                    tracing::info!(
                        collection = %uri,
                        members = members.len(),
                        object = %note.id,
                        "Collection recipient expanded"
                    );
                }
                Recipient::Skipped(address) => {
                    tracing::debug!(recipient = %address, object = %note.id, "Recipient skipped");
                }
            }
        }

        tracing::info!(actor = %author.id, object = %note.id, "Created object");
        Ok(Disposition::Applied)
    }

    /// Record that `note` replies to `parent`, fetching the parent if needed
    ///
    /// A parent that cannot be resolved only skips the reply edge.
    async fn record_reply(
        &self,
        author: &Actor,
        note: &ApObject,
        parent: &str,
    ) -> Result<(), AppError> {
        let parent_id = match Url::parse(parent) {
            Ok(parent_id) => parent_id,
            Err(e) => {
                tracing::warn!(object = %note.id, in_reply_to = %parent, error = %e, "Invalid inReplyTo");
                return Ok(());
            }
        };

        let parent = match self.c.objects.get_by_original_id(&parent_id).await? {
            Some(parent) => parent,
            None => match self.fetch_and_cache(&parent_id, &author.id).await? {
                Ok(parent) => parent,
                Err(reason) => {
                    tracing::warn!(
                        object = %note.id,
                        in_reply_to = %parent_id,
                        reason = %reason,
                        "Reply parent unavailable"
                    );
                    return Ok(());
                }
            },
        };

        self.c.replies.insert(author, note, &parent).await
    }

    /// Fetch a remote object and cache it
    ///
    /// The owner is the document's `attributedTo`, else `fallback_owner`.
    async fn fetch_and_cache(
        &self,
        id: &Url,
        fallback_owner: &Url,
    ) -> Result<Resolution<ApObject>, AppError> {
        if id.host_str() == Some(self.domain.as_str()) {
            return Ok(Err(DropReason::UnknownObject(id.to_string())));
        }

        let document = match self.c.objects.fetch_remote(id).await {
            Ok(document) => document,
            Err(e) => return fetch_failure(e).map(Err),
        };
        let owner = attributed_to(&document).unwrap_or_else(|| fallback_owner.clone());

        match self
            .c
            .objects
            .cache_object(&self.domain, &document, &owner, id, false)
            .await?
        {
            Some(outcome) => Ok(Ok(outcome.object)),
            None => Ok(Err(DropReason::UnsupportedObjectType(
                document
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            ))),
        }
    }

    /// Handle Accept activity (our follow request was accepted)
    async fn handle_accept(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let follow = activity.embedded_object()?;
        let actor_id = activity.actor_id()?;

        let follower_ref = follow.get("actor").ok_or_else(|| {
            AppError::MalformedActivity("Accept object has no actor".to_string())
        })?;
        let follower_id = serde_json::from_value::<Reference>(follower_ref.clone())
            .map_err(|e| AppError::MalformedActivity(format!("object.actor: {e}")))?
            .resolve("object.actor")?;

        let Some(follower) = self.c.actors.get_by_id(&follower_id).await? else {
            return Ok(Disposition::Dropped(DropReason::UnknownActor(
                follower_id.to_string(),
            )));
        };

        let accepter = match self.resolve_actor(&actor_id).await? {
            Ok(accepter) => accepter,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        self.c.follows.accept(&follower, &accepter).await?;

        tracing::info!(follower = %follower.id, followee = %accepter.id, "Follow accepted");
        Ok(Disposition::Applied)
    }

    /// Handle Follow activity
    ///
    /// Follows of local actors are accepted automatically.
    async fn handle_follow(&self, activity: &Activity, raw: &Value) -> Result<Disposition, AppError> {
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;

        // Only actors hosted here can be followed through this inbox.
        let followee = match self.c.actors.get_by_id(&object_id).await? {
            Some(followee) if followee.is_local => followee,
            _ => {
                return Ok(Disposition::Dropped(DropReason::UnknownActor(
                    object_id.to_string(),
                )));
            }
        };

        let follower = match self.resolve_actor(&actor_id).await? {
            Ok(follower) => follower,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        let handle = followee.preferred_username.clone().unwrap_or_else(|| {
            followee
                .id
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default()
                .to_string()
        });
        let target_acct = format!("{handle}@{}", self.domain);

        let inserted = self
            .c
            .follows
            .add(&follower, &followee, &target_acct)
            .await?;
        self.c.follows.accept(&follower, &followee).await?;

        self.send_accept(&followee, &follower, raw).await;

        if inserted {
            self.notify(NotificationKind::Follow, &followee, &follower, None)
                .await;
        } else {
            tracing::debug!(
                follower = %follower.id,
                followee = %followee.id,
                "Repeated follow; not notifying again"
            );
        }

        tracing::info!(follower = %follower.id, followee = %followee.id, "Follow accepted");
        Ok(Disposition::Applied)
    }

    /// Sign and deliver an Accept for `follow`
    ///
    /// Delivery failures are logged; the follow edge is already stored.
    async fn send_accept(&self, followee: &Actor, follower: &Actor, follow: &Value) {
        let key = match self.c.keys.signing_key(followee).await {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(actor = %followee.id, error = %e, "No signing key for Accept");
                return;
            }
        };

        let id = format!("https://{}/ap/a/{}", self.domain, EntityId::new().0);
        let accept = builder::accept(&id, followee.id.as_str(), follow.clone());

        if let Err(e) = self
            .c
            .sender
            .deliver(&key, followee, follower, &accept, &self.domain)
            .await
        {
            tracing::error!(to = %follower.id, error = %e, "Failed to deliver Accept");
        }
    }

    /// Handle Announce activity (reblog)
    async fn handle_announce(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;

        let object = match self.c.objects.get_by_id(&object_id).await? {
            Some(object) => object,
            None => match self.c.objects.get_by_original_id(&object_id).await? {
                Some(object) => object,
                None => match self.fetch_and_cache(&object_id, &actor_id).await? {
                    Ok(object) => object,
                    Err(reason) => return Ok(Disposition::Dropped(reason)),
                },
            },
        };

        let announcer = match self.resolve_actor(&actor_id).await? {
            Ok(announcer) => announcer,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        if self.c.reblogs.exists(&announcer, &object).await? {
            return Ok(Disposition::Dropped(DropReason::Duplicate));
        }

        // A fetched object's author may not be known here yet
        let owner = match self.resolve_actor(&object.original_actor_id).await? {
            Ok(owner) => owner,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        if owner.is_local {
            let (inserted, ()) = tokio::join!(
                self.c.reblogs.insert(&announcer, &object),
                self.notify(NotificationKind::Reblog, &owner, &announcer, Some(&object)),
            );
            inserted?;
        } else {
            self.c.reblogs.insert(&announcer, &object).await?;
        }

        tracing::info!(actor = %announcer.id, object = %object.id, "Recorded reblog");
        Ok(Disposition::Applied)
    }

    /// Handle Like activity
    async fn handle_like(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;

        let Some(object) = self.c.objects.get_by_id(&object_id).await? else {
            return Ok(Disposition::Dropped(DropReason::UnknownObject(
                object_id.to_string(),
            )));
        };

        let liker = match self.resolve_actor(&actor_id).await? {
            Ok(liker) => liker,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        let owner = match self.resolve_actor(&object.original_actor_id).await? {
            Ok(owner) => owner,
            Err(reason) => return Ok(Disposition::Dropped(reason)),
        };

        if self.c.likes.exists(&liker, &object).await? {
            return Ok(Disposition::Dropped(DropReason::Duplicate));
        }

        if owner.is_local {
            let (created, inserted) = tokio::join!(
                self.c.notifications.create(
                    NotificationKind::Favourite,
                    &owner,
                    &liker,
                    Some(&object)
                ),
                self.c.likes.insert(&liker, &object),
            );
            inserted?;

            match created {
                Ok(id) => {
                    self.send_notice(Notice {
                        id,
                        kind: NotificationKind::Favourite,
                        recipient: owner,
                        source: liker.clone(),
                        object: Some(object.clone()),
                    })
                    .await;
                }
                Err(e) => {
                    tracing::error!(object = %object.id, error = %e, "Failed to create notification");
                }
            }
        } else {
            self.c.likes.insert(&liker, &object).await?;
        }

        tracing::info!(actor = %liker.id, object = %object.id, "Recorded like");
        Ok(Disposition::Applied)
    }

    /// Handle Delete activity
    async fn handle_delete(&self, activity: &Activity) -> Result<Disposition, AppError> {
        let actor_id = activity.actor_id()?;
        let object_id = activity.object_id()?;

        let Some(object) = self.c.objects.get_by_original_id(&object_id).await? else {
            return Ok(Disposition::Dropped(DropReason::UnknownObject(
                object_id.to_string(),
            )));
        };

        if object.original_actor_id != actor_id {
            tracing::warn!(
                actor = %actor_id,
                owner = %object.original_actor_id,
                object = %object.id,
                "Unauthorized Delete"
            );
            return Ok(Disposition::Dropped(DropReason::Unauthorized {
                actor: actor_id.to_string(),
                owner: object.original_actor_id.to_string(),
            }));
        }

        if object.kind != ObjectType::Note.as_str() {
            return Ok(Disposition::Dropped(DropReason::UnsupportedObjectType(
                object.kind.clone(),
            )));
        }

        if !self.c.objects.delete(&object).await? {
            return Ok(Disposition::Dropped(DropReason::UnknownObject(
                object_id.to_string(),
            )));
        }

        tracing::info!(actor = %actor_id, object = %object.id, "Deleted object");
        Ok(Disposition::Applied)
    }
}
