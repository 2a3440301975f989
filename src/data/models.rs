//! Data models
//!
//! Rust structs representing stored entities.
//! Generated ids use ULID and timestamps use chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier returned when a notification row is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// A federated identity, local or remote
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Globally unique actor URI
    pub id: Url,
    /// Person, Service, Group, ...
    pub kind: String,
    pub preferred_username: Option<String>,
    pub inbox: Option<Url>,
    /// Followers collection URI
    pub followers: Option<Url>,
    /// true when the actor is hosted on this instance
    pub is_local: bool,
    /// Full actor document as last seen
    pub properties: serde_json::Value,
}

impl Actor {
    /// Build an actor from its ActivityPub JSON document.
    ///
    /// Returns `None` when the document has no usable `id`.
    pub fn from_document(document: &serde_json::Value, is_local: bool) -> Option<Self> {
        let id = document
            .get("id")
            .and_then(|id| id.as_str())
            .and_then(|id| Url::parse(id).ok())?;
        let url_field = |name: &str| {
            document
                .get(name)
                .and_then(|value| value.as_str())
                .and_then(|value| Url::parse(value).ok())
        };

        Some(Self {
            kind: document
                .get("type")
                .and_then(|kind| kind.as_str())
                .unwrap_or("Person")
                .to_string(),
            preferred_username: document
                .get("preferredUsername")
                .and_then(|name| name.as_str())
                .map(str::to_string),
            inbox: url_field("inbox"),
            followers: url_field("followers"),
            id,
            is_local,
            properties: document.clone(),
        })
    }
}

/// Signing material of a local actor
#[derive(Clone)]
pub struct SigningKey {
    /// `keyId` advertised in the actor document (actor URI + `#main-key`)
    pub key_id: String,
    /// Decrypted PKCS#8 PEM
    pub private_key_pem: String,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Objects
// =============================================================================

/// Object types this deployment can cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Note,
}

impl ObjectType {
    /// Parse a cacheable object type
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Note" => Some(Self::Note),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "Note",
        }
    }
}

/// A federated content object
#[derive(Debug, Clone, PartialEq)]
pub struct ApObject {
    /// Local id, minted by this instance
    pub id: Url,
    /// Identifier under which the object was first published
    pub original_object_id: Url,
    /// Owning actor
    pub original_actor_id: Url,
    pub kind: String,
    /// true when authored on this instance
    pub local: bool,
    /// Object document (sanitized)
    pub properties: serde_json::Value,
    pub published: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApObject {
    /// Parent object URI for replies
    pub fn in_reply_to(&self) -> Option<&str> {
        self.properties
            .get("inReplyTo")
            .and_then(|reply| reply.as_str())
            .filter(|reply| !reply.is_empty())
    }
}

/// Result of an idempotent object cache
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    /// false when the original id was already known
    pub created: bool,
    pub object: ApObject,
}

// =============================================================================
// Relationships
// =============================================================================

/// Follow edge
#[derive(Debug, Clone, PartialEq)]
pub struct FollowEdge {
    pub follower: Url,
    pub followee: Url,
    /// `handle@domain` of the followee
    pub target_acct: String,
    pub accepted: bool,
}

// =============================================================================
// Notifications
// =============================================================================

/// Notification kinds raised by inbound activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Mention,
    Follow,
    Favourite,
    Reblog,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::Follow => "follow",
            Self::Favourite => "favourite",
            Self::Reblog => "reblog",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mention" => Some(Self::Mention),
            "follow" => Some(Self::Follow),
            "favourite" => Some(Self::Favourite),
            "reblog" => Some(Self::Reblog),
            _ => None,
        }
    }
}

/// Stored notification
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub kind: NotificationKind,
    /// Local actor being notified
    pub recipient: Url,
    /// Actor that caused the notification
    pub source: Url,
    /// Subject object, if any (follows have none)
    pub object: Option<Url>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
