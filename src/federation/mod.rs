//! ActivityPub federation module
//!
//! Handles:
//! - Inbound activity processing
//! - Identifier normalization
//! - Recipient resolution
//! - Remote document fetching
//! - Activity delivery (Accept)
//! - HTTP Signatures
//! - Actor key storage

mod activity;
mod collaborators;
mod delivery;
mod fetch;
mod identifier;
pub mod keys;
mod recipients;
mod signature;
mod store;

pub use activity::{ActivityProcessor, ActivityType, Disposition, DropReason};
#[cfg(test)]
pub use collaborators::MockActivitySender;
pub use collaborators::{
    ActivitySender, ActorDirectory, Collaborators, FollowStore, KeyStore, LikeStore, Notice,
    NotificationDispatcher, ObjectStore, PushSettings, ReblogStore, ReplyStore, Timelines,
};
pub use delivery::{ActivityDelivery, builder};
pub use fetch::{RemoteFetcher, validate_fetch_target};
pub use identifier::{Activity, PUBLIC_COLLECTION, Reference};
pub use recipients::{LOCAL_ACTOR_PATH, Recipient, RecipientResolver, local_actor_url};
pub use signature::{SignatureHeaders, generate_digest, sign_request};
pub use store::LocalStore;
