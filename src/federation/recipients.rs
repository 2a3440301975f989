//! Recipient resolution
//!
//! Expands an activity's `to`/`cc` addressing into local actors and local
//! collection members. A bad address never fails the whole activity; it is
//! logged and reported as [`Recipient::Skipped`].

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use super::collaborators::{ActorDirectory, FollowStore};
use super::identifier::Activity;
use crate::data::Actor;

/// Path prefix of local actor URIs
pub const LOCAL_ACTOR_PATH: &str = "/ap/users/";

/// One classified address
#[derive(Debug, Clone)]
pub enum Recipient {
    /// An actor hosted here
    Local(Actor),
    /// A collection hosted here, with its resolvable members
    Collection { uri: Url, members: Vec<Actor> },
    /// Unsupported or unresolvable address
    Skipped(String),
}

/// Canonical URI of a local actor
pub fn local_actor_url(domain: &str, handle: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!("https://{domain}{LOCAL_ACTOR_PATH}{handle}"))
}

pub struct RecipientResolver {
    domain: String,
    actors: Arc<dyn ActorDirectory>,
    follows: Arc<dyn FollowStore>,
}

impl RecipientResolver {
    pub fn new(
        domain: impl Into<String>,
        actors: Arc<dyn ActorDirectory>,
        follows: Arc<dyn FollowStore>,
    ) -> Self {
        Self {
            domain: domain.into(),
            actors,
            follows,
        }
    }

    /// Handle of a local direct-actor address
    ///
    /// Accepts `/ap/users/{local}` and `/ap/users/{local}@{domain}`.
    fn local_handle<'a>(&self, uri: &'a Url) -> Option<&'a str> {
        if uri.host_str() != Some(self.domain.as_str()) {
            return None;
        }

        let handle = uri.path().strip_prefix(LOCAL_ACTOR_PATH)?;
        if handle.is_empty() || handle.contains('/') {
            return None;
        }

        match handle.split_once('@') {
            Some((local, domain)) if domain == self.domain && !local.is_empty() => Some(local),
            Some(_) => None,
            None => Some(handle),
        }
    }

    /// Classify every distinct `to`/`cc` address, in order
    pub async fn resolve(&self, activity: &Activity) -> Vec<Recipient> {
        if activity.to.len() > 1 {
            tracing::warn!(
                activity_type = %activity.kind,
                count = activity.to.len(),
                "Activity has more than one `to` entry; only the first is the target"
            );
        }

        let mut seen = HashSet::new();
        let mut local_ids = HashSet::new();
        let mut recipients = Vec::new();

        for address in activity.to.iter().chain(activity.cc.iter()) {
            if !seen.insert(address.as_str()) {
                continue;
            }
            let recipient = self.classify(address).await;
            // `bob` and `bob@domain` name the same actor
            if let Recipient::Local(actor) = &recipient {
                if !local_ids.insert(actor.id.clone()) {
                    continue;
                }
            }
            recipients.push(recipient);
        }

        recipients
    }

    async fn classify(&self, address: &str) -> Recipient {
        let uri = match Url::parse(address) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(recipient = %address, error = %e, "Recipient is not a URI");
                return Recipient::Skipped(address.to_string());
            }
        };

        if let Some(handle) = self.local_handle(&uri) {
            return self.resolve_local_actor(&uri, handle).await;
        }

        if uri.host_str() != Some(self.domain.as_str()) {
            tracing::debug!(recipient = %uri, "Skipping collection on another server");
            return Recipient::Skipped(address.to_string());
        }

        self.expand_collection(uri).await
    }

    async fn resolve_local_actor(&self, uri: &Url, handle: &str) -> Recipient {
        let id = match local_actor_url(&self.domain, handle) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(recipient = %uri, error = %e, "Invalid local handle");
                return Recipient::Skipped(uri.to_string());
            }
        };

        match self.actors.get_by_id(&id).await {
            Ok(Some(actor)) => Recipient::Local(actor),
            Ok(None) => {
                tracing::warn!(recipient = %uri, "Local recipient not found");
                Recipient::Skipped(uri.to_string())
            }
            Err(e) => {
                tracing::warn!(recipient = %uri, error = %e, "Failed to resolve local recipient");
                Recipient::Skipped(uri.to_string())
            }
        }
    }

    async fn expand_collection(&self, uri: Url) -> Recipient {
        let follower_ids = match self.follows.followers_of_collection(&uri).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(collection = %uri, error = %e, "Failed to expand collection");
                return Recipient::Skipped(uri.to_string());
            }
        };

        let mut members = Vec::with_capacity(follower_ids.len());
        for id in follower_ids {
            match self.actors.get_by_id(&id).await {
                Ok(Some(actor)) => members.push(actor),
                Ok(None) => {
                    tracing::warn!(collection = %uri, member = %id, "Collection member not found");
                }
                Err(e) => {
                    tracing::warn!(
                        collection = %uri,
                        member = %id,
                        error = %e,
                        "Failed to resolve collection member"
                    );
                }
            }
        }

        Recipient::Collection { uri, members }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ActorCache, Database};
    use crate::federation::{LocalStore, RemoteFetcher};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    const DOMAIN: &str = "local.test";
    const PUBLIC_ADDRESS: &str = crate::federation::PUBLIC_COLLECTION;

    async fn create_test_resolver() -> (RecipientResolver, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );
        let store = Arc::new(LocalStore::new(
            db.clone(),
            RemoteFetcher::new(Duration::from_secs(5), true).unwrap(),
            ActorCache::new(100, Duration::from_secs(60)),
            DOMAIN,
            "0123456789abcdef0123456789abcdef",
        ));
        store
            .create_local_actor_with_key("bob", "private", "public")
            .await
            .unwrap();

        let resolver = RecipientResolver::new(DOMAIN, store.clone(), store);
        (resolver, db, temp_dir)
    }

    fn addressed(to: serde_json::Value, cc: serde_json::Value) -> Activity {
        Activity::from_value(json!({ "type": "Create", "to": to, "cc": cc })).unwrap()
    }

    #[test]
    fn local_actor_url_uses_actor_path() {
        assert_eq!(
            local_actor_url(DOMAIN, "bob").unwrap().as_str(),
            "https://local.test/ap/users/bob"
        );
    }

    #[tokio::test]
    async fn resolves_local_actor_in_both_address_forms() {
        let (resolver, _db, _temp_dir) = create_test_resolver().await;
        for address in [
            "https://local.test/ap/users/bob",
            "https://local.test/ap/users/bob@local.test",
        ] {
            let activity = addressed(json!([address]), json!([]));
            match resolver.resolve(&activity).await.as_slice() {
                [Recipient::Local(actor)] => {
                    assert_eq!(actor.id.as_str(), "https://local.test/ap/users/bob")
                }
                other => panic!("expected local actor, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn both_address_forms_of_one_actor_resolve_once() {
        let (resolver, _db, _temp_dir) = create_test_resolver().await;
        let activity = addressed(
            json!(["https://local.test/ap/users/bob"]),
            json!(["https://local.test/ap/users/bob@local.test"]),
        );

        let recipients = resolver.resolve(&activity).await;

        match recipients.as_slice() {
            [Recipient::Local(actor)] => {
                assert_eq!(actor.id.as_str(), "https://local.test/ap/users/bob")
            }
            other => panic!("expected one local actor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skips_public_foreign_and_unknown_addresses() {
        let (resolver, _db, _temp_dir) = create_test_resolver().await;
        let activity = addressed(
            json!(PUBLIC_ADDRESS),
            json!([
                "https://remote.test/users/alice/followers",
                "https://local.test/ap/users/nobody",
                "::not a uri::"
            ]),
        );

        let recipients = resolver.resolve(&activity).await;

        assert_eq!(recipients.len(), 4);
        assert!(
            recipients
                .iter()
                .all(|recipient| matches!(recipient, Recipient::Skipped(_)))
        );
    }

    #[tokio::test]
    async fn expands_local_followers_collection() {
        let (resolver, db, _temp_dir) = create_test_resolver().await;
        let alice = Actor::from_document(
            &json!({ "id": "https://remote.test/users/alice", "type": "Person" }),
            false,
        )
        .unwrap();
        db.upsert_actor(&alice).await.unwrap();
        db.insert_following_if_absent(
            alice.id.as_str(),
            "https://local.test/ap/users/bob",
            "bob@local.test",
        )
        .await
        .unwrap();

        let activity = addressed(json!(["https://local.test/ap/users/bob/followers"]), json!([]));
        let recipients = resolver.resolve(&activity).await;

        match recipients.as_slice() {
            [Recipient::Collection { uri, members }] => {
                assert_eq!(uri.as_str(), "https://local.test/ap/users/bob/followers");
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].id, alice.id);
            }
            other => panic!("expected one collection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_addresses_resolve_once() {
        let (resolver, _db, _temp_dir) = create_test_resolver().await;
        let activity = addressed(
            json!(["https://local.test/ap/users/bob"]),
            json!(["https://local.test/ap/users/bob", "https://local.test/ap/users/bob"]),
        );

        assert_eq!(resolver.resolve(&activity).await.len(), 1);
    }
}
