//! Inbound activity model and identifier normalization
//!
//! ActivityPub allows `actor` and `object` to be sent either as a bare URI or
//! as an embedded document carrying an `id`. Peers are inconsistent about
//! which form they use, so handlers never look at the raw field: they call
//! [`Activity::actor_id`] / [`Activity::object_id`] and get a canonical `Url`.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use url::Url;

use crate::error::AppError;

/// The public addressing collection
pub const PUBLIC_COLLECTION: &str = "https://www.w3.org/ns/activitystreams#Public";

/// A polymorphic `actor` / `object` field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// Compact form: a bare URI string
    Id(String),
    /// Expanded form: an embedded document
    Embedded(Map<String, Value>),
    /// Already-resolved identifier, built programmatically
    #[serde(skip)]
    Resolved(Url),
    /// Anything else (numbers, arrays, null)
    Other(Value),
}

impl Default for Reference {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

impl Reference {
    /// Embedded document, if the field was sent in expanded form
    pub fn as_embedded(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Embedded(map) => Some(map),
            _ => None,
        }
    }

    /// `type` of an embedded document
    pub fn embedded_type(&self) -> Option<&str> {
        self.as_embedded()
            .and_then(|map| map.get("type"))
            .and_then(Value::as_str)
    }

    /// Identifier as sent, without validation (for logs)
    pub fn raw_id(&self) -> Option<String> {
        match self {
            Self::Id(id) => Some(id.clone()),
            Self::Embedded(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
            Self::Resolved(url) => Some(url.to_string()),
            Self::Other(_) => None,
        }
    }

    /// Normalize to a canonical absolute URI
    ///
    /// `field` names the activity field for error messages and logs.
    pub fn resolve(&self, field: &str) -> Result<Url, AppError> {
        let raw = match self {
            Self::Embedded(map) => match map.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id,
                _ => {
                    return Err(AppError::MalformedActivity(format!(
                        "embedded {field} has no id"
                    )));
                }
            },
            Self::Id(id) => id.as_str(),
            Self::Resolved(url) => return Ok(url.clone()),
            Self::Other(_) => {
                return Err(AppError::MalformedActivity(format!(
                    "{field} is neither a URI nor an object"
                )));
            }
        };

        Url::parse(raw).map_err(|e| {
            tracing::warn!(field, value = %raw, error = %e, "Identifier is not an absolute URI");
            AppError::InvalidIdentifier(format!("{field}: {raw}"))
        })
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(single)) => vec![single],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(uri) => Some(uri),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// An inbound activity
///
/// Transient: built per request and never stored as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actor: Reference,
    #[serde(default)]
    pub object: Reference,
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub cc: Vec<String>,
    #[serde(default)]
    pub published: Option<String>,
}

impl Activity {
    /// Parse an activity from its JSON document
    pub fn from_value(value: Value) -> Result<Self, AppError> {
        serde_json::from_value(value)
            .map_err(|e| AppError::MalformedActivity(format!("not an activity: {e}")))
    }

    /// Canonical URI of the `actor` field
    pub fn actor_id(&self) -> Result<Url, AppError> {
        self.actor.resolve("actor")
    }

    /// Canonical URI of the `object` field
    pub fn object_id(&self) -> Result<Url, AppError> {
        self.object.resolve("object")
    }

    /// Embedded object, or `MalformedActivity` for types that require one
    pub fn embedded_object(&self) -> Result<&Map<String, Value>, AppError> {
        self.object.as_embedded().ok_or_else(|| {
            AppError::MalformedActivity(format!("{} requires an embedded object", self.kind))
        })
    }

    /// Delivery target: the first `to` entry, or the public collection
    pub fn target(&self) -> &str {
        self.to
            .first()
            .map(String::as_str)
            .unwrap_or(PUBLIC_COLLECTION)
    }

    /// `published` as a timestamp, if present and well-formed
    pub fn published_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.published
            .as_deref()
            .and_then(|published| chrono::DateTime::parse_from_rfc3339(published).ok())
            .map(|published| published.with_timezone(&chrono::Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOTE: &str = "https://remote.example/notes/1";

    fn activity(object: Value) -> Activity {
        Activity::from_value(json!({
            "type": "Like",
            "actor": "https://remote.example/users/alice",
            "object": object,
        }))
        .unwrap()
    }

    #[test]
    fn resolves_same_uri_for_every_legal_encoding() {
        let compact = activity(json!(NOTE));
        let embedded = activity(json!({ "id": NOTE, "type": "Note" }));
        let mut resolved = activity(json!(null));
        resolved.object = Reference::Resolved(Url::parse(NOTE).unwrap());

        let expected = Url::parse(NOTE).unwrap();
        assert_eq!(compact.object_id().unwrap(), expected);
        assert_eq!(embedded.object_id().unwrap(), expected);
        assert_eq!(resolved.object_id().unwrap(), expected);
    }

    #[test]
    fn actor_field_accepts_embedded_form() {
        let activity = Activity::from_value(json!({
            "type": "Follow",
            "actor": { "id": "https://remote.example/users/alice", "type": "Person" },
            "object": "https://local.example/ap/users/bob",
        }))
        .unwrap();

        assert_eq!(
            activity.actor_id().unwrap().as_str(),
            "https://remote.example/users/alice"
        );
    }

    #[test]
    fn unknown_shapes_are_malformed() {
        for shape in [json!(42), json!(["a", "b"]), json!(null), json!({ "type": "Note" }), json!({ "id": "" })] {
            let result = activity(shape.clone()).object_id();
            assert!(
                matches!(result, Err(AppError::MalformedActivity(_))),
                "{shape} should be malformed, got {result:?}"
            );
        }
    }

    #[test]
    fn relative_identifiers_are_invalid() {
        let result = activity(json!("/notes/1")).object_id();
        assert!(matches!(result, Err(AppError::InvalidIdentifier(_))));

        let result = activity(json!({ "id": "not a uri" })).object_id();
        assert!(matches!(result, Err(AppError::InvalidIdentifier(_))));
    }

    #[test]
    fn missing_actor_is_malformed() {
        let activity = Activity::from_value(json!({ "type": "Like", "object": NOTE })).unwrap();
        assert!(matches!(
            activity.actor_id(),
            Err(AppError::MalformedActivity(_))
        ));
    }

    #[test]
    fn addressing_accepts_single_string_or_list() {
        let single = Activity::from_value(json!({
            "type": "Create",
            "to": PUBLIC_COLLECTION,
            "cc": ["https://remote.example/users/alice/followers", 7],
        }))
        .unwrap();
        assert_eq!(single.to, vec![PUBLIC_COLLECTION.to_string()]);
        assert_eq!(single.cc.len(), 1);

        let none = Activity::from_value(json!({ "type": "Create" })).unwrap();
        assert!(none.to.is_empty());
        assert_eq!(none.target(), PUBLIC_COLLECTION);
    }

    #[test]
    fn activity_without_type_is_malformed() {
        let result = Activity::from_value(json!({ "actor": "https://remote.example/users/a" }));
        assert!(matches!(result, Err(AppError::MalformedActivity(_))));
    }

    #[test]
    fn published_parses_rfc3339() {
        let activity = Activity::from_value(json!({
            "type": "Create",
            "published": "2024-03-01T12:00:00Z",
        }))
        .unwrap();
        assert_eq!(
            activity.published_at().unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
    }
}
