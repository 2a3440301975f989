//! SQLite database operations
//!
//! All database access goes through this module.
//! Uniqueness constraints in the schema are what make repeated deliveries of
//! the same activity converge on a single row; every insert here is written
//! as "insert if absent" and reports whether a row was actually created.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use url::Url;

use super::models::*;
use crate::error::AppError;

fn parse_url_column(value: &str, column: &str) -> Result<Url, AppError> {
    Url::parse(value).map_err(|e| {
        AppError::Internal(anyhow::anyhow!(
            "stored {column} is not a valid URL ({value}): {e}"
        ))
    })
}

fn parse_json_column(raw: &str, column: &str) -> Result<serde_json::Value, AppError> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("stored {column} is not JSON: {e}")))
}

fn actor_from_row(row: &SqliteRow) -> Result<Actor, AppError> {
    let id: String = row.try_get("id")?;
    let inbox: Option<String> = row.try_get("inbox")?;
    let followers: Option<String> = row.try_get("followers")?;
    let properties: String = row.try_get("properties")?;

    Ok(Actor {
        id: parse_url_column(&id, "actors.id")?,
        kind: row.try_get("kind")?,
        preferred_username: row.try_get("preferred_username")?,
        inbox: inbox.as_deref().and_then(|inbox| Url::parse(inbox).ok()),
        followers: followers
            .as_deref()
            .and_then(|followers| Url::parse(followers).ok()),
        is_local: row.try_get("is_local")?,
        properties: parse_json_column(&properties, "actors.properties")?,
    })
}

fn object_from_row(row: &SqliteRow) -> Result<ApObject, AppError> {
    let id: String = row.try_get("id")?;
    let original_object_id: String = row.try_get("original_object_id")?;
    let original_actor_id: String = row.try_get("original_actor_id")?;
    let properties: String = row.try_get("properties")?;

    Ok(ApObject {
        id: parse_url_column(&id, "objects.id")?,
        original_object_id: parse_url_column(&original_object_id, "objects.original_object_id")?,
        original_actor_id: parse_url_column(&original_actor_id, "objects.original_actor_id")?,
        kind: row.try_get("kind")?,
        local: row.try_get("local")?,
        properties: parse_json_column(&properties, "objects.properties")?,
        published: row.try_get("published")?,
        created_at: row.try_get("created_at")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, AppError> {
    let kind: String = row.try_get("kind")?;
    let recipient: String = row.try_get("actor_id")?;
    let source: String = row.try_get("from_actor_id")?;
    let object: Option<String> = row.try_get("object_id")?;

    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        kind: NotificationKind::from_str(&kind).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("unknown notification kind {kind}"))
        })?,
        recipient: parse_url_column(&recipient, "actor_notifications.actor_id")?,
        source: parse_url_column(&source, "actor_notifications.from_actor_id")?,
        object: object
            .as_deref()
            .map(|object| parse_url_column(object, "actor_notifications.object_id"))
            .transpose()?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to the SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Actors
    // =========================================================================

    /// Get actor by URI
    pub async fn get_actor(&self, id: &str) -> Result<Option<Actor>, AppError> {
        let row = sqlx::query("SELECT * FROM actors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(actor_from_row).transpose()
    }

    /// Insert or refresh an actor
    pub async fn upsert_actor(&self, actor: &Actor) -> Result<(), AppError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO actors (
                id, kind, preferred_username, inbox, followers, is_local, properties,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                preferred_username = excluded.preferred_username,
                inbox = excluded.inbox,
                followers = excluded.followers,
                properties = excluded.properties,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(actor.id.as_str())
        .bind(&actor.kind)
        .bind(&actor.preferred_username)
        .bind(actor.inbox.as_ref().map(Url::as_str))
        .bind(actor.followers.as_ref().map(Url::as_str))
        .bind(actor.is_local)
        .bind(actor.properties.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store the encrypted signing key of a local actor
    pub async fn upsert_actor_key(
        &self,
        actor_id: &str,
        encrypted_private_key: &str,
        public_key_pem: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO actor_keys (actor_id, encrypted_private_key, public_key_pem)
            VALUES (?, ?, ?)
            ON CONFLICT(actor_id) DO UPDATE SET
                encrypted_private_key = excluded.encrypted_private_key,
                public_key_pem = excluded.public_key_pem
            "#,
        )
        .bind(actor_id)
        .bind(encrypted_private_key)
        .bind(public_key_pem)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the encrypted signing key of a local actor
    pub async fn get_encrypted_actor_key(&self, actor_id: &str) -> Result<Option<String>, AppError> {
        let key = sqlx::query_scalar::<_, String>(
            "SELECT encrypted_private_key FROM actor_keys WHERE actor_id = ?",
        )
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Get object by local id
    pub async fn get_object(&self, id: &str) -> Result<Option<ApObject>, AppError> {
        let row = sqlx::query("SELECT * FROM objects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(object_from_row).transpose()
    }

    /// Get object by its original (federation-wide) id
    pub async fn get_object_by_original_id(
        &self,
        original_object_id: &str,
    ) -> Result<Option<ApObject>, AppError> {
        let row = sqlx::query("SELECT * FROM objects WHERE original_object_id = ?")
            .bind(original_object_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(object_from_row).transpose()
    }

    /// Insert object unless its original id is already stored
    ///
    /// # Returns
    /// true if a row was inserted
    pub async fn insert_object_if_absent(&self, object: &ApObject) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, original_object_id, original_actor_id, kind, local, properties,
                published, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(original_object_id) DO NOTHING
            "#,
        )
        .bind(object.id.as_str())
        .bind(object.original_object_id.as_str())
        .bind(object.original_actor_id.as_str())
        .bind(&object.kind)
        .bind(object.local)
        .bind(object.properties.to_string())
        .bind(object.published)
        .bind(object.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the stored document of an object
    pub async fn update_object_properties(
        &self,
        id: &str,
        properties: &serde_json::Value,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE objects SET properties = ? WHERE id = ?")
            .bind(properties.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replace the stored document of an actor
    pub async fn update_actor_properties(
        &self,
        actor: &Actor,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE actors SET
                kind = ?, preferred_username = ?, inbox = ?, followers = ?,
                properties = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&actor.kind)
        .bind(&actor.preferred_username)
        .bind(actor.inbox.as_ref().map(Url::as_str))
        .bind(actor.followers.as_ref().map(Url::as_str))
        .bind(actor.properties.to_string())
        .bind(Utc::now())
        .bind(actor.id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an object and everything that references it
    ///
    /// # Returns
    /// false when the object was already gone
    pub async fn delete_object(&self, id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        for statement in [
            "DELETE FROM outbox_objects WHERE object_id = ?",
            "DELETE FROM inbox_objects WHERE object_id = ?",
            "DELETE FROM actor_replies WHERE object_id = ?",
            "DELETE FROM actor_favourites WHERE object_id = ?",
            "DELETE FROM actor_reblogs WHERE object_id = ?",
            "DELETE FROM actor_notifications WHERE object_id = ?",
        ] {
            sqlx::query(statement).bind(id).execute(&mut *tx).await?;
        }

        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Inbox / Outbox
    // =========================================================================

    /// Append object to an actor's outbox
    pub async fn insert_outbox_object(
        &self,
        actor_id: &str,
        object_id: &str,
        published: DateTime<Utc>,
        target: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_objects (id, actor_id, object_id, target, published_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(actor_id, object_id) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(actor_id)
        .bind(object_id)
        .bind(target)
        .bind(published)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Append object to an actor's inbox
    pub async fn insert_inbox_object(
        &self,
        actor_id: &str,
        object_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_objects (id, actor_id, object_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(actor_id, object_id) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(actor_id)
        .bind(object_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Object ids in an actor's outbox, newest first
    pub async fn get_outbox_object_ids(&self, actor_id: &str) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT object_id FROM outbox_objects WHERE actor_id = ? ORDER BY published_date DESC",
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Object ids in an actor's inbox, newest first
    pub async fn get_inbox_object_ids(&self, actor_id: &str) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT object_id FROM inbox_objects WHERE actor_id = ? ORDER BY created_at DESC",
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // =========================================================================
    // Follows
    // =========================================================================

    /// Insert a pending follow edge
    ///
    /// # Returns
    /// false if the edge already existed
    pub async fn insert_following_if_absent(
        &self,
        follower_id: &str,
        followee_id: &str,
        target_acct: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO actor_following (id, actor_id, target_actor_id, target_actor_acct, state, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?)
            ON CONFLICT(actor_id, target_actor_id) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(follower_id)
        .bind(followee_id)
        .bind(target_acct)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a follow edge as accepted
    pub async fn accept_following(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE actor_following SET state = 'accepted' WHERE actor_id = ? AND target_actor_id = ?",
        )
        .bind(follower_id)
        .bind(followee_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a follow edge
    pub async fn get_following(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> Result<Option<FollowEdge>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT actor_id, target_actor_id, target_actor_acct, state
            FROM actor_following
            WHERE actor_id = ? AND target_actor_id = ?
            "#,
        )
        .bind(follower_id)
        .bind(followee_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let follower: String = row.try_get("actor_id")?;
        let followee: String = row.try_get("target_actor_id")?;
        let state: String = row.try_get("state")?;

        Ok(Some(FollowEdge {
            follower: parse_url_column(&follower, "actor_following.actor_id")?,
            followee: parse_url_column(&followee, "actor_following.target_actor_id")?,
            target_acct: row.try_get("target_actor_acct")?,
            accepted: state == "accepted",
        }))
    }

    /// Ids of actors following the owner of a followers collection
    pub async fn get_follower_ids_by_collection(
        &self,
        collection: &str,
    ) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT actor_id
            FROM actor_following
            WHERE target_actor_id = (SELECT id FROM actors WHERE followers = ?)
            ORDER BY created_at
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    // =========================================================================
    // Engagement (replies, favourites, reblogs)
    // =========================================================================

    /// Record that `object_id` replies to `in_reply_to_id`
    pub async fn insert_reply(
        &self,
        actor_id: &str,
        object_id: &str,
        in_reply_to_id: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO actor_replies (id, actor_id, object_id, in_reply_to_object_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(object_id) DO NOTHING
            "#,
        )
        .bind(EntityId::new().0)
        .bind(actor_id)
        .bind(object_id)
        .bind(in_reply_to_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Parent of a reply, if recorded
    pub async fn get_reply_parent(&self, object_id: &str) -> Result<Option<String>, AppError> {
        let parent = sqlx::query_scalar::<_, String>(
            "SELECT in_reply_to_object_id FROM actor_replies WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(parent)
    }

    /// Insert favourite edge
    pub async fn insert_favourite(&self, actor_id: &str, object_id: &str) -> Result<bool, AppError> {
        self.insert_engagement("actor_favourites", actor_id, object_id)
            .await
    }

    /// Check favourite edge
    pub async fn has_favourite(&self, actor_id: &str, object_id: &str) -> Result<bool, AppError> {
        self.has_engagement("actor_favourites", actor_id, object_id)
            .await
    }

    /// Count favourites of an object
    pub async fn count_favourites(&self, object_id: &str) -> Result<i64, AppError> {
        self.count_engagement("actor_favourites", object_id).await
    }

    /// Insert reblog edge
    pub async fn insert_reblog(&self, actor_id: &str, object_id: &str) -> Result<bool, AppError> {
        self.insert_engagement("actor_reblogs", actor_id, object_id)
            .await
    }

    /// Check reblog edge
    pub async fn has_reblog(&self, actor_id: &str, object_id: &str) -> Result<bool, AppError> {
        self.has_engagement("actor_reblogs", actor_id, object_id)
            .await
    }

    /// Count reblogs of an object
    pub async fn count_reblogs(&self, object_id: &str) -> Result<i64, AppError> {
        self.count_engagement("actor_reblogs", object_id).await
    }

    // `table` is always one of the engagement table names above.
    async fn insert_engagement(
        &self,
        table: &'static str,
        actor_id: &str,
        object_id: &str,
    ) -> Result<bool, AppError> {
        let statement = format!(
            "INSERT INTO {table} (id, actor_id, object_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(actor_id, object_id) DO NOTHING"
        );
        let result = sqlx::query(&statement)
            .bind(EntityId::new().0)
            .bind(actor_id)
            .bind(object_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_engagement(
        &self,
        table: &'static str,
        actor_id: &str,
        object_id: &str,
    ) -> Result<bool, AppError> {
        let statement =
            format!("SELECT COUNT(*) FROM {table} WHERE actor_id = ? AND object_id = ?");
        let count = sqlx::query_scalar::<_, i64>(&statement)
            .bind(actor_id)
            .bind(object_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    async fn count_engagement(&self, table: &'static str, object_id: &str) -> Result<i64, AppError> {
        let statement = format!("SELECT COUNT(*) FROM {table} WHERE object_id = ?");
        let count = sqlx::query_scalar::<_, i64>(&statement)
            .bind(object_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Insert notification
    pub async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO actor_notifications (
                id, kind, actor_id, from_actor_id, object_id, created_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&notification.id.0)
        .bind(notification.kind.as_str())
        .bind(notification.recipient.as_str())
        .bind(notification.source.as_str())
        .bind(notification.object.as_ref().map(Url::as_str))
        .bind(notification.created_at)
        .bind(notification.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that a notification has been handed to delivery
    pub async fn mark_notification_sent(
        &self,
        id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE actor_notifications SET sent_at = ? WHERE id = ? AND sent_at IS NULL",
        )
        .bind(sent_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Notifications of a local actor, newest first
    pub async fn get_notifications(&self, recipient: &str) -> Result<Vec<Notification>, AppError> {
        let rows = sqlx::query(
            "SELECT * FROM actor_notifications WHERE actor_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }
}
