//! ActivityPub inbox endpoints
//!
//! Signature verification happens in front of these routes; a request that
//! reaches them is treated as authentic.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{ActorDirectory, Disposition, local_actor_url};
use crate::metrics::FEDERATION_REQUESTS_TOTAL;

/// Create inbox router
///
/// Routes:
/// - POST /ap/users/:handle/inbox - Personal inbox
/// - POST /inbox - Shared inbox
pub fn inbox_router() -> Router<AppState> {
    Router::new()
        .route("/ap/users/:handle/inbox", post(personal_inbox))
        .route("/inbox", post(shared_inbox))
}

/// POST /ap/users/:handle/inbox
async fn personal_inbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let actor_id = local_actor_url(&state.config.server.domain, &handle)
        .map_err(|_| AppError::UnknownEntity(format!("inbox of {handle}")))?;

    match ActorDirectory::get_by_id(state.store.as_ref(), &actor_id).await? {
        Some(actor) if actor.is_local => {}
        _ => return Err(AppError::UnknownEntity(format!("inbox of {handle}"))),
    }

    receive(&state, &body).await
}

/// POST /inbox
///
/// Shared inbox; recipients come from the activity's addressing.
async fn shared_inbox(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, &body).await
}

async fn receive(state: &AppState, body: &[u8]) -> Result<StatusCode, AppError> {
    let activity: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedActivity(format!("invalid JSON: {e}")))?;

    let result = state.processor.process(activity).await;

    let status = match &result {
        Ok(Disposition::Applied) => "success",
        Ok(Disposition::Dropped(_)) => "dropped",
        Err(_) => "failure",
    };
    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&["inbound", status])
        .inc();

    // Dropped activities are acknowledged so the peer does not retry them.
    result.map(|_| StatusCode::ACCEPTED)
}
