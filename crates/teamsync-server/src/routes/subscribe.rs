use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::Deserialize;
use teamsync_core::StorePath;
use tokio_stream::StreamExt as _;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub path: String,
}

/// GET /api/subscribe?path=teams/ID: SSE stream of `snapshot` events.
///
/// The first event carries the current value; each later one the full value
/// after a commit that changed it. The subscription is released when the
/// client disconnects and the stream is dropped.
pub async fn subscribe(
    State(app): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let path = StorePath::parse(&query.path)?;
    let subscription = app.store().subscribe(&path)?;
    tracing::debug!(path = %path, subscription = %subscription.id(), "sse client subscribed");

    let stream = subscription.map(|snapshot| {
        Event::default().event("snapshot").json_data(serde_json::json!({
            "revision": snapshot.revision,
            "path": snapshot.path.to_string(),
            "value": snapshot.value,
        }))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
