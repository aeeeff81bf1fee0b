use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use teamsync_core::{Role, User};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub role: Option<String>,
}

/// GET /api/users: the user directory, optionally filtered by role.
pub async fn list_users(
    State(app): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    let directory = app.service.users();
    let users = tokio::task::spawn_blocking(move || {
        let role = query.role.map(Role::from);
        directory.list(role.as_ref())
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(users))
}
