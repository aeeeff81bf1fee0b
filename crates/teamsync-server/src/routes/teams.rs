use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use teamsync_core::{Answer, Member, NewTeam, Team};

use crate::auth::Caller;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TeamQuery {
    /// Only teams listing this member id.
    pub member: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberBody {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub text: String,
}

/// GET /api/teams: every team, oldest first.
pub async fn list_teams(
    State(app): State<AppState>,
    Query(query): Query<TeamQuery>,
) -> Result<Json<Vec<Team>>, AppError> {
    let service = app.service.clone();
    let teams = tokio::task::spawn_blocking(move || match query.member {
        Some(member) => service.teams_for_member(&member),
        None => service.list_teams(),
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(teams))
}

/// POST /api/teams: create a team under a fresh id.
pub async fn create_team(
    State(app): State<AppState>,
    Json(body): Json<NewTeam>,
) -> Result<(StatusCode, Json<Team>), AppError> {
    let service = app.service.clone();
    let team = tokio::task::spawn_blocking(move || service.create_team(body))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok((StatusCode::CREATED, Json(team)))
}

/// GET /api/teams/{id}
pub async fn get_team(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Team>, AppError> {
    let service = app.service.clone();
    let lookup = id.clone();
    let team = tokio::task::spawn_blocking(move || service.team(&lookup))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    team.map(Json).ok_or_else(|| AppError::team_not_found(id))
}

/// DELETE /api/teams/{id}: remove the team with all members and answers.
pub async fn delete_team(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let deleted = tokio::task::spawn_blocking(move || service.delete_team(&id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// POST /api/teams/{id}/members
pub async fn add_member(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AddMemberBody>,
) -> Result<(StatusCode, Json<Member>), AppError> {
    let service = app.service.clone();
    let member = tokio::task::spawn_blocking(move || service.add_member(&id, body.user_id.trim()))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok((StatusCode::CREATED, Json(member)))
}

/// DELETE /api/teams/{id}/members/{member_id}
pub async fn remove_member(
    State(app): State<AppState>,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let service = app.service.clone();
    let removed = tokio::task::spawn_blocking(move || service.remove_member(&id, &member_id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// PUT /api/teams/{id}/members/{member_id}/answers/{index}: the caller's own
/// answer to one question.
pub async fn record_answer(
    State(app): State<AppState>,
    Caller(caller): Caller,
    Path((id, member_id, index)): Path<(String, String, usize)>,
    Json(body): Json<AnswerBody>,
) -> Result<Json<Answer>, AppError> {
    let service = app.service.clone();
    let answer = tokio::task::spawn_blocking(move || {
        service.record_answer(caller.as_ref(), &id, &member_id, index, &body.text)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(answer))
}
