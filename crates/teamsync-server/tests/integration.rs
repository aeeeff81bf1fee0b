use axum::http::StatusCode;
use http_body_util::BodyExt;
use teamsync_core::config::Config;
use teamsync_server::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// State with an in-memory store and three users.
fn seeded_state() -> AppState {
    let state = AppState::in_memory(Config::in_memory());
    state
        .store()
        .import(serde_json::json!({
            "users": {
                "u1": {"name": "Ann", "role": "user"},
                "u2": {"name": "Bob", "role": "user"},
                "a1": {"name": "Root", "role": "admin"}
            }
        }))
        .unwrap();
    state
}

/// Send a request via `oneshot` and return (status, parsed JSON body).
async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    identity: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut req = axum::http::Request::builder().method(method).uri(uri);
    if let Some(id) = identity {
        req = req.header("x-identity-id", id);
    }
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => req.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None, None).await
}

async fn create_alpha(state: &AppState) -> String {
    let app = teamsync_server::build_router(state.clone());
    let (status, json) = send(
        app,
        "POST",
        "/api/teams",
        None,
        Some(serde_json::json!({
            "name": "Alpha",
            "category": "Sales",
            "questions": ["Q1", "Q2"],
            "memberIds": ["u1", "u2"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    json["id"].as_str().unwrap().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_then_get_team() {
    let state = seeded_state();
    let id = create_alpha(&state).await;

    let (status, json) = get(teamsync_server::build_router(state), &format!("/api/teams/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Alpha");
    assert_eq!(json["category"], "Sales");
    assert_eq!(json["members"]["u1"]["name"], "Ann");
    assert!(json["createdAt"].is_i64());
}

#[tokio::test]
async fn create_rejects_missing_fields() {
    let state = seeded_state();
    let app = teamsync_server::build_router(state.clone());
    let (status, json) = send(
        app,
        "POST",
        "/api/teams",
        None,
        Some(serde_json::json!({"name": "Alpha", "category": "Sales"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("question"));
    assert_eq!(state.store().revision().unwrap(), 1);
}

#[tokio::test]
async fn missing_team_is_404() {
    let app = teamsync_server::build_router(seeded_state());
    let (status, json) = get(app, "/api/teams/0000000000001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn alpha_sales_scenario_over_http() {
    let state = seeded_state();
    let id = create_alpha(&state).await;

    let (status, json) = send(
        teamsync_server::build_router(state.clone()),
        "DELETE",
        &format!("/api/teams/{id}/members/u1"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["removed"], true);

    let (status, json) = send(
        teamsync_server::build_router(state.clone()),
        "PUT",
        &format!("/api/teams/{id}/members/u2/answers/0"),
        Some("u2"),
        Some(serde_json::json!({"text": "yes"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["text"], "yes");
    assert_eq!(json["questionIndex"], 0);

    let (_, team) = get(teamsync_server::build_router(state), &format!("/api/teams/{id}")).await;
    let members = team["members"].as_object().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(team["members"]["u2"]["answers"]["0"]["text"], "yes");
}

#[tokio::test]
async fn answering_for_someone_else_is_403() {
    let state = seeded_state();
    let id = create_alpha(&state).await;
    let uri = format!("/api/teams/{id}/members/u2/answers/0");

    let (status, _) = send(
        teamsync_server::build_router(state.clone()),
        "PUT",
        &uri,
        Some("u1"),
        Some(serde_json::json!({"text": "sneaky"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        teamsync_server::build_router(state),
        "PUT",
        &uri,
        None,
        Some(serde_json::json!({"text": "anon"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn adding_existing_member_is_409() {
    let state = seeded_state();
    let id = create_alpha(&state).await;
    let (status, _) = send(
        teamsync_server::build_router(state.clone()),
        "POST",
        &format!("/api/teams/{id}/members"),
        None,
        Some(serde_json::json!({"userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, json) = send(
        teamsync_server::build_router(state),
        "POST",
        &format!("/api/teams/{id}/members"),
        None,
        Some(serde_json::json!({"userId": "a1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["name"], "Root");
}

#[tokio::test]
async fn adding_members_leaves_existing_members_untouched() {
    let state = seeded_state();
    let id = create_alpha(&state).await;
    let (status, _) = send(
        teamsync_server::build_router(state.clone()),
        "PUT",
        &format!("/api/teams/{id}/members/u1/answers/0"),
        Some("u1"),
        Some(serde_json::json!({"text": "first"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let read = |member: &str| {
        let path = teamsync_core::StorePath::parse(&format!("teams/{id}/members/{member}")).unwrap();
        serde_json::to_vec(&state.store().read(&path).unwrap().unwrap()).unwrap()
    };
    let before = (read("u1"), read("u2"));

    for user in ["a1", "ghost"] {
        let (status, _) = send(
            teamsync_server::build_router(state.clone()),
            "POST",
            &format!("/api/teams/{id}/members"),
            None,
            Some(serde_json::json!({"userId": user})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    assert_eq!((read("u1"), read("u2")), before);
}

#[tokio::test]
async fn delete_team_cascades() {
    let state = seeded_state();
    let id = create_alpha(&state).await;
    let (status, json) = send(
        teamsync_server::build_router(state.clone()),
        "DELETE",
        &format!("/api/teams/{id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deleted"], true);
    assert_eq!(state.store().export().unwrap().get("teams"), None);

    let (_, json) = send(
        teamsync_server::build_router(state),
        "DELETE",
        &format!("/api/teams/{id}"),
        None,
        None,
    )
    .await;
    assert_eq!(json["deleted"], false);
}

#[tokio::test]
async fn list_filters_by_member() {
    let state = seeded_state();
    create_alpha(&state).await;
    let (_, all) = get(teamsync_server::build_router(state.clone()), "/api/teams").await;
    assert_eq!(all.as_array().unwrap().len(), 1);
    let (_, none) = get(teamsync_server::build_router(state), "/api/teams?member=a1").await;
    assert!(none.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn users_filter_by_role() {
    let app = teamsync_server::build_router(seeded_state());
    let (status, json) = get(app, "/api/users?role=user").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Ann", "Bob"]);
}

#[tokio::test]
async fn subscribe_rejects_bad_path() {
    let app = teamsync_server::build_router(seeded_state());
    let (status, _) = get(app, "/api/subscribe?path=elsewhere/x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subscribe_streams_initial_snapshot() {
    let state = seeded_state();
    let app = teamsync_server::build_router(state.clone());
    let req = axum::http::Request::builder()
        .uri("/api/subscribe?path=users/u1")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.store().subscriber_count().unwrap(), 1);

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: snapshot"), "{text}");
    assert!(text.contains("\"Ann\""), "{text}");

    drop(body);
    assert_eq!(state.store().subscriber_count().unwrap(), 0);
}

#[tokio::test]
async fn file_backed_state_persists_mutations() {
    let dir = TempDir::new().unwrap();
    let state = AppState::open(dir.path()).unwrap();
    let id = create_alpha(&state).await;
    drop(state);

    let reopened = AppState::open(dir.path()).unwrap();
    let (status, json) = get(teamsync_server::build_router(reopened), &format!("/api/teams/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Alpha");
}

#[tokio::test]
async fn running_state_keeps_other_writers_out() {
    let dir = TempDir::new().unwrap();
    let state = AppState::open(dir.path()).unwrap();
    let err = AppState::open(dir.path()).err().unwrap();
    assert_eq!(err.kind(), teamsync_core::ErrorKind::WriteRejected);

    let id = create_alpha(&state).await;
    drop(state);
    let reopened = AppState::open(dir.path()).unwrap();
    let (status, _) = get(teamsync_server::build_router(reopened), &format!("/api/teams/{id}")).await;
    assert_eq!(status, StatusCode::OK);
}
