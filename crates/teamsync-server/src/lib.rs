//! HTTP and SSE front end for the teamsync core.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(state: AppState) -> Router {
    let cors_any = state.service.config().server.cors_any;

    let router = Router::new()
        // Teams
        .route(
            "/api/teams",
            get(routes::teams::list_teams).post(routes::teams::create_team),
        )
        .route(
            "/api/teams/{id}",
            get(routes::teams::get_team).delete(routes::teams::delete_team),
        )
        // Members
        .route(
            "/api/teams/{id}/members",
            post(routes::teams::add_member),
        )
        .route(
            "/api/teams/{id}/members/{member_id}",
            delete(routes::teams::remove_member),
        )
        .route(
            "/api/teams/{id}/members/{member_id}/answers/{index}",
            put(routes::teams::record_answer),
        )
        // Users
        .route("/api/users", get(routes::users::list_users))
        // Subscriptions (SSE)
        .route("/api/subscribe", get(routes::subscribe::subscribe))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_any {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Start the API server on `port`.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(state, listener).await
}

/// Start the API server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let store = state.store().clone();
    let app = build_router(state);

    tracing::info!("teamsync API listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, app).await;
    store.close()?;
    result?;
    Ok(())
}
