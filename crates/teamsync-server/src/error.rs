use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use teamsync_core::TeamSyncError;

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 404 Not Found error for a team id.
    pub fn team_not_found(id: impl Into<String>) -> Self {
        Self(TeamSyncError::TeamNotFound(id.into()).into())
    }
}

fn status_for(e: &TeamSyncError) -> StatusCode {
    match e {
        TeamSyncError::ValidationFailed(_)
        | TeamSyncError::InvalidPath { .. }
        | TeamSyncError::Json(_) => StatusCode::BAD_REQUEST,
        TeamSyncError::Forbidden(_) => StatusCode::FORBIDDEN,
        TeamSyncError::TeamNotFound(_) | TeamSyncError::MemberNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        TeamSyncError::MemberExists { .. } => StatusCode::CONFLICT,
        TeamSyncError::StoreClosed | TeamSyncError::NoRuntime => StatusCode::SERVICE_UNAVAILABLE,
        TeamSyncError::WriteRejected(_)
        | TeamSyncError::Malformed { .. }
        | TeamSyncError::StaleSubscription(_)
        | TeamSyncError::Io(_)
        | TeamSyncError::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<TeamSyncError>() {
            Some(e) => status_for(e),
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: TeamSyncError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            status(TeamSyncError::ValidationFailed("name".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(TeamSyncError::InvalidPath {
                path: "x".into(),
                reason: "bad".into()
            }),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(
            status(TeamSyncError::Forbidden("not you".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn missing_entities_map_to_404() {
        assert_eq!(status(TeamSyncError::TeamNotFound("t".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(TeamSyncError::MemberNotFound {
                team: "t".into(),
                member: "u".into()
            }),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn member_exists_maps_to_409() {
        assert_eq!(
            status(TeamSyncError::MemberExists {
                team: "t".into(),
                member: "u".into()
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn closed_store_maps_to_503() {
        assert_eq!(status(TeamSyncError::StoreClosed), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn write_rejected_maps_to_500() {
        assert_eq!(
            status(TeamSyncError::WriteRejected("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn non_teamsync_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError::team_not_found("t1").into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
