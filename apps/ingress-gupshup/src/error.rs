use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gup_pipeline::DispatchError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "E_BAD_REQUEST",
            ApiError::Dispatch(err) => err.code(),
            ApiError::Internal(_) => "E_INTERNAL",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            code: self.code(),
            error: self.message(),
        });
        (self.status(), body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gup_pipeline::MediaError;

    #[test]
    fn media_failures_answer_500_with_code() {
        let err = ApiError::from(DispatchError::from(MediaError::Timeout {
            url: "https://media.local/x".into(),
        }));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "E_MEDIA_TIMEOUT");
    }

    #[test]
    fn bad_request_keeps_message() {
        let err = ApiError::BadRequest("body is not json".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "invalid request: body is not json");
    }
}
