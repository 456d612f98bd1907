use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection},
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mien_serving::{ErrorKind, ServingError};
use serde::Serialize;

/// Error returned by the request layer.
///
/// Rendered as `{"error": <message>}` by the JSON routes; the web routes turn
/// it into an HTML page instead.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    kind: Option<ErrorKind>,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ApiError {
    fn new(status: StatusCode, kind: Option<ErrorKind>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::warn!("Bad request: {}", msg);
        Self::new(StatusCode::BAD_REQUEST, None, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("Internal error: {}", msg);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, None, msg)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Label for the `outcome` metric dimension
    pub fn outcome(&self) -> &'static str {
        self.kind.map(|k| k.as_str()).unwrap_or("bad_request")
    }
}

/// HTTP status for each per-request error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Shape | ErrorKind::MalformedInput | ErrorKind::Decode => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Inference => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Mapping
        | ErrorKind::Provisioning
        | ErrorKind::Load
        | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServingError> for ApiError {
    fn from(err: ServingError) -> Self {
        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(kind = kind.as_str(), "Prediction failed: {}", err);
        } else {
            tracing::warn!(kind = kind.as_str(), "Prediction rejected: {}", err);
        }
        Self::new(status, Some(kind), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), None, err.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("inference task failed: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: &self.message,
            }),
        )
            .into_response()
    }
}
