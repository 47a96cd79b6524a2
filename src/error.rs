use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Failures inside the message store. The engine collapses all of these
/// into [`ParrotError::StoreUnavailable`]; the variants exist so the
/// store's own tests and logs can tell transport problems apart.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("blocking task error: {0}")]
    Task(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ParrotError {
    /// Generation requested before any training or loading happened.
    /// Recoverable; the caller should answer "not enough data".
    #[error("no trained model for this conversation")]
    NoModel,

    #[error("message store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Bulk load partial failure. Successfully loaded conversations keep
    /// their trained state.
    #[error("{count} conversation(s) failed to load, first error: {first}")]
    AggregateLoad { count: usize, first: Box<ParrotError> },

    #[error("operation canceled")]
    Canceled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ParrotError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoModel => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) | Self::Canceled => StatusCode::SERVICE_UNAVAILABLE,
            Self::AggregateLoad { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ParrotError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
