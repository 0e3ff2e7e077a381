use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Too many requests, please try again later")]
    RateLimited {
        remaining: usize,
        retry_after_secs: u64,
    },

    #[error("Account locked, try again in {minutes} minutes")]
    Locked { minutes: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } | Self::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to hand back to a client. Storage and internal failures
    /// are logged and replaced with a generic message.
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => {
                tracing::error!("{}", self);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// JSON body fields for this error, before any envelope is applied.
    pub fn body(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert("success".into(), false.into());
        body.insert("message".into(), self.public_message().into());
        match self {
            Self::RateLimited { remaining, retry_after_secs } => {
                body.insert("remaining".into(), (*remaining).into());
                body.insert("retryAfter".into(), (*retry_after_secs).into());
            }
            Self::Locked { minutes } => {
                body.insert("lockRemainingMinutes".into(), (*minutes).into());
            }
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            Self::Locked { minutes } => Some((*minutes).max(1) as u64 * 60),
            _ => None,
        };

        let mut response = (status, Json(serde_json::Value::Object(self.body()))).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
