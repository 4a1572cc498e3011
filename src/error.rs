use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a [`crate::store::Store`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Too many concurrent writers on {0}")]
    Contention(String),
}

/// Domain failures surfaced by the ledgers and the matching engine.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid seat credential")]
    Unauthorized,

    #[error("Seat {0} not found")]
    SeatNotFound(String),

    #[error("Bid {0} does not belong to the requester")]
    NotOwner(Uuid),

    #[error("Not a participant of job {0}")]
    NotParticipant(Uuid),

    #[error("Bid {id} is {status}, expected open")]
    InvalidState { id: Uuid, status: String },

    #[error("Job {0} was already rated by this party")]
    AlreadyRated(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Seat is cooling down, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Matching is temporarily unavailable")]
    MatchingUnavailable,

    #[error("Storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::NotOwner(_)
            | Self::NotParticipant(_)
            | Self::InvalidState { .. }
            | Self::AlreadyRated(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SeatNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MatchingUnavailable | Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Build the JSON error response handlers return for this failure.
    pub fn to_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            Self::RateLimited { retry_after } => {
                // Round up so clients never retry a moment too early.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                builder
                    .insert_header(("Retry-After", secs.to_string()))
                    .json(serde_json::json!({
                        "error": self.to_string(),
                        "retry_after_secs": secs,
                    }))
            }
            Self::Storage(e) => {
                tracing::warn!("Storage error: {e}");
                builder.json(serde_json::json!({
                    "error": "Storage temporarily unavailable",
                }))
            }
            _ => builder.json(serde_json::json!({
                "error": self.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_maps_to_429_with_retry_after() {
        let err = ExchangeError::RateLimited {
            retry_after: Duration::from_millis(1500),
        };
        let resp = err.to_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("Retry-After").unwrap(), "2");
    }

    #[test]
    fn matching_unavailable_is_distinct_from_validation() {
        assert_eq!(
            ExchangeError::MatchingUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ExchangeError::Validation("price".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn seat_errors_are_distinguished() {
        assert_eq!(ExchangeError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        let err = ExchangeError::SeatNotFound("RSX0000000".into());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.to_string().contains("RSX0000000"));
    }
}
