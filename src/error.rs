use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::geo::GeoError;
use crate::models::{GeoPoint, IssueStatus};
use crate::repo::RepoError;

/// One user-correctable field violation. Submission validation aggregates
/// every violation instead of failing on the first.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Structured geofence rejection payload, serialized into the error body
/// so clients can render the actual distances involved.
#[derive(Debug, Clone, Serialize)]
pub struct GeofenceViolation {
    pub distance_km: f64,
    pub effective_radius_km: f64,
    pub reporter_location: GeoPoint,
    pub issue_location: GeoPoint,
}

#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
    #[error("issue location is {:.1} km away; allowed radius is {} km", .0.distance_km, .0.effective_radius_km)]
    Geofence(GeofenceViolation),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("transition {from} -> {to} is not permitted")]
    InvalidTransition {
        from: IssueStatus,
        to: IssueStatus,
    },
    #[error("already flagged by this actor")]
    DuplicateFlag,
    #[error("not found")]
    NotFound,
    #[error("concurrent update conflict")]
    ConcurrencyConflict,
    #[error("store unavailable: {0}")]
    Infrastructure(String),
}

impl DomainError {
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::Precondition(_) => "precondition",
            DomainError::Geofence(_) => "geofence_violation",
            DomainError::Geo(_) => "invalid_coordinate",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::DuplicateFlag => "duplicate_flag",
            DomainError::NotFound => "not_found",
            DomainError::ConcurrencyConflict => "concurrency_conflict",
            DomainError::Infrastructure(_) => "infrastructure",
        }
    }
}

impl From<RepoError> for DomainError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => DomainError::NotFound,
            RepoError::Conflict => DomainError::ConcurrencyConflict,
            RepoError::Domain(d) => d,
            RepoError::Internal(msg) => DomainError::Infrastructure(msg),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("forbidden")]
    Forbidden,
    #[error("bad request")]
    BadRequest,
    #[error("rate limited")]
    RateLimited,
    #[error("internal error")]
    Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        ApiError::Domain(e.into())
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let (status, code, details) = match self {
            ApiError::Domain(d) => {
                let status = match d {
                    DomainError::Validation(_)
                    | DomainError::Precondition(_)
                    | DomainError::Geofence(_)
                    | DomainError::Geo(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DomainError::InvalidTransition { .. }
                    | DomainError::DuplicateFlag
                    | DomainError::ConcurrencyConflict => StatusCode::CONFLICT,
                    DomainError::NotFound => StatusCode::NOT_FOUND,
                    DomainError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let details = match d {
                    DomainError::Validation(errs) => serde_json::to_value(errs).ok(),
                    DomainError::Geofence(v) => serde_json::to_value(v).ok(),
                    _ => None,
                };
                (status, d.code(), details)
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", None),
            ApiError::BadRequest => (StatusCode::BAD_REQUEST, "bad_request", None),
            ApiError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal", None),
        };
        HttpResponse::build(status).json(ApiErrorBody {
            error: self.to_string(),
            code,
            details,
        })
    }
}
