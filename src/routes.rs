use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::auth::{Auth, Role};
use crate::error::ApiError;
use crate::events::EventSink;
use crate::issues::{
    GeofenceConfig, ModerationConfig, ModerationService, ProfileService, QueryService,
    SubmissionService, WorkflowService,
};
use crate::models::*;
use crate::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use crate::repo::Store;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/profile")
                    .route(web::get().to(get_profile))
                    .route(web::put().to(upsert_profile)),
            )
            .service(
                web::resource("/issues")
                    .route(web::get().to(list_issues))
                    .route(web::post().to(create_issue)),
            )
            .service(web::resource("/issues/{id}").route(web::get().to(get_issue)))
            .service(web::resource("/issues/{id}/status").route(web::post().to(transition_status)))
            .service(web::resource("/issues/{id}/flags").route(web::post().to(flag_issue)))
            .service(
                web::resource("/admin/issues/{id}/clear-flags")
                    .route(web::post().to(admin_clear_flags)),
            )
            .service(web::resource("/admin/issues/{id}/spam").route(web::post().to(admin_reject_spam)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub profiles: ProfileService,
    pub submissions: SubmissionService,
    pub workflow: WorkflowService,
    pub moderation: ModerationService,
    pub queries: QueryService,
    pub rate_limiter: RateLimiterFacade,
}

impl AppState {
    /// Wire every service onto one store/event sink pair, configs from env.
    pub fn build(repo: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        AppState {
            profiles: ProfileService::new(repo.clone()),
            submissions: SubmissionService::new(
                repo.clone(),
                events.clone(),
                GeofenceConfig::from_env(),
            ),
            workflow: WorkflowService::new(repo.clone(), events.clone()),
            moderation: ModerationService::new(repo.clone(), events, ModerationConfig::from_env()),
            queries: QueryService::new(repo),
            rate_limiter: RateLimiterFacade::new(
                InMemoryRateLimiter::new(true),
                RateLimitConfig::from_env(),
            ),
        }
    }
}

macro_rules! ensure_admin {
    ($auth:expr) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, Role::Admin)) {
            return Err(ApiError::Forbidden);
        }
    };
}

macro_rules! ensure_staff {
    ($auth:expr) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, Role::Moderator | Role::Admin)) {
            return Err(ApiError::Forbidden);
        }
    };
}

#[utoipa::path(
    put,
    path = "/api/v1/profile",
    request_body = UpsertProfile,
    responses(
        (status = 200, description = "Profile stored", body = ReporterProfile),
        (status = 422, description = "Invalid location or radius"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn upsert_profile(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<UpsertProfile>,
) -> Result<HttpResponse, ApiError> {
    let profile = data.profiles.upsert(&auth.actor(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    get,
    path = "/api/v1/profile",
    responses(
        (status = 200, description = "Caller's reporter profile", body = ReporterProfile),
        (status = 404, description = "No profile registered yet")
    )
)]
pub async fn get_profile(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let profile = data.profiles.get(&auth.actor()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    post,
    path = "/api/v1/issues",
    request_body = NewIssue,
    responses(
        (status = 201, description = "Issue created", body = IssueRecord),
        (status = 422, description = "Validation, precondition or geofence failure"),
        (status = 429, description = "Rate limited"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn create_issue(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewIssue>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor();
    if !data.rate_limiter.allow_issue(&actor.id) {
        return Err(ApiError::RateLimited);
    }
    // no profile means no registered location; other failures pass through
    let reporter = data.profiles.get(&actor).await.map_err(|err| match err {
        crate::error::DomainError::NotFound => {
            crate::error::DomainError::Precondition("LocationNotSet")
        }
        other => other,
    })?;
    let record = data.submissions.create_issue(&reporter, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(record))
}

#[utoipa::path(
    get,
    path = "/api/v1/issues",
    params(IssueFilters),
    responses(
        (status = 200, description = "Paginated issues, newest first", body = IssuePage)
    )
)]
pub async fn list_issues(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    filters: web::Query<IssueFilters>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.as_ref().map(Auth::actor);
    let page = data.queries.list(&filters, actor.as_ref()).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/issues/{id}",
    params(("id" = Id, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Issue", body = IssueRecord),
        (status = 404, description = "Not found (or hidden from this caller)")
    )
)]
pub async fn get_issue(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.as_ref().map(Auth::actor);
    let record = data.queries.get(path.into_inner(), actor.as_ref()).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    post,
    path = "/api/v1/issues/{id}/status",
    request_body = TransitionRequest,
    params(("id" = Id, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Transition applied", body = IssueRecord),
        (status = 409, description = "Edge not permitted"),
        (status = 403, description = "Forbidden - staff only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn transition_status(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<TransitionRequest>,
) -> Result<HttpResponse, ApiError> {
    ensure_staff!(auth);
    let body = payload.into_inner();
    let record = data
        .workflow
        .transition(path.into_inner(), body.status, &auth.actor(), body.comment)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    post,
    path = "/api/v1/issues/{id}/flags",
    request_body = FlagRequest,
    params(("id" = Id, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Flag recorded", body = IssueRecord),
        (status = 409, description = "Already flagged by this actor"),
        (status = 429, description = "Rate limited"),
        (status = 404, description = "Not found")
    )
)]
pub async fn flag_issue(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<FlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor();
    if !data.rate_limiter.allow_flag(&actor.id) {
        return Err(ApiError::RateLimited);
    }
    let outcome = data
        .moderation
        .add_flag(path.into_inner(), &actor.id, &payload.reason)
        .await?;
    Ok(HttpResponse::Ok().json(outcome.issue))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/issues/{id}/clear-flags",
    params(("id" = Id, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Flags cleared, record unhidden", body = IssueRecord),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn admin_clear_flags(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let record = data.moderation.clear_flags(path.into_inner(), &auth.actor()).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct SpamRequest {
    pub comment: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/issues/{id}/spam",
    request_body = SpamRequest,
    params(("id" = Id, Path, description = "Issue id")),
    responses(
        (status = 200, description = "Rejected as spam (stays hidden)", body = IssueRecord),
        (status = 409, description = "Edge not permitted from current status"),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Not found")
    )
)]
pub async fn admin_reject_spam(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SpamRequest>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let record = data
        .moderation
        .reject_as_spam(&data.workflow, path.into_inner(), &auth.actor(), payload.into_inner().comment)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub id: String,
    pub role: Role,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Verified caller identity", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let actor = auth.actor();
    Ok(HttpResponse::Ok().json(MeResponse { id: actor.id, role: actor.role }))
}
