use crate::models::{
    FlagRequest, GeoPoint, IssueCategory, IssueLocation, IssuePriority, IssueRecord, IssueStatus,
    NewIssue, ReporterProfile, StatusEvent, TransitionRequest, UpsertProfile,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::upsert_profile,
        crate::routes::get_profile,
        crate::routes::create_issue,
        crate::routes::list_issues,
        crate::routes::get_issue,
        crate::routes::transition_status,
        crate::routes::flag_issue,
        crate::routes::admin_clear_flags,
        crate::routes::admin_reject_spam,
        crate::routes::auth_me,
    ),
    components(schemas(
        GeoPoint, IssueLocation, IssueStatus, IssueCategory, IssuePriority,
        StatusEvent, IssueRecord, ReporterProfile, NewIssue, UpsertProfile,
        TransitionRequest, FlagRequest,
        crate::models::IssuePage,
        crate::routes::SpamRequest, crate::routes::MeResponse,
        crate::auth::Role
    )),
    tags(
        (name = "issues", description = "Issue submission and lookup"),
        (name = "moderation", description = "Flagging and admin moderation"),
        (name = "profile", description = "Reporter profile registration"),
    )
)]
pub struct ApiDoc;
