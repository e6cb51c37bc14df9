//! Service layer: orchestrates geometry checks, the status workflow and
//! the repository's atomic-update contract. All mutations are atomic per
//! record; nothing here retries on conflict (callers decide that).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{DomainError, FieldError, GeofenceViolation};
use crate::events::{DomainEvent, EventSink};
use crate::geo;
use crate::models::*;
use crate::repo::Store;
use crate::workflow;

pub const DEFAULT_SYSTEM_MAX_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_AUTO_HIDE_THRESHOLD: usize = 3;
pub const MIN_PREFERRED_RADIUS_KM: f64 = 1.0;
pub const MAX_PREFERRED_RADIUS_KM: f64 = 50.0;

pub const TITLE_LEN: std::ops::RangeInclusive<usize> = 10..=500;
pub const DESCRIPTION_LEN: std::ops::RangeInclusive<usize> = 20..=2000;

fn f64_env(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn usize_env(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct GeofenceConfig {
    /// System-wide cap; the enforced radius is min(preferred, this).
    pub system_max_radius_km: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self { system_max_radius_km: DEFAULT_SYSTEM_MAX_RADIUS_KM }
    }
}

impl GeofenceConfig {
    pub fn from_env() -> Self {
        Self {
            system_max_radius_km: f64_env("CIVIX_MAX_RADIUS_KM", DEFAULT_SYSTEM_MAX_RADIUS_KM),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModerationConfig {
    /// Distinct-flagger count that triggers auto-hiding.
    pub auto_hide_threshold: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self { auto_hide_threshold: DEFAULT_AUTO_HIDE_THRESHOLD }
    }
}

impl ModerationConfig {
    pub fn from_env() -> Self {
        Self {
            auto_hide_threshold: usize_env("CIVIX_AUTO_HIDE_THRESHOLD", DEFAULT_AUTO_HIDE_THRESHOLD),
        }
    }
}

// ---------------------------------------------------------------- profiles

#[derive(Clone)]
pub struct ProfileService {
    repo: Arc<dyn Store>,
}

impl ProfileService {
    pub fn new(repo: Arc<dyn Store>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, actor: &Actor) -> Result<ReporterProfile, DomainError> {
        self.repo.get_profile(&actor.id).await?.ok_or(DomainError::NotFound)
    }

    pub async fn upsert(
        &self,
        actor: &Actor,
        payload: UpsertProfile,
    ) -> Result<ReporterProfile, DomainError> {
        let mut errors = Vec::new();
        if !(MIN_PREFERRED_RADIUS_KM..=MAX_PREFERRED_RADIUS_KM).contains(&payload.preferred_radius_km) {
            errors.push(FieldError {
                field: "preferred_radius_km",
                message: format!(
                    "must be between {MIN_PREFERRED_RADIUS_KM} and {MAX_PREFERRED_RADIUS_KM} km"
                ),
            });
        }
        let point = GeoPoint::new(payload.latitude, payload.longitude);
        if let Err(e) = geo::validate_point(&point) {
            errors.push(FieldError { field: "location", message: e.to_string() });
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }
        let profile = ReporterProfile {
            id: actor.id.clone(),
            registered_location: Some(point),
            preferred_radius_km: payload.preferred_radius_km,
            role: actor.role,
            updated_at: Utc::now(),
        };
        Ok(self.repo.upsert_profile(profile).await?)
    }
}

// -------------------------------------------------------------- submission

#[derive(Clone)]
pub struct SubmissionService {
    repo: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    cfg: GeofenceConfig,
}

impl SubmissionService {
    pub fn new(repo: Arc<dyn Store>, events: Arc<dyn EventSink>, cfg: GeofenceConfig) -> Self {
        Self { repo, events, cfg }
    }

    pub fn effective_radius_km(&self, reporter: &ReporterProfile) -> f64 {
        reporter.preferred_radius_km.min(self.cfg.system_max_radius_km)
    }

    /// Validate and persist a new report. Field violations are aggregated
    /// into a single `Validation` error; the geofence is checked against
    /// the reporter's registered location and the effective radius.
    pub async fn create_issue(
        &self,
        reporter: &ReporterProfile,
        payload: NewIssue,
    ) -> Result<IssueRecord, DomainError> {
        let mut errors = Vec::new();
        let title = payload.title.trim();
        if !TITLE_LEN.contains(&title.chars().count()) {
            errors.push(FieldError {
                field: "title",
                message: format!(
                    "length must be between {} and {} characters",
                    TITLE_LEN.start(),
                    TITLE_LEN.end()
                ),
            });
        }
        let description = payload.description.trim();
        if !DESCRIPTION_LEN.contains(&description.chars().count()) {
            errors.push(FieldError {
                field: "description",
                message: format!(
                    "length must be between {} and {} characters",
                    DESCRIPTION_LEN.start(),
                    DESCRIPTION_LEN.end()
                ),
            });
        }
        if !errors.is_empty() {
            return Err(DomainError::Validation(errors));
        }

        let registered = reporter
            .registered_location
            .ok_or(DomainError::Precondition("LocationNotSet"))?;

        let issue_point = GeoPoint::new(payload.latitude, payload.longitude);
        geo::validate_point(&issue_point)?;

        let effective_radius_km = self.effective_radius_km(reporter);
        let distance_km = geo::distance_km(&registered, &issue_point)?;
        if distance_km > effective_radius_km {
            return Err(DomainError::Geofence(GeofenceViolation {
                distance_km,
                effective_radius_km,
                reporter_location: registered,
                issue_location: issue_point,
            }));
        }

        let changed_by = if payload.is_anonymous { "anonymous" } else { reporter.id.as_str() };
        let now = Utc::now();
        let draft = IssueRecord {
            id: 0, // assigned by the store
            title: title.to_string(),
            description: description.to_string(),
            category: payload.category,
            location: IssueLocation {
                latitude: payload.latitude,
                longitude: payload.longitude,
                address: payload.address,
            },
            reporter_id: (!payload.is_anonymous).then(|| reporter.id.clone()),
            is_anonymous: payload.is_anonymous,
            status: IssueStatus::Reported,
            priority: payload.priority.unwrap_or_default(),
            flags: BTreeSet::new(),
            flag_count: 0,
            is_hidden: false,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status_history: vec![workflow::initial_event(changed_by)],
            version: 0,
        };

        let record = self.repo.create_issue(draft).await?;
        self.events.dispatch(DomainEvent::IssueCreated {
            issue_id: record.id,
            reporter_id: record.reporter_id.clone(),
        });
        Ok(record)
    }
}

// ---------------------------------------------------------------- workflow

#[derive(Clone)]
pub struct WorkflowService {
    repo: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
}

impl WorkflowService {
    pub fn new(repo: Arc<dyn Store>, events: Arc<dyn EventSink>) -> Self {
        Self { repo, events }
    }

    pub async fn transition(
        &self,
        issue_id: Id,
        to: IssueStatus,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<IssueRecord, DomainError> {
        let actor = actor.clone();
        let updated = self
            .repo
            .update_issue(issue_id, &move |issue| {
                workflow::transition(issue, to, &actor, comment.clone())
            })
            .await?;
        let last = updated.status_history.last();
        if let Some(event) = last {
            self.events.dispatch(DomainEvent::StatusChanged {
                issue_id: updated.id,
                from: event.from_status.unwrap_or(updated.status),
                to: event.to_status,
                changed_by: event.changed_by.clone(),
            });
        }
        Ok(updated)
    }
}

// -------------------------------------------------------------- moderation

#[derive(Clone)]
pub struct ModerationService {
    repo: Arc<dyn Store>,
    events: Arc<dyn EventSink>,
    cfg: ModerationConfig,
}

/// Outcome of `add_flag`: the updated record plus whether this call was
/// the one that crossed the auto-hide threshold.
#[derive(Debug)]
pub struct FlagOutcome {
    pub issue: IssueRecord,
    pub crossed_threshold: bool,
}

impl ModerationService {
    pub fn new(repo: Arc<dyn Store>, events: Arc<dyn EventSink>, cfg: ModerationConfig) -> Self {
        Self { repo, events, cfg }
    }

    pub async fn add_flag(
        &self,
        issue_id: Id,
        flagger_id: &str,
        reason: &str,
    ) -> Result<FlagOutcome, DomainError> {
        let threshold = self.cfg.auto_hide_threshold;
        let flagger = flagger_id.to_string();
        let updated = self
            .repo
            .update_issue(issue_id, &move |issue| {
                if !issue.flags.insert(flagger.clone()) {
                    return Err(DomainError::DuplicateFlag);
                }
                issue.flag_count = issue.flags.len();
                if issue.flag_count >= threshold {
                    issue.is_hidden = true;
                }
                issue.updated_at = Utc::now();
                Ok(())
            })
            .await?;

        // exactly one concurrent flagger observes the count land on the
        // threshold, so this is safe as the "crossed" signal
        let crossed_threshold = updated.is_hidden && updated.flag_count == threshold;
        tracing::info!(
            issue_id,
            flagger = flagger_id,
            reason,
            flag_count = updated.flag_count,
            "issue flagged"
        );
        if crossed_threshold {
            self.events.dispatch(DomainEvent::AutoHidden {
                issue_id: updated.id,
                flag_count: updated.flag_count,
            });
        }
        Ok(FlagOutcome { issue: updated, crossed_threshold })
    }

    /// Admin reset of the flag state. Deliberately does not touch
    /// `status`: clearing flags is not an approval of content.
    pub async fn clear_flags(
        &self,
        issue_id: Id,
        admin: &Actor,
    ) -> Result<IssueRecord, DomainError> {
        let updated = self
            .repo
            .update_issue(issue_id, &|issue| {
                issue.flags.clear();
                issue.flag_count = 0;
                issue.is_hidden = false;
                issue.updated_at = Utc::now();
                Ok(())
            })
            .await?;
        tracing::info!(issue_id, admin = %admin.id, "flags cleared");
        Ok(updated)
    }

    /// Convenience: reject a flagged report as spam. Does not unhide; that
    /// stays a separate, explicit `clear_flags`.
    pub async fn reject_as_spam(
        &self,
        workflow: &WorkflowService,
        issue_id: Id,
        admin: &Actor,
        comment: Option<String>,
    ) -> Result<IssueRecord, DomainError> {
        workflow
            .transition(issue_id, IssueStatus::Rejected, admin, comment)
            .await
    }
}

// ------------------------------------------------------------------- query

#[derive(Clone)]
pub struct QueryService {
    repo: Arc<dyn Store>,
}

impl QueryService {
    pub fn new(repo: Arc<dyn Store>) -> Self {
        Self { repo }
    }

    /// Hidden records are only visible to staff callers.
    pub async fn list(
        &self,
        filters: &IssueFilters,
        caller: Option<&Actor>,
    ) -> Result<Page<IssueRecord>, DomainError> {
        if let Some((center, radius_km)) = filters.center() {
            geo::validate_point(&center)?;
            if !(radius_km.is_finite() && radius_km > 0.0) {
                return Err(DomainError::Validation(vec![FieldError {
                    field: "radius_km",
                    message: "must be a positive number".into(),
                }]));
            }
        }
        let include_hidden = caller.map(Actor::is_staff).unwrap_or(false);
        Ok(self.repo.query_issues(filters, include_hidden).await?)
    }

    pub async fn get(&self, id: Id, caller: Option<&Actor>) -> Result<IssueRecord, DomainError> {
        let record = self.repo.find_issue(id).await?;
        let include_hidden = caller.map(Actor::is_staff).unwrap_or(false);
        if record.is_hidden && !include_hidden {
            return Err(DomainError::NotFound);
        }
        Ok(record)
    }
}
