use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::Role;

pub type Id = i64;

/// WGS84 coordinate pair. Range checks live in `geo::validate_point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Reported,
    InReview,
    InProgress,
    Resolved,
    Closed,
    Rejected,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Reported => "reported",
            IssueStatus::InReview => "in_review",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Closed => "closed",
            IssueStatus::Rejected => "rejected",
        }
    }

    /// Terminal states accept no further non-admin transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Closed | IssueStatus::Rejected)
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Pothole,
    Streetlight,
    Garbage,
    Graffiti,
    WaterLeak,
    Hazard,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for IssuePriority {
    fn default() -> Self {
        IssuePriority::Medium
    }
}

/// Where the problem is: coordinates plus an optional human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IssueLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
}

impl IssueLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One immutable audit-log entry for a single state transition.
/// `from_status` is None only for the initial REPORTED entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusEvent {
    pub id: Uuid,
    pub from_status: Option<IssueStatus>,
    pub to_status: IssueStatus,
    pub changed_by: String,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IssueRecord {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub location: IssueLocation,
    /// None when the report was filed anonymously.
    pub reporter_id: Option<String>,
    pub is_anonymous: bool,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    /// Distinct flagger ids. BTreeSet keeps serialization order stable.
    pub flags: BTreeSet<String>,
    pub flag_count: usize,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Append-only; the last entry's `to_status` always equals `status`.
    pub status_history: Vec<StatusEvent>,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl IssueRecord {
    /// Invariant check used by store code and tests after every mutation.
    pub fn is_consistent(&self) -> bool {
        self.flag_count == self.flags.len()
            && self
                .status_history
                .last()
                .map(|e| e.to_status == self.status)
                .unwrap_or(false)
            && (self.resolved_at.is_some() == (self.status == IssueStatus::Resolved))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReporterProfile {
    pub id: String,
    pub registered_location: Option<GeoPoint>,
    pub preferred_radius_km: f64,
    pub role: Role,
    pub updated_at: DateTime<Utc>,
}

/// Submission payload. Reporter identity comes from the verified token,
/// never from the body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: IssueCategory,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub priority: Option<IssuePriority>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpsertProfile {
    pub latitude: f64,
    pub longitude: f64,
    pub preferred_radius_km: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub status: IssueStatus,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FlagRequest {
    pub reason: String,
}

/// Verified caller identity, supplied by the auth layer on every
/// mutating call. The core trusts it as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Moderator | Role::Admin)
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
pub struct IssueFilters {
    pub category: Option<IssueCategory>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    /// Case-insensitive substring match over title, description, address.
    pub search: Option<String>,
    pub center_lat: Option<f64>,
    pub center_lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl IssueFilters {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn center(&self) -> Option<(GeoPoint, f64)> {
        match (self.center_lat, self.center_lng, self.radius_km) {
            (Some(lat), Some(lng), Some(r)) => Some((GeoPoint::new(lat, lng), r)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(IssuePage = Page<IssueRecord>)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}
