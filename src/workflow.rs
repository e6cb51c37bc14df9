//! Status state machine and audit trail.
//!
//! REPORTED -> IN_REVIEW -> IN_PROGRESS -> RESOLVED -> CLOSED, with
//! REJECTED reachable from any non-terminal state. Two edges are
//! admin-only: closing from an arbitrary state, and reopening a
//! resolved issue back to IN_PROGRESS.

use chrono::Utc;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::{Actor, IssueRecord, IssueStatus, StatusEvent};

use IssueStatus::*;

/// Whether `from -> to` is an edge of the graph at all, for any role.
pub fn edge_exists(from: IssueStatus, to: IssueStatus) -> bool {
    matches!(
        (from, to),
        (Reported, InReview)
            | (Reported, Rejected)
            | (InReview, InProgress)
            | (InReview, Rejected)
            | (InProgress, Resolved)
            | (InProgress, Rejected)
            | (Resolved, Closed)
            | (Resolved, InProgress)
    ) || (to == Closed && from != Closed)
}

/// Whether the edge is permitted for the given actor. The two admin-only
/// edges are reopening (`RESOLVED -> IN_PROGRESS`) and closing from any
/// state other than RESOLVED.
pub fn is_allowed(from: IssueStatus, to: IssueStatus, actor: &Actor) -> bool {
    if !edge_exists(from, to) {
        return false;
    }
    let admin_only =
        (from == Resolved && to == InProgress) || (to == Closed && from != Resolved);
    !admin_only || actor.is_admin()
}

/// Audit entry for the creation of a record in its initial state.
pub fn initial_event(changed_by: &str) -> StatusEvent {
    StatusEvent {
        id: Uuid::new_v4(),
        from_status: None,
        to_status: Reported,
        changed_by: changed_by.to_string(),
        comment: None,
        at: Utc::now(),
    }
}

/// Apply one transition in place: append the audit event, update
/// `status`/`updated_at`, and maintain `resolved_at` (set on entering
/// RESOLVED, cleared on leaving it). Leaves the record untouched on error.
pub fn transition(
    issue: &mut IssueRecord,
    to: IssueStatus,
    actor: &Actor,
    comment: Option<String>,
) -> Result<(), DomainError> {
    let from = issue.status;
    if !is_allowed(from, to, actor) {
        return Err(DomainError::InvalidTransition { from, to });
    }
    let now = Utc::now();
    issue.status_history.push(StatusEvent {
        id: Uuid::new_v4(),
        from_status: Some(from),
        to_status: to,
        changed_by: actor.id.clone(),
        comment,
        at: now,
    });
    issue.status = to;
    issue.updated_at = now;
    issue.resolved_at = if to == Resolved { Some(now) } else { None };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::{IssueCategory, IssueLocation, IssuePriority};
    use std::collections::BTreeSet;

    fn admin() -> Actor {
        Actor { id: "admin-1".into(), role: Role::Admin }
    }

    fn moderator() -> Actor {
        Actor { id: "mod-1".into(), role: Role::Moderator }
    }

    fn issue() -> IssueRecord {
        let now = Utc::now();
        IssueRecord {
            id: 1,
            title: "Deep pothole on 5th".into(),
            description: "Large pothole near the crosswalk, growing".into(),
            category: IssueCategory::Pothole,
            location: IssueLocation { latitude: 40.7, longitude: -74.0, address: None },
            reporter_id: Some("user-1".into()),
            is_anonymous: false,
            status: Reported,
            priority: IssuePriority::Medium,
            flags: BTreeSet::new(),
            flag_count: 0,
            is_hidden: false,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            status_history: vec![initial_event("user-1")],
            version: 1,
        }
    }

    #[test]
    fn reported_cannot_jump_to_resolved() {
        let mut i = issue();
        let err = transition(&mut i, Resolved, &moderator(), None).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidTransition { from: Reported, to: Resolved }
        ));
        assert_eq!(i.status, Reported);
        assert_eq!(i.status_history.len(), 1);
    }

    #[test]
    fn full_happy_path_builds_history() {
        let mut i = issue();
        let m = moderator();
        transition(&mut i, InReview, &m, None).unwrap();
        transition(&mut i, InProgress, &m, Some("crew dispatched".into())).unwrap();
        transition(&mut i, Resolved, &m, None).unwrap();
        assert_eq!(i.status, Resolved);
        assert_eq!(i.status_history.len(), 4);
        assert!(i.resolved_at.is_some());
        assert_eq!(i.status_history.last().unwrap().to_status, Resolved);
        assert!(i.is_consistent());
    }

    #[test]
    fn rejection_allowed_from_every_active_state() {
        for setup in [vec![], vec![InReview], vec![InReview, InProgress]] {
            let mut i = issue();
            let m = moderator();
            for s in setup {
                transition(&mut i, s, &m, None).unwrap();
            }
            transition(&mut i, Rejected, &m, Some("spam".into())).unwrap();
            assert_eq!(i.status, Rejected);
        }
    }

    #[test]
    fn reopen_is_admin_only_and_clears_resolved_at() {
        let mut i = issue();
        let m = moderator();
        transition(&mut i, InReview, &m, None).unwrap();
        transition(&mut i, InProgress, &m, None).unwrap();
        transition(&mut i, Resolved, &m, None).unwrap();

        let err = transition(&mut i, InProgress, &m, None).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert!(i.resolved_at.is_some());

        transition(&mut i, InProgress, &admin(), Some("not actually fixed".into())).unwrap();
        assert_eq!(i.status, InProgress);
        assert!(i.resolved_at.is_none());
        assert!(i.is_consistent());
    }

    #[test]
    fn close_from_resolved_is_staff_close_from_elsewhere_is_admin() {
        let mut i = issue();
        let m = moderator();
        transition(&mut i, InReview, &m, None).unwrap();
        transition(&mut i, InProgress, &m, None).unwrap();
        transition(&mut i, Resolved, &m, None).unwrap();
        transition(&mut i, Closed, &m, None).unwrap();
        assert_eq!(i.status, Closed);
        assert!(i.resolved_at.is_none());

        // admin override close straight from REPORTED
        let mut i = issue();
        assert!(transition(&mut i, Closed, &m, None).is_err());
        transition(&mut i, Closed, &admin(), Some("duplicate of #12".into())).unwrap();
        assert_eq!(i.status, Closed);
    }

    #[test]
    fn terminal_states_have_no_self_loops() {
        let mut i = issue();
        transition(&mut i, Closed, &admin(), None).unwrap();
        assert!(transition(&mut i, Closed, &admin(), None).is_err());
    }
}
