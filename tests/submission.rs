#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use chrono::Utc;
use serial_test::serial;

use civix::auth::Role;
use civix::error::DomainError;
use civix::events::{DomainEvent, RecordingSink};
use civix::issues::{GeofenceConfig, SubmissionService};
use civix::models::*;
use civix::repo::{inmem::InMemRepo, Store};

/// Fresh, isolated repository per test run.
fn repo() -> Arc<dyn Store> {
    std::env::set_var("CIVIX_DATA_DIR", tempfile::tempdir().unwrap().path());
    Arc::new(InMemRepo::new())
}

fn service(repo: Arc<dyn Store>) -> (SubmissionService, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let svc = SubmissionService::new(repo, sink.clone(), GeofenceConfig::default());
    (svc, sink)
}

fn reporter(radius_km: f64) -> ReporterProfile {
    ReporterProfile {
        id: "user-1".into(),
        registered_location: Some(GeoPoint::new(40.7128, -74.0060)),
        preferred_radius_km: radius_km,
        role: Role::User,
        updated_at: Utc::now(),
    }
}

fn payload_at(latitude: f64, longitude: f64) -> NewIssue {
    NewIssue {
        title: "Deep pothole on 5th Avenue".into(),
        description: "Large pothole near the crosswalk, keeps growing after rain".into(),
        category: IssueCategory::Pothole,
        latitude,
        longitude,
        address: Some("5th Ave & 23rd St".into()),
        priority: None,
        is_anonymous: false,
    }
}

#[tokio::test]
#[serial]
async fn submission_at_registered_location_succeeds() {
    let (svc, sink) = service(repo());
    let record = svc.create_issue(&reporter(5.0), payload_at(40.7128, -74.0060)).await.unwrap();

    assert_eq!(record.status, IssueStatus::Reported);
    assert_eq!(record.status_history.len(), 1);
    assert_eq!(record.status_history[0].to_status, IssueStatus::Reported);
    assert_eq!(record.status_history[0].from_status, None);
    assert_eq!(record.status_history[0].changed_by, "user-1");
    assert_eq!(record.reporter_id.as_deref(), Some("user-1"));
    assert_eq!(record.flag_count, 0);
    assert!(!record.is_hidden);
    assert!(record.is_consistent());
    assert_eq!(
        sink.take(),
        vec![DomainEvent::IssueCreated { issue_id: record.id, reporter_id: Some("user-1".into()) }]
    );
}

#[tokio::test]
#[serial]
async fn submission_22km_away_violates_geofence() {
    let (svc, sink) = service(repo());
    let err = svc.create_issue(&reporter(5.0), payload_at(40.9, -74.1)).await.unwrap_err();

    match err {
        DomainError::Geofence(v) => {
            assert!((v.distance_km - 22.0).abs() < 0.5, "distance {}", v.distance_km);
            assert_eq!(v.effective_radius_km, 5.0);
            assert_eq!(v.reporter_location, GeoPoint::new(40.7128, -74.0060));
            assert_eq!(v.issue_location, GeoPoint::new(40.9, -74.1));
        }
        other => panic!("expected geofence violation, got {other:?}"),
    }
    assert!(sink.take().is_empty());
}

#[tokio::test]
#[serial]
async fn system_cap_beats_preferred_radius() {
    let (svc, _) = service(repo());
    // 50 km preference, ~22 km distance: the 5 km system cap still wins
    let err = svc.create_issue(&reporter(50.0), payload_at(40.9, -74.1)).await.unwrap_err();
    match err {
        DomainError::Geofence(v) => assert_eq!(v.effective_radius_km, 5.0),
        other => panic!("expected geofence violation, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn validation_aggregates_all_violations() {
    let (svc, _) = service(repo());
    let mut payload = payload_at(40.7128, -74.0060);
    payload.title = "short".into();
    payload.description = "too short too".into();

    let err = svc.create_issue(&reporter(5.0), payload).await.unwrap_err();
    match err {
        DomainError::Validation(errors) => {
            let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
            assert_eq!(fields, vec!["title", "description"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn missing_registered_location_is_a_precondition_failure() {
    let (svc, _) = service(repo());
    let mut profile = reporter(5.0);
    profile.registered_location = None;

    let err = svc.create_issue(&profile, payload_at(40.7128, -74.0060)).await.unwrap_err();
    assert!(matches!(err, DomainError::Precondition("LocationNotSet")));
}

#[tokio::test]
#[serial]
async fn invalid_issue_coordinates_rejected_before_distance_math() {
    let (svc, _) = service(repo());
    let err = svc.create_issue(&reporter(5.0), payload_at(95.0, -74.0)).await.unwrap_err();
    assert!(matches!(err, DomainError::Geo(_)));
}

#[tokio::test]
#[serial]
async fn anonymous_submission_hides_reporter_but_keeps_geofence() {
    let (svc, _) = service(repo());
    let mut payload = payload_at(40.7128, -74.0060);
    payload.is_anonymous = true;

    let record = svc.create_issue(&reporter(5.0), payload).await.unwrap();
    assert_eq!(record.reporter_id, None);
    assert!(record.is_anonymous);
    assert_eq!(record.status_history[0].changed_by, "anonymous");

    // the fence still applies to anonymous reports
    let mut far = payload_at(40.9, -74.1);
    far.is_anonymous = true;
    assert!(matches!(
        svc.create_issue(&reporter(5.0), far).await.unwrap_err(),
        DomainError::Geofence(_)
    ));
}

#[tokio::test]
#[serial]
async fn created_record_round_trips_through_the_store() {
    let r = repo();
    let (svc, _) = service(r.clone());
    let record = svc.create_issue(&reporter(5.0), payload_at(40.7128, -74.0060)).await.unwrap();

    let loaded = r.find_issue(record.id).await.unwrap();
    assert_eq!(loaded, record);
    assert_eq!(loaded.status_history, record.status_history);
}
