#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use chrono::Utc;
use serial_test::serial;

use civix::auth::Role;
use civix::error::DomainError;
use civix::events::RecordingSink;
use civix::issues::{
    GeofenceConfig, ModerationConfig, ModerationService, QueryService, SubmissionService,
};
use civix::models::*;
use civix::repo::{inmem::InMemRepo, Store};

struct Harness {
    submissions: SubmissionService,
    moderation: ModerationService,
    queries: QueryService,
}

fn harness() -> Harness {
    std::env::set_var("CIVIX_DATA_DIR", tempfile::tempdir().unwrap().path());
    let repo: Arc<dyn Store> = Arc::new(InMemRepo::new());
    let sink = Arc::new(RecordingSink::default());
    Harness {
        submissions: SubmissionService::new(repo.clone(), sink.clone(), GeofenceConfig::default()),
        moderation: ModerationService::new(
            repo.clone(),
            sink,
            ModerationConfig { auto_hide_threshold: 3 },
        ),
        queries: QueryService::new(repo),
    }
}

fn profile() -> ReporterProfile {
    ReporterProfile {
        id: "reporter-1".into(),
        registered_location: Some(GeoPoint::new(40.7128, -74.0060)),
        preferred_radius_km: 5.0,
        role: Role::User,
        updated_at: Utc::now(),
    }
}

fn staff() -> Actor {
    Actor { id: "mod-1".into(), role: Role::Moderator }
}

async fn seed(h: &Harness, title: &str, category: IssueCategory, lat: f64, lng: f64) -> IssueRecord {
    h.submissions
        .create_issue(
            &profile(),
            NewIssue {
                title: title.to_string(),
                description: format!("{title} - reported by a resident, needs attention"),
                category,
                latitude: lat,
                longitude: lng,
                address: None,
                priority: None,
                is_anonymous: false,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn newest_first_with_pagination() {
    let h = harness();
    for i in 0..5 {
        seed(&h, &format!("Pothole number {i} on Main"), IssueCategory::Pothole, 40.7128, -74.0060).await;
    }

    let filters = IssueFilters { page: Some(1), page_size: Some(2), ..Default::default() };
    let page = h.queries.list(&filters, None).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].created_at >= page.items[1].created_at);
    assert!(page.items[0].id > page.items[1].id);

    let filters = IssueFilters { page: Some(3), page_size: Some(2), ..Default::default() };
    let last = h.queries.list(&filters, None).await.unwrap();
    assert_eq!(last.items.len(), 1);

    let filters = IssueFilters { page: Some(9), page_size: Some(2), ..Default::default() };
    let empty = h.queries.list(&filters, None).await.unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.total, 5);
}

#[tokio::test]
#[serial]
async fn category_status_and_search_filters() {
    let h = harness();
    seed(&h, "Pothole outside the library", IssueCategory::Pothole, 40.7128, -74.0060).await;
    seed(&h, "Broken streetlight by the park", IssueCategory::Streetlight, 40.7128, -74.0060).await;

    let filters = IssueFilters { category: Some(IssueCategory::Pothole), ..Default::default() };
    let page = h.queries.list(&filters, None).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].category, IssueCategory::Pothole);

    let filters = IssueFilters { status: Some(IssueStatus::Reported), ..Default::default() };
    assert_eq!(h.queries.list(&filters, None).await.unwrap().total, 2);

    let filters = IssueFilters { search: Some("LIBRARY".into()), ..Default::default() };
    let page = h.queries.list(&filters, None).await.unwrap();
    assert_eq!(page.total, 1);
    assert!(page.items[0].title.contains("library"));
}

#[tokio::test]
#[serial]
async fn hidden_records_are_invisible_to_the_public() {
    let h = harness();
    let visible = seed(&h, "Graffiti on the underpass wall", IssueCategory::Graffiti, 40.7128, -74.0060).await;
    let hidden = seed(&h, "Some inflammatory nonsense post", IssueCategory::Other, 40.7128, -74.0060).await;
    for f in ["f1", "f2", "f3"] {
        h.moderation.add_flag(hidden.id, f, "abuse").await.unwrap();
    }

    let page = h.queries.list(&IssueFilters::default(), None).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, visible.id);

    // staff see both
    let page = h.queries.list(&IssueFilters::default(), Some(&staff())).await.unwrap();
    assert_eq!(page.total, 2);

    // direct fetch follows the same rule
    assert!(matches!(h.queries.get(hidden.id, None).await.unwrap_err(), DomainError::NotFound));
    assert_eq!(h.queries.get(hidden.id, Some(&staff())).await.unwrap().id, hidden.id);
}

#[tokio::test]
#[serial]
async fn radius_filter_uses_exact_distance() {
    let h = harness();
    let near = seed(&h, "Pothole close to city hall", IssueCategory::Pothole, 40.7128, -74.0060).await;
    // ~3.5 km north, still inside the reporter's fence but outside a 2 km query radius
    seed(&h, "Garbage pileup a few km north", IssueCategory::Garbage, 40.744, -74.0060).await;

    let filters = IssueFilters {
        center_lat: Some(40.7128),
        center_lng: Some(-74.0060),
        radius_km: Some(2.0),
        ..Default::default()
    };
    let page = h.queries.list(&filters, None).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, near.id);

    let filters = IssueFilters {
        center_lat: Some(40.7128),
        center_lng: Some(-74.0060),
        radius_km: Some(5.0),
        ..Default::default()
    };
    assert_eq!(h.queries.list(&filters, None).await.unwrap().total, 2);
}

#[tokio::test]
#[serial]
async fn bad_query_geometry_is_rejected() {
    let h = harness();
    let filters = IssueFilters {
        center_lat: Some(120.0),
        center_lng: Some(0.0),
        radius_km: Some(2.0),
        ..Default::default()
    };
    assert!(matches!(h.queries.list(&filters, None).await.unwrap_err(), DomainError::Geo(_)));

    let filters = IssueFilters {
        center_lat: Some(40.0),
        center_lng: Some(-74.0),
        radius_km: Some(-1.0),
        ..Default::default()
    };
    assert!(matches!(
        h.queries.list(&filters, None).await.unwrap_err(),
        DomainError::Validation(_)
    ));
}
