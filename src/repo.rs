use async_trait::async_trait;

use crate::error::DomainError;
use crate::geo;
use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error(transparent)]
    Domain(DomainError),
    #[error("store error: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Atomic per-record mutation. The store applies it under its own
/// concurrency discipline (write lock or optimistic version check) and
/// may invoke it more than once on conflict, so it must be pure in the
/// record it receives. A `Err` from the mutator leaves the record
/// untouched and is surfaced verbatim.
pub type Mutator<'a> = &'a (dyn Fn(&mut IssueRecord) -> Result<(), DomainError> + Send + Sync);

/// How many optimistic-concurrency attempts a store makes before
/// surfacing `Conflict` to the caller (who decides about retrying).
pub const UPDATE_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait IssueRepo: Send + Sync {
    /// Persist a new record. The store assigns `id` and the initial
    /// `version`; everything else is taken as-is. No partial write is
    /// ever observable.
    async fn create_issue(&self, draft: IssueRecord) -> RepoResult<IssueRecord>;
    async fn find_issue(&self, id: Id) -> RepoResult<IssueRecord>;
    /// Load-mutate-store as one atomic step; returns the updated record.
    async fn update_issue(&self, id: Id, mutate: Mutator<'_>) -> RepoResult<IssueRecord>;
    /// Filtered, paginated listing ordered by `created_at` descending.
    /// Hidden records are excluded unless `include_hidden`.
    async fn query_issues(
        &self,
        filters: &IssueFilters,
        include_hidden: bool,
    ) -> RepoResult<Page<IssueRecord>>;
}

#[async_trait]
pub trait ProfileRepo: Send + Sync {
    async fn get_profile(&self, actor_id: &str) -> RepoResult<Option<ReporterProfile>>;
    async fn upsert_profile(&self, profile: ReporterProfile) -> RepoResult<ReporterProfile>;
}

pub trait Store: IssueRepo + ProfileRepo {}

impl<T> Store for T where T: IssueRepo + ProfileRepo {}

/// Shared post-fetch filtering: structural filters, free-text search,
/// bounding-box prefilter plus exact haversine check, newest-first order,
/// then pagination. Both backends funnel through here so filter semantics
/// cannot drift between them.
pub(crate) fn filter_sort_page(
    mut records: Vec<IssueRecord>,
    filters: &IssueFilters,
    include_hidden: bool,
) -> RepoResult<Page<IssueRecord>> {
    let geo_filter = match filters.center() {
        Some((center, radius_km)) => Some((
            center,
            radius_km,
            geo::bounding_box(&center, radius_km).map_err(|e| RepoError::Domain(e.into()))?,
        )),
        None => None,
    };

    let needle = filters.search.as_ref().map(|s| s.to_lowercase());

    records.retain(|r| {
        if r.is_hidden && !include_hidden {
            return false;
        }
        if let Some(c) = filters.category {
            if r.category != c {
                return false;
            }
        }
        if let Some(s) = filters.status {
            if r.status != s {
                return false;
            }
        }
        if let Some(p) = filters.priority {
            if r.priority != p {
                return false;
            }
        }
        if let Some(ref needle) = needle {
            let addr = r.location.address.as_deref().unwrap_or("");
            if !r.title.to_lowercase().contains(needle)
                && !r.description.to_lowercase().contains(needle)
                && !addr.to_lowercase().contains(needle)
            {
                return false;
            }
        }
        if let Some((center, radius_km, bbox)) = &geo_filter {
            let p = r.location.point();
            if !bbox.contains(&p) {
                return false;
            }
            // exact check; records with somehow-invalid coordinates are out
            if !geo::is_within_radius(center, &p, *radius_km).unwrap_or(false) {
                return false;
            }
        }
        true
    });

    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = records.len() as u64;
    let page = filters.page();
    let page_size = filters.page_size();
    let start = (page as usize - 1).saturating_mul(page_size as usize);
    let items = records
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();

    Ok(Page {
        items,
        page,
        page_size,
        total,
    })
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        issues: HashMap<Id, IssueRecord>,
        profiles: HashMap<String, ReporterProfile>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("CIVIX_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    tracing::error!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl IssueRepo for InMemRepo {
        async fn create_issue(&self, mut draft: IssueRecord) -> RepoResult<IssueRecord> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            draft.id = id;
            draft.version = 1;
            debug_assert!(draft.is_consistent());
            s.issues.insert(id, draft.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(draft)
        }

        async fn find_issue(&self, id: Id) -> RepoResult<IssueRecord> {
            let s = self.state.read().unwrap();
            s.issues.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_issue(&self, id: Id, mutate: Mutator<'_>) -> RepoResult<IssueRecord> {
            let mut s = self.state.write().unwrap();
            let current = s.issues.get(&id).ok_or(RepoError::NotFound)?;
            // mutate a copy so a rejected mutation leaves the record untouched
            let mut next = current.clone();
            mutate(&mut next).map_err(RepoError::Domain)?;
            next.version = current.version + 1;
            debug_assert!(next.is_consistent());
            s.issues.insert(id, next.clone());
            drop(s);
            self.persist();
            Ok(next)
        }

        async fn query_issues(
            &self,
            filters: &IssueFilters,
            include_hidden: bool,
        ) -> RepoResult<Page<IssueRecord>> {
            let records: Vec<_> = {
                let s = self.state.read().unwrap();
                s.issues.values().cloned().collect()
            };
            filter_sort_page(records, filters, include_hidden)
        }
    }

    #[async_trait]
    impl ProfileRepo for InMemRepo {
        async fn get_profile(&self, actor_id: &str) -> RepoResult<Option<ReporterProfile>> {
            let s = self.state.read().unwrap();
            Ok(s.profiles.get(actor_id).cloned())
        }

        async fn upsert_profile(&self, profile: ReporterProfile) -> RepoResult<ReporterProfile> {
            let mut s = self.state.write().unwrap();
            s.profiles.insert(profile.id.clone(), profile.clone());
            drop(s);
            self.persist();
            Ok(profile)
        }
    }
}

// Postgres implementation (feature = "postgres-store"). Records are stored
// as one JSONB document per issue so the persisted shape round-trips every
// field (status_history order included); version/created_at/is_hidden are
// lifted into columns for the optimistic-concurrency check and listing.
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }

    #[async_trait]
    impl IssueRepo for PgRepo {
        async fn create_issue(&self, mut draft: IssueRecord) -> RepoResult<IssueRecord> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO issues (version, created_at, is_hidden, doc) VALUES (1, $1, $2, $3) RETURNING id",
            )
            .bind(draft.created_at)
            .bind(draft.is_hidden)
            .bind(Json(&draft))
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
            draft.id = id;
            draft.version = 1;
            sqlx::query("UPDATE issues SET doc = $2 WHERE id = $1")
                .bind(id)
                .bind(Json(&draft))
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            Ok(draft)
        }

        async fn find_issue(&self, id: Id) -> RepoResult<IssueRecord> {
            let row = sqlx::query("SELECT doc FROM issues WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            let Json(record): Json<IssueRecord> = row.try_get("doc").map_err(internal)?;
            Ok(record)
        }

        async fn update_issue(&self, id: Id, mutate: Mutator<'_>) -> RepoResult<IssueRecord> {
            for _ in 0..UPDATE_ATTEMPTS {
                let current = self.find_issue(id).await?;
                let mut next = current.clone();
                mutate(&mut next).map_err(RepoError::Domain)?;
                next.version = current.version + 1;
                let res = sqlx::query(
                    "UPDATE issues SET doc = $3, version = $4, is_hidden = $5 WHERE id = $1 AND version = $2",
                )
                .bind(id)
                .bind(current.version as i64)
                .bind(Json(&next))
                .bind(next.version as i64)
                .bind(next.is_hidden)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
                if res.rows_affected() == 1 {
                    return Ok(next);
                }
                // lost the version race; reload and try again
            }
            Err(RepoError::Conflict)
        }

        async fn query_issues(
            &self,
            filters: &IssueFilters,
            include_hidden: bool,
        ) -> RepoResult<Page<IssueRecord>> {
            let rows = sqlx::query(
                "SELECT doc FROM issues WHERE ($1 OR NOT is_hidden) ORDER BY created_at DESC",
            )
            .bind(include_hidden)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let Json(record): Json<IssueRecord> = row.try_get("doc").map_err(internal)?;
                records.push(record);
            }
            filter_sort_page(records, filters, include_hidden)
        }
    }

    #[async_trait]
    impl ProfileRepo for PgRepo {
        async fn get_profile(&self, actor_id: &str) -> RepoResult<Option<ReporterProfile>> {
            let row = sqlx::query("SELECT doc FROM profiles WHERE id = $1")
                .bind(actor_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?;
            match row {
                Some(row) => {
                    let doc = row.try_get::<Json<ReporterProfile>, _>("doc").map_err(internal)?;
                    Ok(Some(doc.0))
                }
                None => Ok(None),
            }
        }

        async fn upsert_profile(&self, profile: ReporterProfile) -> RepoResult<ReporterProfile> {
            sqlx::query(
                "INSERT INTO profiles (id, doc) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc",
            )
            .bind(&profile.id)
            .bind(Json(&profile))
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(profile)
        }
    }
}
