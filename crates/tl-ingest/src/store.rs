// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job persistence.
//!
//! Jobs are small JSON documents keyed by id.  The file store writes to a
//! temp file and renames into place so a crash never leaves a
//! half-written job, and hydrates the directory on demand rather than
//! holding state in memory.

use async_trait::async_trait;
use std::path::PathBuf;
use tl_core::TenantId;
use tl_core::job::IngestJob;
use tl_error::{ErrorCode, ServiceError};
use tokio::fs;
use tracing::error;
use uuid::Uuid;

/// Persistence seam for ingest jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Write (insert or replace) a job.
    async fn put(&self, job: &IngestJob) -> Result<(), ServiceError>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<IngestJob>, ServiceError>;

    /// Jobs belonging to one tenant, newest first.
    async fn list(&self, tenant: &TenantId) -> Result<Vec<IngestJob>, ServiceError>;

    /// Every persisted job (startup recovery).
    async fn list_all(&self) -> Result<Vec<IngestJob>, ServiceError>;
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// One JSON file per job under a directory.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (creating the directory if needed).
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            ServiceError::new(
                ErrorCode::Internal,
                format!("cannot create job dir {}", dir.display()),
            )
            .with_source(e)
        })?;
        Ok(Self { dir })
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn put(&self, job: &IngestJob) -> Result<(), ServiceError> {
        let bytes = serde_json::to_vec_pretty(job).map_err(|e| {
            ServiceError::new(ErrorCode::Internal, "job encode failed").with_source(e)
        })?;
        let path = self.job_path(job.job_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(|e| {
            ServiceError::new(ErrorCode::Internal, "job write failed").with_source(e)
        })?;
        fs::rename(&tmp, &path).await.map_err(|e| {
            ServiceError::new(ErrorCode::Internal, "job rename failed").with_source(e)
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<IngestJob>, ServiceError> {
        let path = self.job_path(job_id);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                ServiceError::new(ErrorCode::Internal, "job decode failed")
                    .with_context("path", path.display().to_string())
                    .with_source(e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServiceError::new(ErrorCode::Internal, "job read failed").with_source(e)),
        }
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<IngestJob>, ServiceError> {
        let mut jobs: Vec<IngestJob> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|j| &j.tenant_id == tenant)
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_all(&self) -> Result<Vec<IngestJob>, ServiceError> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            ServiceError::new(ErrorCode::Internal, "job dir unreadable").with_source(e)
        })?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ServiceError::new(ErrorCode::Internal, "job dir iteration failed").with_source(e)
        })? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<IngestJob>(&bytes) {
                    Ok(job) => jobs.push(job),
                    Err(err) => {
                        error!(path = %path.display(), error = %err, "skipping corrupt job file");
                    }
                },
                Err(err) => {
                    error!(path = %path.display(), error = %err, "skipping unreadable job file");
                }
            }
        }
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

/// In-memory job store for tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: tokio::sync::RwLock<std::collections::HashMap<Uuid, IngestJob>>,
}

impl MemoryJobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: &IngestJob) -> Result<(), ServiceError> {
        self.jobs.write().await.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<IngestJob>, ServiceError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<IngestJob>, ServiceError> {
        let mut jobs: Vec<IngestJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| &j.tenant_id == tenant)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_all(&self) -> Result<Vec<IngestJob>, ServiceError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::job::{IngestScope, JobStatus};

    fn job(tenant: &str) -> IngestJob {
        IngestJob::new(
            TenantId::new(tenant).unwrap(),
            "freshdesk",
            IngestScope::Full,
        )
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();

        let j = job("acme");
        store.put(&j).await.unwrap();
        let loaded = store.get(j.job_id).await.unwrap().unwrap();
        assert_eq!(loaded, j);
    }

    #[tokio::test]
    async fn file_store_missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_put_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();

        let mut j = job("acme");
        store.put(&j).await.unwrap();
        j.status = JobStatus::Running;
        j.progress.items_done = 5;
        store.put(&j).await.unwrap();

        let loaded = store.get(j.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.progress.items_done, 5);
    }

    #[tokio::test]
    async fn list_filters_by_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();

        store.put(&job("acme")).await.unwrap();
        store.put(&job("acme")).await.unwrap();
        store.put(&job("globex")).await.unwrap();

        let acme = store.list(&TenantId::new("acme").unwrap()).await.unwrap();
        assert_eq!(acme.len(), 2);
        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).await.unwrap();
        store.put(&job("acme")).await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"{not json").unwrap();

        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryJobStore::new();
        let j = job("acme");
        store.put(&j).await.unwrap();
        assert_eq!(store.get(j.job_id).await.unwrap().unwrap(), j);
        assert_eq!(
            store.list(&TenantId::new("acme").unwrap()).await.unwrap().len(),
            1
        );
    }
}
