//! Filesystem-backed publish job storage.
//!
//! Each job is one JSON document named `<job id>.json`. Writes go to a temporary file of
//! their own first and are renamed into place, so a crash never leaves a half-written job
//! behind and concurrent writers never share a temporary file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

use crate::application::error::StoreError;
use crate::application::jobs::{JobStore, select_for_revival};
use crate::domain::entities::PublishJob;

const JOB_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

#[derive(Debug)]
pub struct FileJobStore {
    root: PathBuf,
}

impl FileJobStore {
    /// Opens storage rooted at `root`, creating the directory if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.{JOB_EXTENSION}"))
    }

    async fn write(&self, job: &PublishJob) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(job)?;
        let target = self.path_for(job.id);
        let temp = self
            .root
            .join(format!("{}.{}.{TEMP_EXTENSION}", job.id, Uuid::new_v4().simple()));

        let mut file = fs::File::create(&temp).await?;
        if let Err(err) = write_all_synced(&mut file, &payload).await {
            drop(file);
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        drop(file);

        fs::rename(&temp, &target).await?;
        Ok(())
    }

    async fn read_job(path: &Path) -> Result<PublishJob, StoreError> {
        let data = fs::read(path).await?;
        Ok(serde_json::from_slice(&data)?)
    }
}

async fn write_all_synced(file: &mut fs::File, payload: &[u8]) -> Result<(), std::io::Error> {
    file.write_all(payload).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, job: &PublishJob) -> Result<(), StoreError> {
        self.write(job).await
    }

    async fn update(&self, job: &PublishJob) -> Result<(), StoreError> {
        self.write(job).await
    }

    /// Missing files are treated as success.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Unreadable or malformed documents are skipped with a warning.
    async fn read_all(
        &self,
        since: Option<OffsetDateTime>,
        limit: usize,
    ) -> Result<Vec<PublishJob>, StoreError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut jobs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(JOB_EXTENSION) {
                continue;
            }
            match Self::read_job(&path).await {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable stored job");
                }
            }
        }

        Ok(select_for_revival(jobs, since, limit))
    }
}
