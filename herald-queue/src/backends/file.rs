use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use async_trait::async_trait;
use herald_common::internal;
use serde::Deserialize;
use tokio::{fs, sync::Mutex};
use tracing::warn;

use crate::{
    PathError, QueueError, QueueRecord, QueueStatus, RecordId, RecordUpdate,
    store::{QueueStore, into_batch},
};

/// File-based queue store
///
/// Every record is a JSON document named after its id (`{ulid}.json`) inside
/// the queue directory.
///
/// # Atomicity
/// Writes go to `.tmp_{ulid}.json` first and are then renamed over the
/// record, so a crash never leaves a half-written record behind and readers
/// always observe either the old or the new version. Read-modify-write
/// operations (claim, update, stale requeue) are serialised by an async
/// mutex shared by all clones of the store, which makes claims atomic for
/// every dispatcher running in this process.
///
/// # Performance
/// - Insert / update / claim: one read, one write, one rename
/// - Batch selection, count, list: full directory scan
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl Default for FileQueueStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/herald"),
            lock: Arc::default(),
        }
    }
}

impl<'de> Deserialize<'de> for FileQueueStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileQueueStoreHelper {
            path: PathBuf,
        }

        let helper = FileQueueStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self {
            path: helper.path,
            lock: Arc::default(),
        })
    }
}

impl FileQueueStore {
    /// Reject relative paths, `..` components and system directories
    fn validate_path(path: &Path) -> Result<(), PathError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(PathError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(PathError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileQueueStoreBuilder {
        FileQueueStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare the queue directory
    ///
    /// Creates the directory when missing, fails if the path is not a
    /// directory, and removes temp files left behind by a crash mid-write.
    ///
    /// # Errors
    /// If the directory cannot be created or read.
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue store at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(PathError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temp files from the queue store"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &RecordId) -> PathBuf {
        self.path.join(format!("{id}.json"))
    }

    async fn read_record(&self, id: &RecordId) -> crate::Result<QueueRecord> {
        match fs::read(self.record_path(id)).await {
            Ok(content) => Ok(serde_json::from_slice(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(QueueError::NotFound(*id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &QueueRecord) -> crate::Result<()> {
        let temp_path = self.path.join(format!(".tmp_{}.json", record.id));
        let content = serde_json::to_vec_pretty(record)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, self.record_path(&record.id)).await?;

        Ok(())
    }

    /// Read every record in the directory, skipping unreadable ones
    async fn read_all(&self) -> crate::Result<Vec<QueueRecord>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let Some(id) = RecordId::from_filename(&filename.to_string_lossy()) else {
                continue;
            };

            match self.read_record(&id).await {
                Ok(record) => records.push(record),
                // Deleted between the listing and the read
                Err(QueueError::NotFound(_)) => {}
                Err(e) => warn!(record_id = %id, error = %e, "Skipping unreadable queue record"),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    #[tracing::instrument(level = "debug", skip_all, fields(record_id = %record.id))]
    async fn insert(&self, record: &QueueRecord) -> crate::Result<()> {
        let _guard = self.lock.lock().await;

        if fs::try_exists(self.record_path(&record.id)).await? {
            return Err(QueueError::AlreadyExists(record.id));
        }

        self.write_record(record).await?;
        internal!(level = DEBUG, "Stored record {} in queue", record.id);

        Ok(())
    }

    async fn get(&self, id: &RecordId) -> crate::Result<QueueRecord> {
        self.read_record(id).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_due_batch(
        &self,
        now: SystemTime,
        limit: usize,
    ) -> crate::Result<Vec<QueueRecord>> {
        let due = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| record.is_due(now))
            .collect();

        Ok(into_batch(due, limit))
    }

    #[tracing::instrument(level = "debug", skip(self, now), fields(record_id = %id))]
    async fn claim(&self, id: &RecordId, now: SystemTime) -> crate::Result<bool> {
        let _guard = self.lock.lock().await;

        let mut record = self.read_record(id).await?;
        if !record.try_claim(now) {
            return Ok(false);
        }

        self.write_record(&record).await?;
        Ok(true)
    }

    #[tracing::instrument(level = "debug", skip(self, update), fields(record_id = %id))]
    async fn update(&self, id: &RecordId, update: &RecordUpdate) -> crate::Result<()> {
        let _guard = self.lock.lock().await;

        let mut record = self.read_record(id).await?;
        update.apply(&mut record)?;
        self.write_record(&record).await
    }

    async fn count(&self, status: Option<QueueStatus>) -> crate::Result<usize> {
        Ok(self
            .read_all()
            .await?
            .iter()
            .filter(|record| status.is_none_or(|status| record.status == status))
            .count())
    }

    async fn list(&self, status: Option<QueueStatus>) -> crate::Result<Vec<QueueRecord>> {
        let mut records: Vec<_> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| status.is_none_or(|status| record.status == status))
            .collect();

        records.sort_by_key(|record| record.id);
        Ok(records)
    }

    async fn requeue_stale(&self, cutoff: SystemTime) -> crate::Result<Vec<RecordId>> {
        let _guard = self.lock.lock().await;
        let mut released = Vec::new();

        for mut record in self.read_all().await? {
            if record.release_if_stale(cutoff) {
                self.write_record(&record).await?;
                released.push(record.id);
            }
        }

        released.sort();
        Ok(released)
    }
}

/// Builder for `FileQueueStore`
#[derive(Debug, Default)]
pub struct FileQueueStoreBuilder {
    path: PathBuf,
}

impl FileQueueStoreBuilder {
    /// Set the queue directory path
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileQueueStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileQueueStore, PathError> {
        FileQueueStore::validate_path(&self.path)?;
        Ok(FileQueueStore {
            path: self.path,
            lock: Arc::default(),
        })
    }
}
