use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::PublishError,
    models::live_status::{
        LiveStatusAttributes, LiveStatusContent, LiveStatusHandle, LiveStatusRecord,
    },
};

/// The single external place where the active trip is shown.
#[async_trait]
pub trait LiveStatusSurface: Send + Sync {
    /// Whether the user currently allows live status records at all.
    fn is_enabled(&self) -> bool;

    async fn create(
        &self,
        attributes: LiveStatusAttributes,
        content: LiveStatusContent,
    ) -> Result<LiveStatusHandle, PublishError>;

    async fn update(
        &self,
        handle: &LiveStatusHandle,
        content: LiveStatusContent,
    ) -> Result<(), PublishError>;

    /// Dismisses the record immediately.
    async fn end(&self, handle: LiveStatusHandle) -> Result<(), PublishError>;
}

/// Keeps the live status record as a JSON document on disk, for widgets and
/// status bars to pick up. The file exists only while a record is active.
#[derive(Clone)]
pub struct FileLiveStatus {
    path: Arc<PathBuf>,
    enabled: Arc<AtomicBool>,
}

impl FileLiveStatus {
    pub fn new(path: PathBuf, enabled: bool) -> Self {
        Self {
            path: Arc::new(path),
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub async fn current(&self) -> Result<Option<LiveStatusRecord>, PublishError> {
        if !fs::try_exists(self.path()).await? {
            return Ok(None);
        }
        let raw = fs::read(self.path()).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Removes a record left on disk by an earlier run. No handle to it
    /// survives a restart, so it could otherwise never be ended and every
    /// later `create` would be denied.
    pub async fn discard_orphan(&self) -> Result<Option<LiveStatusRecord>, PublishError> {
        let orphan = match self.current().await {
            Ok(None) => return Ok(None),
            Ok(Some(record)) => Some(record),
            Err(PublishError::Encode(err)) => {
                warn!("unreadable live status file: {err}");
                None
            }
            Err(err) => return Err(err),
        };
        fs::remove_file(self.path()).await?;
        match &orphan {
            Some(record) => warn!(
                handle = %record.handle.0,
                destination = %record.attributes.destination_name,
                "discarded live status left by a previous run"
            ),
            None => warn!("discarded unreadable live status file"),
        }
        Ok(orphan)
    }

    async fn write(&self, record: &LiveStatusRecord) -> Result<(), PublishError> {
        if let Some(parent) = self.path().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_vec_pretty(record)?;
        fs::write(self.path(), data).await?;
        Ok(())
    }

    async fn require(&self, handle: &LiveStatusHandle) -> Result<LiveStatusRecord, PublishError> {
        match self.current().await? {
            Some(record) if &record.handle == handle => Ok(record),
            _ => Err(PublishError::UnknownHandle),
        }
    }
}

#[async_trait]
impl LiveStatusSurface for FileLiveStatus {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn create(
        &self,
        attributes: LiveStatusAttributes,
        content: LiveStatusContent,
    ) -> Result<LiveStatusHandle, PublishError> {
        if !self.is_enabled() {
            return Err(PublishError::Disabled);
        }
        if let Some(existing) = self.current().await? {
            return Err(PublishError::CreationDenied(format!(
                "record {} for {} is still active",
                existing.handle.0, existing.attributes.destination_name
            )));
        }
        let handle = LiveStatusHandle(Uuid::new_v4().to_string());
        let record = LiveStatusRecord {
            handle: handle.clone(),
            attributes,
            content,
        };
        self.write(&record).await?;
        info!(
            handle = %handle.0,
            destination = %record.attributes.destination_name,
            "live status created"
        );
        Ok(handle)
    }

    async fn update(
        &self,
        handle: &LiveStatusHandle,
        content: LiveStatusContent,
    ) -> Result<(), PublishError> {
        let mut record = self.require(handle).await?;
        record.content = content;
        self.write(&record).await?;
        debug!(handle = %handle.0, "live status updated");
        Ok(())
    }

    async fn end(&self, handle: LiveStatusHandle) -> Result<(), PublishError> {
        self.require(&handle).await?;
        fs::remove_file(self.path()).await?;
        info!(handle = %handle.0, "live status ended");
        Ok(())
    }
}
