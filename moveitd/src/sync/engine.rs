use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;

use super::local_index::{LocalFileIndex, LocalIndexError};
use super::local_watcher::LocalEvent;
use super::locks::{ActionClaims, ClaimKind, NameLocks};
use super::paths::{PathError, name_in_root};
use super::remote::{AuthError, AuthProvider, RemoteError, RemoteFile, RemoteSnapshot, RemoteStore};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("local error: {0}")]
    Local(#[from] LocalIndexError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("action limiter is closed")]
    LimiterClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Upload skipped: the remote already has a file with this name.
    AlreadyRemote,
    /// Download skipped: the file already exists locally.
    AlreadyLocal,
    /// Delete skipped: the target is already gone.
    AlreadyAbsent,
    /// Upload skipped: the local file vanished before it could be sent.
    LocalMissing,
    /// Remote delete skipped: the file was re-created locally.
    LocalPresent,
    /// Local delete skipped: an upload for the name is pending or just landed.
    PendingUpload,
    /// Download skipped: a remote delete for the name is pending or just landed.
    PendingDelete,
    /// Local delete skipped: the file was written after the cycle started.
    RecentlyChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Uploaded,
    Downloaded,
    DeletedRemote,
    DeletedLocal,
    Skipped(SkipReason),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub remote_total: usize,
    pub downloaded: Vec<String>,
    pub local_only: Vec<String>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncDelta {
    pub downloaded: usize,
    pub deleted_local: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncDelta {
    pub fn is_empty(&self) -> bool {
        *self == SyncDelta::default()
    }
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    local: LocalFileIndex,
    locks: NameLocks,
    claims: Arc<ActionClaims>,
    action_limit: Semaphore,
}

impl SyncEngine {
    pub fn new(
        config: &SessionConfig,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let local = LocalFileIndex::new(config.sync_dir.clone());
        let action_limit = Semaphore::new(config.max_concurrent_actions.max(1));
        Self {
            remote,
            auth,
            local,
            locks: NameLocks::default(),
            claims: Arc::new(ActionClaims::default()),
            action_limit,
        }
    }

    pub fn local(&self) -> &LocalFileIndex {
        &self.local
    }

    /// Startup pass: pulls down every remote-only file. Local-only files are
    /// reported but not uploaded. Any listing or download failure is returned.
    pub async fn initial_reconcile(&self) -> Result<ReconcileReport, EngineError> {
        info!(sync_dir = %self.local.root().display(), "initial reconciliation started");
        let token = self.auth.token().await?;
        let snapshot = self.snapshot(&token).await?;
        let mut report = ReconcileReport {
            remote_total: snapshot.len(),
            ..ReconcileReport::default()
        };

        for file in snapshot.files() {
            if let Err(err) = self.local.path_for(&file.name) {
                warn!(name = %file.name, error = %err, "skipping remote file with unusable name");
                report.rejected.push(file.name.clone());
                continue;
            }
            if self.download_if_absent(&token, file, None).await? == ActionOutcome::Downloaded {
                report.downloaded.push(file.name.clone());
            }
        }

        for name in self.local.list_names()? {
            if !snapshot.contains(&name) {
                info!(name = %name, "local file has no remote copy");
                report.local_only.push(name);
            }
        }

        info!(
            remote = report.remote_total,
            downloaded = report.downloaded.len(),
            local_only = report.local_only.len(),
            "initial reconciliation finished"
        );
        Ok(report)
    }

    /// One poll cycle over a single remote snapshot: download pass first,
    /// then removal of local files the snapshot does not know about.
    ///
    /// Listing or token failures abort the cycle. A failing transfer only
    /// counts as `failed` and the cycle goes on.
    pub async fn poll_once(&self) -> Result<SyncDelta, EngineError> {
        let started = SystemTime::now();
        let epoch = self.claims.begin_snapshot();
        let token = self.auth.token().await?;
        let snapshot = self.snapshot(&token).await?;
        let mut delta = SyncDelta::default();

        for file in snapshot.files() {
            if self.local.path_for(&file.name).is_err() {
                debug!(name = %file.name, "ignoring remote file with unusable name");
                continue;
            }
            if self.local.contains(&file.name) {
                continue;
            }
            match self.download_if_absent(&token, file, Some(epoch)).await {
                Ok(ActionOutcome::Downloaded) => delta.downloaded += 1,
                Ok(_) => delta.skipped += 1,
                Err(err) => {
                    error!(name = %file.name, error = %err, "download failed");
                    delta.failed += 1;
                }
            }
        }

        for name in self.local.list_names()? {
            if snapshot.contains(&name) {
                continue;
            }
            match self.delete_local_if_unclaimed(&name, epoch, started).await {
                Ok(ActionOutcome::DeletedLocal) => delta.deleted_local += 1,
                Ok(_) => delta.skipped += 1,
                Err(err) => {
                    error!(name = %name, error = %err, "local delete failed");
                    delta.failed += 1;
                }
            }
        }

        self.claims.prune(epoch);
        Ok(delta)
    }

    /// Registers the event and runs its handler as an independent task.
    ///
    /// The name is claimed before the task is spawned, so a poll cycle
    /// starting in between neither deletes a new file as orphaned nor
    /// downloads a deleted one back.
    pub fn dispatch_local_event(self: &Arc<Self>, event: LocalEvent, tracker: &TaskTracker) {
        let claim = name_in_root(self.local.root(), event.path())
            .ok()
            .map(|name| self.claims.claim(claim_kind(&event), &name));
        let engine = Arc::clone(self);
        tracker.spawn(async move {
            engine.handle_local_event(event).await;
            drop(claim);
        });
    }

    pub async fn handle_local_event(&self, event: LocalEvent) {
        match self.process_local_event(&event).await {
            Ok(outcome) => debug!(event = ?event, outcome = ?outcome, "local event handled"),
            Err(err) => error!(
                path = %event.path().display(),
                error = %err,
                "local event failed"
            ),
        }
    }

    pub async fn process_local_event(&self, event: &LocalEvent) -> Result<ActionOutcome, EngineError> {
        let name = name_in_root(self.local.root(), event.path())?;
        let _claim = self.claims.claim(claim_kind(event), &name);
        match event {
            LocalEvent::Created(_) => self.upload_if_absent(&name).await,
            LocalEvent::Deleted(_) => self.delete_remote_if_present(&name).await,
        }
    }

    pub async fn upload_if_absent(&self, name: &str) -> Result<ActionOutcome, EngineError> {
        let _guard = self.locks.lock(name).await;
        let source = self.local.path_for(name)?;
        if !self.local.contains(name) {
            debug!(name = %name, "local file vanished before upload");
            return Ok(ActionOutcome::Skipped(SkipReason::LocalMissing));
        }
        let _permit = self.permit().await?;

        let token = self.auth.token().await?;
        let container_id = self.remote.home_container_id(&token).await?;
        let snapshot = self.snapshot(&token).await?;
        if snapshot.contains(name) {
            info!(name = %name, "remote already has file, upload skipped");
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyRemote));
        }

        self.remote.upload(&token, &container_id, &source).await?;
        info!(name = %name, container = %container_id, "uploaded");
        Ok(ActionOutcome::Uploaded)
    }

    pub async fn delete_remote_if_present(&self, name: &str) -> Result<ActionOutcome, EngineError> {
        let _guard = self.locks.lock(name).await;
        if self.local.contains(name) {
            debug!(name = %name, "file exists locally again, remote delete skipped");
            return Ok(ActionOutcome::Skipped(SkipReason::LocalPresent));
        }
        let _permit = self.permit().await?;

        let token = self.auth.token().await?;
        let snapshot = self.snapshot(&token).await?;
        let Some(file) = snapshot.find(name) else {
            warn!(name = %name, "deleted file not found on remote");
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyAbsent));
        };

        match self.remote.delete(&token, &file.id).await {
            Ok(()) => {
                info!(name = %name, id = %file.id, "deleted from remote");
                Ok(ActionOutcome::DeletedRemote)
            }
            Err(RemoteError::NotFound(_)) => {
                warn!(name = %name, id = %file.id, "remote file already gone");
                Ok(ActionOutcome::Skipped(SkipReason::AlreadyAbsent))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn listings(&self) -> Result<(BTreeSet<String>, RemoteSnapshot), EngineError> {
        let token = self.auth.token().await?;
        let snapshot = self.snapshot(&token).await?;
        Ok((self.local.list_names()?, snapshot))
    }

    /// `epoch` is the poll cycle's snapshot epoch; `None` during the
    /// initial reconciliation, before any local event exists.
    async fn download_if_absent(
        &self,
        token: &str,
        file: &RemoteFile,
        epoch: Option<u64>,
    ) -> Result<ActionOutcome, EngineError> {
        let _guard = self.locks.lock(&file.name).await;
        if self.local.contains(&file.name) {
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyLocal));
        }
        if epoch.is_some_and(|epoch| self.claims.protects(ClaimKind::Delete, &file.name, epoch)) {
            debug!(name = %file.name, "remote delete pending, download skipped");
            return Ok(ActionOutcome::Skipped(SkipReason::PendingDelete));
        }
        let _permit = self.permit().await?;

        let bytes = match self.remote.download(token, &file.id).await {
            Ok(bytes) => bytes,
            Err(RemoteError::NotFound(_)) => {
                warn!(name = %file.name, id = %file.id, "remote file vanished before download");
                return Ok(ActionOutcome::Skipped(SkipReason::AlreadyAbsent));
            }
            Err(err) => return Err(err.into()),
        };
        if !self.local.write_atomic(&file.name, &bytes).await? {
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyLocal));
        }
        info!(name = %file.name, bytes = bytes.len(), "downloaded");
        Ok(ActionOutcome::Downloaded)
    }

    async fn delete_local_if_unclaimed(
        &self,
        name: &str,
        epoch: u64,
        started: SystemTime,
    ) -> Result<ActionOutcome, EngineError> {
        let _guard = self.locks.lock(name).await;
        if self.claims.protects(ClaimKind::Upload, name, epoch) {
            debug!(name = %name, "local file has a pending upload, kept");
            return Ok(ActionOutcome::Skipped(SkipReason::PendingUpload));
        }
        // Not in the snapshot, and its Created event may not be dispatched yet.
        if self.local.changed_since(name, started)? {
            debug!(name = %name, "local file written during this cycle, kept");
            return Ok(ActionOutcome::Skipped(SkipReason::RecentlyChanged));
        }
        let _permit = self.permit().await?;

        if self.local.remove(name).await? {
            info!(name = %name, "deleted local file missing from remote");
            Ok(ActionOutcome::DeletedLocal)
        } else {
            Ok(ActionOutcome::Skipped(SkipReason::AlreadyAbsent))
        }
    }

    async fn snapshot(&self, token: &str) -> Result<RemoteSnapshot, EngineError> {
        Ok(RemoteSnapshot::new(self.remote.list(token).await?))
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>, EngineError> {
        self.action_limit
            .acquire()
            .await
            .map_err(|_| EngineError::LimiterClosed)
    }
}

fn claim_kind(event: &LocalEvent) -> ClaimKind {
    match event {
        LocalEvent::Created(_) => ClaimKind::Upload,
        LocalEvent::Deleted(_) => ClaimKind::Delete,
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
