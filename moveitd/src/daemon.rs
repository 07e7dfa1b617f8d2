use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use moveit_core::{MoveitClient, TokenClient};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::sync::engine::{ReconcileReport, SyncDelta, SyncEngine};
use crate::sync::local_watcher::{LocalEvent, start_notify_watcher};
use crate::sync::remote::{MoveitRemote, RemoteSnapshot};
use crate::token_provider::PasswordTokenProvider;

const WATCHER_RETRY_DELAY: Duration = Duration::from_secs(5);

pub struct DaemonRuntime {
    config: SessionConfig,
    engine: Arc<SyncEngine>,
}

impl DaemonRuntime {
    /// Validates the session, wires the HTTP clients into a sync engine and
    /// clears partial downloads left by an earlier run. Nothing is synced yet.
    pub async fn bootstrap(config: SessionConfig) -> anyhow::Result<Self> {
        let config = config.validate().context("invalid sync directory")?;
        let client = MoveitClient::new(&config.base_url)
            .with_context(|| format!("invalid base URL {}", config.base_url))?;
        let tokens = TokenClient::new(&config.base_url)
            .with_context(|| format!("invalid base URL {}", config.base_url))?;

        let remote = Arc::new(MoveitRemote::new(client, config.list_page_size));
        let auth = Arc::new(PasswordTokenProvider::new(
            tokens,
            config.credentials.clone(),
        ));
        let engine = Arc::new(SyncEngine::new(&config, remote, auth));

        let removed = engine
            .local()
            .clean_partials()
            .await
            .context("failed to clean partial downloads")?;
        if removed > 0 {
            info!(removed, "removed partial downloads from an earlier run");
        }

        Ok(Self { config, engine })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        self.engine
            .initial_reconcile()
            .await
            .context("initial reconciliation failed")
    }

    /// Initial reconciliation followed by exactly one poll cycle.
    pub async fn run_once(self) -> anyhow::Result<SyncDelta> {
        self.reconcile().await?;
        let delta = self.engine.poll_once().await.context("poll cycle failed")?;
        log_delta(&delta);
        Ok(delta)
    }

    pub async fn listing(&self) -> anyhow::Result<String> {
        let (local, remote) = self
            .engine
            .listings()
            .await
            .context("failed to list files")?;
        Ok(format_listing(&local, &remote))
    }

    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Reconciles, then syncs from the watcher and the poller until
    /// `shutdown` resolves. In-flight event handlers are drained before
    /// returning.
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        self.reconcile().await?;

        let sync_dir = self.config.sync_dir.clone();
        let watch = start_notify_watcher(&sync_dir).with_context(|| {
            format!("failed to watch sync directory {}", sync_dir.display())
        })?;
        info!(
            sync_dir = %self.config.sync_dir.display(),
            base_url = %self.config.base_url,
            poll_secs = self.config.poll_interval.as_secs(),
            "started"
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let poll_handle = tokio::spawn(run_poll_loop(
            Arc::clone(&self.engine),
            self.config.poll_interval,
            cancel.clone(),
        ));
        let event_handle = tokio::spawn(run_event_loop(
            Arc::clone(&self.engine),
            watch,
            move || start_notify_watcher(&sync_dir),
            tracker.clone(),
            cancel.clone(),
        ));

        let waited = shutdown.await;
        info!("shutting down");
        cancel.cancel();

        if let Err(err) = poll_handle.await {
            error!(error = %err, "poll loop panicked");
        }
        if let Err(err) = event_handle.await {
            error!(error = %err, "event loop panicked");
        }
        tracker.close();
        tracker.wait().await;
        info!("stopped");

        waited.context("failed waiting for shutdown signal")
    }
}

async fn run_poll_loop(engine: Arc<SyncEngine>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match engine.poll_once().await {
            Ok(delta) => log_delta(&delta),
            Err(err) => error!(error = %err, "poll cycle failed, retrying next interval"),
        }
    }
    debug!("poll loop stopped");
}

type LocalWatch<W> = (W, mpsc::UnboundedReceiver<LocalEvent>);

/// Dispatches watcher events until cancelled. The loop owns the watcher; when
/// its channel closes, `restart` is called until a new watcher is running.
async fn run_event_loop<W, S>(
    engine: Arc<SyncEngine>,
    watch: LocalWatch<W>,
    mut restart: S,
    tracker: TaskTracker,
    cancel: CancellationToken,
) where
    W: Send,
    S: FnMut() -> notify::Result<LocalWatch<W>> + Send,
{
    let (mut watcher, mut events) = watch;
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            error!("local watcher stopped, restarting");
            let Some(restarted) = restart_watcher(&mut restart, &cancel).await else {
                break;
            };
            (watcher, events) = restarted;
            continue;
        };
        debug!(event = ?event, "local event");
        engine.dispatch_local_event(event, &tracker);
    }
    drop(watcher);
    debug!("event loop stopped");
}

async fn restart_watcher<W, S>(restart: &mut S, cancel: &CancellationToken) -> Option<LocalWatch<W>>
where
    S: FnMut() -> notify::Result<LocalWatch<W>>,
{
    loop {
        match restart() {
            Ok(watch) => {
                info!("local watcher restarted");
                return Some(watch);
            }
            Err(err) => error!(error = %err, "failed to restart local watcher"),
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(WATCHER_RETRY_DELAY) => {}
        }
    }
}

fn log_delta(delta: &SyncDelta) {
    if delta.is_empty() {
        debug!("poll cycle: no changes");
        return;
    }
    info!(
        downloaded = delta.downloaded,
        deleted_local = delta.deleted_local,
        skipped = delta.skipped,
        failed = delta.failed,
        "poll cycle finished"
    );
}

pub fn format_listing(local: &BTreeSet<String>, remote: &RemoteSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "local ({}):", local.len());
    for name in local {
        let _ = writeln!(out, "  {name}");
    }
    let _ = writeln!(out, "remote ({}):", remote.len());
    for file in remote.files() {
        let _ = writeln!(out, "  {} [{}]", file.name, file.id);
    }
    out
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
