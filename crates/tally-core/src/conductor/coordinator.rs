//! Command loop driving a [`SyncConductor`].
//!
//! A single task owns the autosave timer and the conflict-check ticker and
//! consumes [`SyncCommand`]s from a bounded channel. Network operations are
//! spawned onto a `JoinSet` so commands keep flowing while they run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

use super::{ConflictResolution, SyncConductor, SyncError, SyncStatus};
use crate::autosave::{AutosaveDecision, AutosaveGate, AutosaveScheduler, SaveReason};
use crate::records::ChangeObserver;

const MIN_CHECK_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    DataChanged,
    /// The host lost focus.
    Blur,
    SetOnline(bool),
    Connect,
    Disconnect,
    SaveRequested,
    CheckRemote,
    ResolveConflict(ConflictResolution),
    Shutdown,
}

/// Sender side of the coordinator. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    conductor: Arc<SyncConductor>,
}

impl SyncHandle {
    pub async fn send(&self, command: SyncCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::CoordinatorStopped)
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.conductor.subscribe()
    }

    pub fn conductor(&self) -> &Arc<SyncConductor> {
        &self.conductor
    }
}

impl ChangeObserver for SyncHandle {
    fn records_changed(&self, collection: &str) {
        if let Err(error) = self.conductor.mark_dirty() {
            tracing::error!("Failed to persist dirty flag after {} changed: {}", collection, error);
        }
        match self.commands.try_send(SyncCommand::DataChanged) {
            Ok(()) => {}
            // The dirty flag is already set; a queued DataChanged restarts the timer anyway.
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Command queue full; dropped change notice for {}", collection);
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Coordinator stopped; change to {} only marked dirty", collection);
            }
        }
    }
}

pub struct SyncCoordinator {
    conductor: Arc<SyncConductor>,
    commands: mpsc::Receiver<SyncCommand>,
    scheduler: AutosaveScheduler,
    tasks: JoinSet<()>,
}

impl SyncCoordinator {
    /// Start the command loop on the current runtime.
    pub fn spawn(conductor: Arc<SyncConductor>) -> (SyncHandle, JoinHandle<()>) {
        let capacity = conductor.config().command_channel_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let coordinator = Self {
            scheduler: AutosaveScheduler::from_config(conductor.config()),
            conductor: Arc::clone(&conductor),
            commands: receiver,
            tasks: JoinSet::new(),
        };
        let handle = SyncHandle {
            commands: sender,
            conductor,
        };
        (handle, tokio::spawn(coordinator.run()))
    }

    async fn run(mut self) {
        let period = self
            .conductor
            .config()
            .conflict_check_interval()
            .max(MIN_CHECK_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Sync coordinator started for workspace {}",
            self.conductor.workspace().id
        );

        loop {
            let deadline = self.scheduler.deadline();
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(SyncCommand::Shutdown) | None => break,
                        Some(command) => self.handle(command),
                    }
                }
                () = sleep_until(deadline) => {
                    if let Some(reason) = self.scheduler.take_due(Instant::now()) {
                        self.attempt(reason);
                    }
                }
                _ = ticker.tick() => {
                    if self.conductor.is_connected() {
                        self.check_remote();
                    }
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(error) = joined {
                        tracing::error!("Sync task failed: {}", error);
                    }
                }
            }
        }

        self.conductor.shutdown();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!("Sync task failed during shutdown: {}", error);
            }
        }
        tracing::info!(
            "Sync coordinator stopped for workspace {}",
            self.conductor.workspace().id
        );
    }

    fn handle(&mut self, command: SyncCommand) {
        tracing::debug!("Sync command: {:?}", command);
        match command {
            SyncCommand::DataChanged => self.scheduler.on_data_changed(Instant::now()),
            SyncCommand::Blur => {
                let reason = self.scheduler.on_blur();
                self.attempt(reason);
            }
            SyncCommand::SetOnline(online) => {
                self.conductor.set_online(online);
                if online && self.conductor.is_dirty() {
                    self.attempt(SaveReason::Reconnect);
                }
            }
            SyncCommand::Connect => self.spawn_logged("connect", |conductor| async move {
                conductor.connect().await.map(|report| {
                    if let Err(error) = report.check {
                        tracing::warn!("Conflict check after connect failed: {}", error);
                    }
                })
            }),
            SyncCommand::Disconnect => {
                self.scheduler.cancel_idle();
                self.conductor.disconnect();
            }
            SyncCommand::SaveRequested => {
                self.scheduler.cancel_idle();
                self.save(SaveReason::Manual);
            }
            SyncCommand::CheckRemote => self.check_remote(),
            SyncCommand::ResolveConflict(resolution) => {
                self.spawn_logged("conflict resolution", move |conductor| async move {
                    conductor.resolve_conflict(resolution).await.map(|_| ())
                });
            }
            SyncCommand::Shutdown => {}
        }
    }

    fn attempt(&mut self, reason: SaveReason) {
        match self
            .scheduler
            .evaluate(reason, self.conductor.as_ref(), Utc::now())
        {
            AutosaveDecision::Attempt(reason) => self.save(reason),
            AutosaveDecision::Skip(_) => {}
        }
    }

    fn save(&mut self, reason: SaveReason) {
        self.spawn_logged("save", move |conductor| async move {
            conductor.save_now(reason).await.map(|_| ())
        });
    }

    fn check_remote(&mut self) {
        self.spawn_logged("conflict check", |conductor| async move {
            conductor.check_remote().await.map(|_| ())
        });
    }

    /// Errors already reached the status channel; only log them here.
    fn spawn_logged<F, Fut>(&mut self, operation: &'static str, task: F)
    where
        F: FnOnce(Arc<SyncConductor>) -> Fut,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let future = task(Arc::clone(&self.conductor));
        self.tasks.spawn(async move {
            match future.await {
                Ok(()) => {}
                Err(error) if error.is_aborted() => {
                    tracing::info!("Sync {} cancelled", operation);
                }
                Err(error) => tracing::warn!("Sync {} failed: {}", operation, error),
            }
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
