use std::sync::Arc;

use chrono::Utc;
use tally_core::autosave::{SaveReason, SkipReason};
use tally_core::conductor::{
    ConflictCheck, ConflictResolution, ConnectReport, Resolution, RestoreConfirmation,
    SaveOutcome, SyncCommand, SyncCoordinator, SyncError, SyncStatus,
};
use tally_core::remote::RemoteBlob;
use tally_core::restore::RestoreReport;
use tokio_util::sync::CancellationToken;

use crate::cli::ResolveStrategy;
use crate::commands::common::{
    backup_to_item, format_backup_lines, format_status_lines, format_timestamp, open_engine,
    select_backup, BackupItem, Context, Engine, StatusView,
};
use crate::error::CliError;

pub async fn run_status(ctx: &Context, json: bool) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let connect_error = match engine.conductor.connect().await {
        Ok(report) => report.check.err(),
        Err(error) => Some(error),
    };
    if let Some(error) = &connect_error {
        tracing::debug!("Status without remote: {}", error);
    }

    let status = engine.conductor.status();
    let state = engine.conductor.sync_state();
    if json {
        let view = StatusView {
            workspace: &engine.name,
            db_path: &engine.db_path,
            state,
            status: &status,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    for line in format_status_lines(&engine.name, &state, &status) {
        println!("{line}");
    }
    if let Some(error) = connect_error {
        if status.message.is_none() {
            println!("Remote:      {error}");
        }
    }
    Ok(())
}

pub async fn run_save(ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let report = engine.conductor.connect().await?;
    settle_connect_check(report)?;

    match engine.conductor.save_now(SaveReason::Manual).await? {
        SaveOutcome::Saved(report) => {
            println!(
                "Saved {} records as {} ({})",
                report.total_records(),
                report.manifest_name,
                format_timestamp(report.synced_at)
            );
            Ok(())
        }
        SaveOutcome::Skipped(SkipReason::ConflictPending) => Err(CliError::UnresolvedConflict),
        SaveOutcome::Skipped(reason) => Err(SyncError::Skipped(reason).into()),
    }
}

pub async fn run_backups(ctx: &Context, limit: usize, json: bool) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let mut backups = engine.conductor.list_backups().await?;
    backups.truncate(limit);

    if json {
        let items = backups.iter().map(backup_to_item).collect::<Vec<BackupItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if backups.is_empty() {
        println!("No backups for workspace '{}'.", engine.name);
    } else {
        for line in format_backup_lines(&backups, Utc::now()) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_restore(ctx: &Context, backup: Option<&str>, yes: bool) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let backups = engine.conductor.list_backups().await?;
    let manifest = select_backup(&backups, backup)?;
    if !yes {
        println!(
            "Backup {} from {} would replace every local record in workspace '{}'.",
            manifest.name,
            format_timestamp(manifest.modified_time),
            engine.name
        );
        return Err(CliError::RestoreNotConfirmed);
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    let progress = tokio::spawn(print_restore_progress(engine.conductor.subscribe()));

    let confirmation = RestoreConfirmation::acknowledge_data_loss(&manifest);
    let result = engine
        .conductor
        .restore(&manifest, confirmation, cancel)
        .await;
    interrupt.abort();
    progress.abort();

    match result {
        Ok(report) => {
            print_restore_report(&report);
            if engine.conductor.sync_state().dirty {
                println!("This is not the newest backup; run `tally save` to make it the latest.");
            }
            Ok(())
        }
        Err(error) if error.is_aborted() => {
            println!("{}", restore_cancelled_message(&manifest));
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

pub async fn run_sync(ctx: &Context, resolve: Option<ResolveStrategy>) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let report = engine.conductor.connect().await?;
    println!("Connected as {}", report.account.label());

    match report.check? {
        ConflictCheck::Conflict(conflict) => {
            let Some(strategy) = resolve else {
                println!(
                    "Remote backup {} ({}) is newer than your unsaved local edits.",
                    conflict.remote_name,
                    format_timestamp(conflict.remote_timestamp)
                );
                return Err(CliError::UnresolvedConflict);
            };
            let resolution = match strategy {
                ResolveStrategy::Pull => ConflictResolution::Pull,
                ResolveStrategy::Push => ConflictResolution::Push,
            };
            match engine.conductor.resolve_conflict(resolution).await? {
                Resolution::Pulled(report) => print_restore_report(&report),
                Resolution::Pushed(report) => println!(
                    "Overwrote remote with {} local records as {}",
                    report.total_records(),
                    report.manifest_name
                ),
            }
        }
        ConflictCheck::Pulled(report) => print_restore_report(&report),
        ConflictCheck::Deferred => println!("Another sync operation is running; try again shortly."),
        ConflictCheck::UpToDate => {
            if engine.conductor.sync_state().dirty {
                save_pending(&engine).await?;
            } else {
                println!("Already up to date.");
            }
        }
    }
    Ok(())
}

pub async fn run_watch(ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let (handle, coordinator) = SyncCoordinator::spawn(Arc::clone(&engine.conductor));
    engine.records.register(Arc::new(handle.clone()));
    let mut status = handle.subscribe();

    handle.send(SyncCommand::SetOnline(true)).await?;
    handle.send(SyncCommand::Connect).await?;
    println!("Watching workspace '{}'. Press Ctrl-C to stop.", engine.name);

    let mut last_line = String::new();
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = watch_line(&status.borrow_and_update());
                if line != last_line {
                    println!("[{}] {line}", Utc::now().format("%H:%M:%S"));
                    last_line = line;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    // A blur flushes pending edits before the loop stops.
    handle.send(SyncCommand::Blur).await?;
    handle.send(SyncCommand::Shutdown).await?;
    if let Err(error) = coordinator.await {
        tracing::error!("Sync coordinator panicked: {}", error);
    }
    Ok(())
}

async fn save_pending(engine: &Engine) -> Result<(), CliError> {
    match engine.conductor.save_now(SaveReason::Manual).await? {
        SaveOutcome::Saved(report) => {
            println!(
                "Saved {} records as {}",
                report.total_records(),
                report.manifest_name
            );
            Ok(())
        }
        SaveOutcome::Skipped(reason) => Err(SyncError::Skipped(reason).into()),
    }
}

fn settle_connect_check(report: ConnectReport) -> Result<(), CliError> {
    match report.check? {
        ConflictCheck::Conflict(_) => Err(CliError::UnresolvedConflict),
        ConflictCheck::Pulled(restored) => {
            print_restore_report(&restored);
            Ok(())
        }
        ConflictCheck::UpToDate | ConflictCheck::Deferred => Ok(()),
    }
}

async fn print_restore_progress(mut status: tokio::sync::watch::Receiver<SyncStatus>) {
    let mut last_percent = None;
    while status.changed().await.is_ok() {
        let progress = status.borrow_and_update().restore_progress.clone();
        if let Some(progress) = progress {
            if last_percent != Some(progress.percent) {
                last_percent = Some(progress.percent);
                println!("[{:>3}%] {}", progress.percent, progress.message);
            }
        }
    }
}

fn print_restore_report(report: &RestoreReport) {
    println!(
        "Restored {} records from {}",
        report.total_records(),
        report.manifest_name
    );
    for collection in &report.collections {
        println!("  {:<16} {}", collection.collection, collection.imported);
    }
    if report.skipped_lines > 0 {
        println!("Skipped {} unreadable lines", report.skipped_lines);
    }
}

/// Collections replaced before the cancel stay replaced.
pub fn restore_cancelled_message(manifest: &RemoteBlob) -> String {
    format!(
        "Restore of {} was cancelled; local records may be incomplete. \
         Run `tally restore --backup {} --yes` again to finish it.",
        manifest.name, manifest.id
    )
}

pub fn watch_line(status: &SyncStatus) -> String {
    let mut line = format!(
        "{:?}{}{}",
        status.connection,
        if status.dirty { ", unsaved changes" } else { "" },
        if status.conflict.is_some() {
            ", conflict pending"
        } else {
            ""
        }
    );
    if let Some(message) = &status.message {
        line.push_str(" - ");
        line.push_str(&message.text);
    }
    line
}
