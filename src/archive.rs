//! Mailbox backup to and restore from a gzip-compressed tar archive
//!
//! Every message is stored as `<folder>/<uid>.eml` holding the exact raw
//! bytes fetched from the server. There is no manifest; the folder layout is
//! recovered from entry paths alone.
//!
//! The tar and gzip codecs are blocking, so they run on a blocking thread and
//! exchange entries with the async session through a bounded channel. Neither
//! side ever holds more than a handful of messages in memory.

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::MailboxService;
use crate::error::{CleanupError, Result};
use crate::models::{ArchiveEntry, FetchItems, FolderRef, SearchCriteria};

/// Entries in flight between the session and the codec thread
const CHANNEL_CAPACITY: usize = 32;

const ENTRY_MODE: u32 = 0o600;

fn archive_io(e: impl std::fmt::Display) -> CleanupError {
    CleanupError::ArchiveIoError(e.to_string())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupProgress {
    /// Folders attempted so far, including empty and skipped ones
    pub visited: usize,
    /// Folders that contributed at least one message
    pub folders: usize,
    pub messages: usize,
}

#[derive(Debug, Default)]
pub struct BackupReport {
    /// Folders that contributed at least one message
    pub folders: usize,
    pub messages: usize,
    /// (folder, reason)
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: usize,
    pub folders_created: usize,
    /// (entry path, reason)
    pub failed: Vec<(String, String)>,
}

/// Write every message of `folders` into a new archive at `path`.
///
/// Folders that cannot be read are skipped and reported; only failures of
/// the archive file itself abort the backup.
pub async fn backup<S, F>(
    service: &mut S,
    folders: &[FolderRef],
    path: &Path,
    mut on_progress: F,
) -> Result<BackupReport>
where
    S: MailboxService + ?Sized,
    F: FnMut(BackupProgress),
{
    let file = File::create(path)
        .map_err(|e| CleanupError::ArchiveIoError(format!("{}: {}", path.display(), e)))?;

    let (tx, rx) = mpsc::channel::<ArchiveEntry>(CHANNEL_CAPACITY);
    let writer = tokio::task::spawn_blocking(move || write_archive(file, rx));

    let mut report = BackupReport::default();
    let mut visited = 0;
    info!("Backing up {} folders to {}", folders.len(), path.display());

    for folder in folders {
        let outcome =
            backup_folder(service, &folder.name, &tx, &mut report, visited, &mut on_progress).await;
        match outcome {
            Ok(count) => debug!("{}: archived {} messages", folder.name, count),
            Err(CleanupError::ArchiveIoError(reason)) => {
                // The writer is gone; its own error explains why
                debug!("Archive writer stopped: {}", reason);
                break;
            }
            Err(e) => {
                warn!("Skipping folder {}: {}", folder.name, e);
                report.skipped.push((folder.name.clone(), e.to_string()));
            }
        }
        visited += 1;
        on_progress(BackupProgress {
            visited,
            folders: report.folders,
            messages: report.messages,
        });
    }

    drop(tx);
    let written = writer
        .await
        .map_err(|e| CleanupError::ArchiveIoError(format!("archive writer panicked: {}", e)))??;

    info!("Backup complete: {} messages written", written);
    Ok(report)
}

async fn backup_folder<S, F>(
    service: &mut S,
    folder: &str,
    tx: &mpsc::Sender<ArchiveEntry>,
    report: &mut BackupReport,
    visited: usize,
    on_progress: &mut F,
) -> Result<usize>
where
    S: MailboxService + ?Sized,
    F: FnMut(BackupProgress),
{
    let status = service.select_folder(folder).await?;
    if status.exists == 0 {
        return Ok(0);
    }

    let uids = service.search(&SearchCriteria::All).await?;
    let mut archived = 0;
    let mut messages = service.fetch(&uids, FetchItems::raw_body());

    while let Some(message) = messages.next().await {
        let message = message?;
        let Some(raw) = message.body else {
            warn!("{}: uid {} returned no body, skipping", folder, message.uid);
            continue;
        };

        let entry = ArchiveEntry {
            folder: folder.to_string(),
            uid: Some(message.uid),
            raw,
        };
        tx.send(entry)
            .await
            .map_err(|_| archive_io("archive writer closed"))?;

        if archived == 0 {
            report.folders += 1;
        }
        archived += 1;
        report.messages += 1;
        on_progress(BackupProgress {
            visited,
            folders: report.folders,
            messages: report.messages,
        });
    }

    Ok(archived)
}

fn write_archive(file: File, mut rx: mpsc::Receiver<ArchiveEntry>) -> Result<usize> {
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    let mut written = 0;

    while let Some(entry) = rx.blocking_recv() {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(entry.raw.len() as u64);
        header.set_mode(ENTRY_MODE);
        header.set_mtime(Utc::now().timestamp().max(0) as u64);

        builder
            .append_data(&mut header, entry.path(), entry.raw.as_slice())
            .map_err(archive_io)?;
        written += 1;
    }

    let encoder = builder.into_inner().map_err(archive_io)?;
    let mut file = encoder.finish().map_err(archive_io)?;
    file.flush().map_err(archive_io)?;
    Ok(written)
}

/// Append every archived message back into the mailbox.
///
/// Each destination folder is created once per run; a failing CREATE is
/// ignored since the folder usually exists already. Append failures are
/// collected per entry. A damaged archive aborts with `ArchiveIoError`.
pub async fn restore<S, F>(service: &mut S, path: &Path, mut on_progress: F) -> Result<RestoreReport>
where
    S: MailboxService + ?Sized,
    F: FnMut(usize),
{
    let (tx, mut rx) = mpsc::channel::<Result<ArchiveEntry>>(CHANNEL_CAPACITY);
    let source = path.to_path_buf();
    let reader = tokio::task::spawn_blocking(move || read_archive(source, tx));

    let mut report = RestoreReport::default();
    let mut created: HashSet<String> = HashSet::new();
    info!("Restoring from {}", path.display());

    while let Some(entry) = rx.recv().await {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                drop(rx);
                let _ = reader.await;
                return Err(e);
            }
        };

        if created.insert(entry.folder.clone()) && !FolderRef::new(&entry.folder).is_inbox() {
            match service.create_folder(&entry.folder).await {
                Ok(()) => {
                    info!("Created folder {}", entry.folder);
                    report.folders_created += 1;
                }
                Err(e) => debug!("CREATE {} failed, assuming it exists: {}", entry.folder, e),
            }
        }

        match service
            .append_message(&entry.folder, &entry.raw, Utc::now())
            .await
        {
            Ok(()) => {
                report.restored += 1;
                on_progress(report.restored);
            }
            Err(e) => {
                warn!("Failed to restore {}: {}", entry.path(), e);
                report.failed.push((entry.path(), e.to_string()));
            }
        }
    }

    reader
        .await
        .map_err(|e| CleanupError::ArchiveIoError(format!("archive reader panicked: {}", e)))?;

    info!(
        "Restore complete: {} restored, {} failed",
        report.restored,
        report.failed.len()
    );
    Ok(report)
}

fn read_archive(path: PathBuf, tx: mpsc::Sender<Result<ArchiveEntry>>) {
    if let Err(e) = stream_entries(&path, &tx) {
        let _ = tx.blocking_send(Err(e));
    }
}

fn stream_entries(path: &Path, tx: &mpsc::Sender<Result<ArchiveEntry>>) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| CleanupError::ArchiveIoError(format!("{}: {}", path.display(), e)))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));

    for entry in archive.entries().map_err(archive_io)? {
        let mut entry = entry.map_err(archive_io)?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        if !entry_type.is_file() {
            debug!("Skipping non-file archive entry of type {:?}", entry_type);
            continue;
        }

        let entry_path = entry.path().map_err(archive_io)?.to_string_lossy().into_owned();
        let mut raw = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut raw).map_err(archive_io)?;

        if tx
            .blocking_send(Ok(ArchiveEntry::from_path(&entry_path, raw)))
            .is_err()
        {
            // Restore side stopped listening
            break;
        }
    }

    Ok(())
}
