//! Per-folder mark-and-expunge of a group's messages

use tracing::{debug, info, warn};

use crate::aggregator::FolderMessages;
use crate::client::MailboxService;

/// Result of deleting one folder's share of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Succeeded { deleted: usize },
    /// Some messages were flagged before a failure, or flagging worked but
    /// expunge did not
    PartiallyFailed { flagged: usize, reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct FolderDeletion {
    pub folder: String,
    pub requested: usize,
    pub outcome: DeletionOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub folders: Vec<FolderDeletion>,
}

impl DeletionReport {
    pub fn total_deleted(&self) -> usize {
        self.folders
            .iter()
            .map(|f| match f.outcome {
                DeletionOutcome::Succeeded { deleted } => deleted,
                _ => 0,
            })
            .sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.folders
            .iter()
            .all(|f| matches!(f.outcome, DeletionOutcome::Succeeded { .. }))
    }

    /// True when the server accepted at least part of the request
    pub fn any_applied(&self) -> bool {
        self.folders.iter().any(|f| {
            matches!(
                f.outcome,
                DeletionOutcome::Succeeded { .. } | DeletionOutcome::PartiallyFailed { .. }
            )
        })
    }
}

/// Deletes messages folder by folder. Irreversible once expunged.
pub struct DeletionDispatcher {
    batch_size: usize,
}

impl DeletionDispatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub async fn dispatch<S>(&self, service: &mut S, targets: &[FolderMessages]) -> DeletionReport
    where
        S: MailboxService + ?Sized,
    {
        let mut report = DeletionReport::default();

        for target in targets {
            let outcome = self.delete_in_folder(service, target).await;
            match &outcome {
                DeletionOutcome::Succeeded { deleted } => {
                    info!("{}: deleted {} messages", target.folder, deleted)
                }
                DeletionOutcome::PartiallyFailed { flagged, reason } => warn!(
                    "{}: only {} of {} flagged before failure: {}",
                    target.folder,
                    flagged,
                    target.uids.len(),
                    reason
                ),
                DeletionOutcome::Failed { reason } => {
                    warn!("{}: deletion failed: {}", target.folder, reason)
                }
            }
            report.folders.push(FolderDeletion {
                folder: target.folder.clone(),
                requested: target.uids.len(),
                outcome,
            });
        }

        report
    }

    async fn delete_in_folder<S>(&self, service: &mut S, target: &FolderMessages) -> DeletionOutcome
    where
        S: MailboxService + ?Sized,
    {
        let status = match service.select_folder(&target.folder).await {
            Ok(status) => status,
            Err(e) => {
                return DeletionOutcome::Failed {
                    reason: format!("select failed: {}", e),
                }
            }
        };

        // UIDs from another UIDVALIDITY epoch may name different messages
        if let (Some(expected), Some(current)) = (target.uid_validity, status.uid_validity) {
            if expected != current {
                return DeletionOutcome::Failed {
                    reason: format!(
                        "UIDVALIDITY changed since scan ({} -> {}), refusing to delete",
                        expected, current
                    ),
                };
            }
        }

        let mut flagged = 0;
        for batch in target.uids.chunks(self.batch_size) {
            if let Err(e) = service.mark_deleted(batch).await {
                let reason = format!("store failed: {}", e);
                return if flagged == 0 {
                    DeletionOutcome::Failed { reason }
                } else {
                    DeletionOutcome::PartiallyFailed { flagged, reason }
                };
            }
            flagged += batch.len();
            debug!("{}: flagged {}/{}", target.folder, flagged, target.uids.len());
        }

        match service.expunge().await {
            Ok(_) => DeletionOutcome::Succeeded { deleted: flagged },
            Err(e) => DeletionOutcome::PartiallyFailed {
                flagged,
                reason: format!("expunge failed: {}", e),
            },
        }
    }
}
