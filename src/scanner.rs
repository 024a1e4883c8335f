//! Folder-by-folder scan that classifies messages into groups

use futures::stream::StreamExt;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, Group};
use crate::classifier::Classifier;
use crate::client::MailboxService;
use crate::error::{CleanupError, Result};
use crate::models::{FetchItems, FolderRef, GroupField, MessageRef, SearchCriteria};

/// What a scan collects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Every message, grouped by classification key
    Statistics,
    /// Only messages whose key contains the text, collected into one group
    Match(String),
}

impl ScanMode {
    pub fn matching(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(CleanupError::InvalidInput(
                "match text cannot be empty".to_string(),
            ));
        }
        Ok(ScanMode::Match(text.to_string()))
    }

    pub fn is_match(&self) -> bool {
        matches!(self, ScanMode::Match(_))
    }

    /// Label for the running counter
    pub fn counter_label(&self) -> &'static str {
        match self {
            ScanMode::Statistics => "msgs",
            ScanMode::Match(_) => "matches",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub mode: ScanMode,
    pub field: GroupField,
    /// Fetch RFC822.SIZE; always on in match mode
    pub size_accounting: bool,
    pub subject_max_chars: usize,
}

impl ScanOptions {
    pub fn sizes_enabled(&self) -> bool {
        self.size_accounting || self.mode.is_match()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    Processed(usize),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct FolderReport {
    pub folder: String,
    pub outcome: FolderOutcome,
}

/// Counters reported after each folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub folders_done: usize,
    pub folders_total: usize,
    pub count: usize,
}

#[derive(Debug)]
pub struct ScanReport {
    /// Ranked descending by count
    pub groups: Vec<Group>,
    pub folders: Vec<FolderReport>,
    pub total_messages: usize,
}

impl ScanReport {
    pub fn skipped_folders(&self) -> Vec<(&str, &str)> {
        self.folders
            .iter()
            .filter_map(|f| match &f.outcome {
                FolderOutcome::Skipped(reason) => Some((f.folder.as_str(), reason.as_str())),
                FolderOutcome::Processed(_) => None,
            })
            .collect()
    }

    /// The single group of a match scan, if anything matched
    pub fn target_group(&self) -> Option<&Group> {
        self.groups.first()
    }
}

pub struct MailboxScanner {
    options: ScanOptions,
    classifier: Classifier,
}

impl MailboxScanner {
    pub fn new(options: ScanOptions) -> Self {
        let classifier = Classifier::new(options.field, options.subject_max_chars);
        Self {
            options,
            classifier,
        }
    }

    /// Scan folders strictly one after another.
    ///
    /// A folder whose select, search or fetch fails is reported as skipped
    /// and the scan moves on; messages observed before the failure stay
    /// counted.
    pub async fn scan<S, F>(&self, service: &mut S, folders: &[FolderRef], mut on_progress: F) -> ScanReport
    where
        S: MailboxService + ?Sized,
        F: FnMut(ScanProgress),
    {
        let mut aggregator = Aggregator::new();
        let mut reports = Vec::with_capacity(folders.len());

        info!(
            "Scanning {} folders by {} ({:?})",
            folders.len(),
            self.options.field,
            self.options.mode
        );

        for (idx, folder) in folders.iter().enumerate() {
            let outcome = match self.scan_folder(service, folder, &mut aggregator).await {
                Ok(count) => {
                    debug!("{}: {} messages counted", folder.name, count);
                    FolderOutcome::Processed(count)
                }
                Err(e) => {
                    warn!("Skipping folder {}: {}", folder.name, e);
                    FolderOutcome::Skipped(e.to_string())
                }
            };
            reports.push(FolderReport {
                folder: folder.name.clone(),
                outcome,
            });

            on_progress(ScanProgress {
                folders_done: idx + 1,
                folders_total: folders.len(),
                count: aggregator.total_observed(),
            });
        }

        let total_messages = aggregator.total_observed();
        info!(
            "Scan complete: {} messages in {} groups",
            total_messages,
            aggregator.group_count()
        );

        ScanReport {
            groups: aggregator.into_ranked(),
            folders: reports,
            total_messages,
        }
    }

    async fn scan_folder<S>(&self, service: &mut S, folder: &FolderRef, aggregator: &mut Aggregator) -> Result<usize>
    where
        S: MailboxService + ?Sized,
    {
        let scan_error = |e: CleanupError| CleanupError::ScanError {
            folder: folder.name.clone(),
            reason: e.to_string(),
        };

        let status = service.select_folder(&folder.name).await.map_err(scan_error)?;
        aggregator.enter_folder(&folder.name, status.uid_validity);
        if status.exists == 0 {
            return Ok(0);
        }

        let (criteria, needle) = match &self.options.mode {
            ScanMode::Statistics => (SearchCriteria::All, None),
            ScanMode::Match(text) => (
                SearchCriteria::header_contains(self.options.field, text),
                Some(text.to_lowercase()),
            ),
        };

        let uids = service.search(&criteria).await.map_err(scan_error)?;
        if uids.is_empty() {
            return Ok(0);
        }
        debug!("{}: {} candidates", folder.name, uids.len());

        let items = FetchItems::envelope(self.options.sizes_enabled());
        let mut counted = 0;
        let mut messages = service.fetch(&uids, items);

        while let Some(message) = messages.next().await {
            let message = message.map_err(scan_error)?;
            let envelope = message.envelope.unwrap_or_default();
            let key = match (&self.options.mode, &needle) {
                // Server-side search is a superset at best; ALL for non-ASCII text
                (ScanMode::Match(text), Some(needle)) => {
                    if !self.classifier.matches(&envelope, needle) {
                        continue;
                    }
                    text.clone()
                }
                _ => self.classifier.classify(&envelope),
            };

            aggregator.observe(
                MessageRef {
                    folder: folder.name.clone(),
                    uid: message.uid,
                    size: message.size.map(u64::from).unwrap_or(0),
                },
                key,
            );
            counted += 1;
        }

        Ok(counted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_match_text_rejected() {
        assert!(ScanMode::matching("  ").is_err());
        assert_eq!(
            ScanMode::matching("spam").unwrap(),
            ScanMode::Match("spam".to_string())
        );
    }

    #[test]
    fn test_match_mode_forces_sizes() {
        let options = ScanOptions {
            mode: ScanMode::Match("x".to_string()),
            field: GroupField::From,
            size_accounting: false,
            subject_max_chars: 60,
        };
        assert!(options.sizes_enabled());

        let options = ScanOptions {
            mode: ScanMode::Statistics,
            ..options
        };
        assert!(!options.sizes_enabled());
    }

    #[test]
    fn test_counter_label() {
        assert_eq!(ScanMode::Statistics.counter_label(), "msgs");
        assert_eq!(ScanMode::Match("a".to_string()).counter_label(), "matches");
    }

    #[test]
    fn test_skipped_folders_summary() {
        let report = ScanReport {
            groups: Vec::new(),
            folders: vec![
                FolderReport {
                    folder: "INBOX".to_string(),
                    outcome: FolderOutcome::Processed(3),
                },
                FolderReport {
                    folder: "Broken".to_string(),
                    outcome: FolderOutcome::Skipped("SELECT failed".to_string()),
                },
            ],
            total_messages: 3,
        };
        assert_eq!(report.skipped_folders(), vec![("Broken", "SELECT failed")]);
    }
}
