//! In-memory grouping of scanned messages by classification key

use crate::models::MessageRef;
use std::collections::HashMap;

/// Message uids of one group inside one folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderMessages {
    pub folder: String,
    /// UIDVALIDITY of the folder when the uids were captured
    pub uid_validity: Option<u32>,
    pub uids: Vec<u32>,
}

/// All messages sharing one classification key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: String,
    pub count: usize,
    pub total_bytes: u64,
    /// Folders in the order they were scanned
    pub messages_by_folder: Vec<FolderMessages>,
}

impl Group {
    fn new(key: String) -> Self {
        Self {
            key,
            count: 0,
            total_bytes: 0,
            messages_by_folder: Vec::new(),
        }
    }

    pub fn total_megabytes(&self) -> f64 {
        bytes_to_megabytes(self.total_bytes)
    }

    pub fn folder_count(&self) -> usize {
        self.messages_by_folder.len()
    }
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Single-writer grouping structure fed by the scan engine.
///
/// Groups are created lazily on the first message with a new key and keep
/// their insertion order, which breaks ties when ranking.
#[derive(Debug, Default)]
pub struct Aggregator {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
    uid_validity: HashMap<String, u32>,
    observed: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the UIDVALIDITY of a folder before observing its messages
    pub fn enter_folder(&mut self, folder: &str, uid_validity: Option<u32>) {
        match uid_validity {
            Some(v) => {
                self.uid_validity.insert(folder.to_string(), v);
            }
            None => {
                self.uid_validity.remove(folder);
            }
        }
    }

    pub fn observe(&mut self, message: MessageRef, key: String) {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.groups.len();
                self.index.insert(key.clone(), idx);
                self.groups.push(Group::new(key));
                idx
            }
        };
        let uid_validity = self.uid_validity.get(&message.folder).copied();

        let group = &mut self.groups[idx];
        group.count += 1;
        group.total_bytes += message.size;

        match group.messages_by_folder.last_mut() {
            Some(last) if last.folder == message.folder => last.uids.push(message.uid),
            _ => group.messages_by_folder.push(FolderMessages {
                folder: message.folder,
                uid_validity,
                uids: vec![message.uid],
            }),
        }

        self.observed += 1;
    }

    pub fn total_observed(&self) -> usize {
        self.observed
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn get(&self, key: &str) -> Option<&Group> {
        self.index.get(key).map(|&idx| &self.groups[idx])
    }

    /// Groups sorted descending by count; equal counts keep insertion order
    pub fn into_ranked(self) -> Vec<Group> {
        let mut groups = self.groups;
        groups.sort_by(|a, b| b.count.cmp(&a.count));
        groups
    }
}
