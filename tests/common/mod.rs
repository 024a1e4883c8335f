//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;
use imap_cleanup::client::{MailboxService, MessageStream};
use imap_cleanup::error::{CleanupError, Result};
use imap_cleanup::models::{
    Address, Envelope, FetchItems, FetchedMessage, FolderRef, FolderStatus, GroupField,
    SearchCriteria,
};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub uid: u32,
    pub envelope: Envelope,
    pub raw: Vec<u8>,
    pub deleted: bool,
    pub internal_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FakeFolder {
    pub name: String,
    pub selectable: bool,
    pub uid_validity: u32,
    pub next_uid: u32,
    pub messages: Vec<FakeMessage>,
}

impl FakeFolder {
    pub fn live_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.deleted).count()
    }
}

/// In-memory mailbox with failure injection
#[derive(Debug, Default)]
pub struct FakeMailbox {
    pub folders: Vec<FakeFolder>,
    selected: Option<usize>,
    pub fail_list: bool,
    pub fail_select: HashSet<String>,
    pub fail_fetch: HashSet<String>,
    pub fail_append: HashSet<String>,
    /// Number of STORE calls that succeed before every later one fails
    pub store_budget: Option<usize>,
    pub fail_expunge: bool,
    /// HEADER searches return every message, like servers matching
    /// display names or the raw header block
    pub loose_search: bool,
    pub store_calls: usize,
    pub created: Vec<String>,
    pub logged_out: bool,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folder(mut self, name: &str) -> Self {
        self.add_folder(name, true);
        self
    }

    pub fn with_unselectable(mut self, name: &str) -> Self {
        self.add_folder(name, false);
        self
    }

    fn add_folder(&mut self, name: &str, selectable: bool) -> usize {
        let uid_validity = 1000 + self.folders.len() as u32;
        self.folders.push(FakeFolder {
            name: name.to_string(),
            selectable,
            uid_validity,
            next_uid: 1,
            messages: Vec::new(),
        });
        self.folders.len() - 1
    }

    pub fn folder(&self, name: &str) -> Option<&FakeFolder> {
        self.folders.iter().find(|f| f.name == name)
    }

    fn folder_index(&self, name: &str) -> Option<usize> {
        self.folders.iter().position(|f| f.name == name)
    }

    /// Add a message; returns its uid
    pub fn add(&mut self, folder: &str, from: &str, to: &str, subject: &str) -> u32 {
        let body = format!("Body of {}", subject);
        self.add_raw(folder, envelope(from, to, subject), raw_message(from, to, subject, &body))
    }

    pub fn add_raw(&mut self, folder: &str, envelope: Envelope, raw: Vec<u8>) -> u32 {
        let idx = match self.folder_index(folder) {
            Some(idx) => idx,
            None => self.add_folder(folder, true),
        };
        let folder = &mut self.folders[idx];
        let uid = folder.next_uid;
        folder.next_uid += 1;
        folder.messages.push(FakeMessage {
            uid,
            envelope,
            raw,
            deleted: false,
            internal_date: None,
        });
        uid
    }

    pub fn fill(&mut self, folder: &str, from: &str, count: usize) {
        for i in 0..count {
            self.add(folder, from, "me@example.com", &format!("Message {}", i));
        }
    }

    /// Simulate the server renumbering a folder
    pub fn bump_uid_validity(&mut self, folder: &str) {
        if let Some(idx) = self.folder_index(folder) {
            self.folders[idx].uid_validity += 1;
        }
    }

    pub fn live_count(&self, folder: &str) -> usize {
        self.folder(folder).map(|f| f.live_count()).unwrap_or(0)
    }

    fn selected_folder(&mut self) -> Result<&mut FakeFolder> {
        match self.selected {
            Some(idx) => Ok(&mut self.folders[idx]),
            None => Err(CleanupError::ProtocolError("No mailbox selected".to_string())),
        }
    }
}

fn header_value(envelope: &Envelope, field: GroupField) -> String {
    let render = |list: &[Address]| {
        list.iter()
            .map(|a| {
                format!(
                    "{}@{}",
                    a.mailbox.clone().unwrap_or_default(),
                    a.host.clone().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    match field {
        GroupField::From => render(&envelope.from),
        GroupField::To => render(&envelope.to),
        GroupField::Subject => envelope.subject.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl MailboxService for FakeMailbox {
    async fn list_folders(&mut self) -> Result<Vec<FolderRef>> {
        if self.fail_list {
            return Err(CleanupError::ProtocolError("LIST failed".to_string()));
        }
        Ok(self
            .folders
            .iter()
            .map(|f| FolderRef {
                name: f.name.clone(),
                selectable: f.selectable,
            })
            .collect())
    }

    async fn select_folder(&mut self, name: &str) -> Result<FolderStatus> {
        self.selected = None;
        if self.fail_select.contains(name) {
            return Err(CleanupError::ProtocolError(format!("SELECT {} refused", name)));
        }
        let idx = self
            .folder_index(name)
            .filter(|&idx| self.folders[idx].selectable)
            .ok_or_else(|| CleanupError::ProtocolError(format!("No such folder {}", name)))?;
        self.selected = Some(idx);

        let folder = &self.folders[idx];
        Ok(FolderStatus {
            exists: folder.live_count() as u32,
            uid_validity: Some(folder.uid_validity),
        })
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let loose_search = self.loose_search;
        let folder = self.selected_folder()?;
        let uids = folder
            .messages
            .iter()
            .filter(|m| !m.deleted)
            .filter(|m| match criteria {
                SearchCriteria::All => true,
                SearchCriteria::HeaderContains { .. } if loose_search => true,
                SearchCriteria::HeaderContains { field, text } => header_value(&m.envelope, *field)
                    .to_lowercase()
                    .contains(&text.to_lowercase()),
            })
            .map(|m| m.uid)
            .collect();
        Ok(uids)
    }

    fn fetch<'a>(&'a mut self, uids: &'a [u32], items: FetchItems) -> MessageStream<'a> {
        let folder = match self.selected {
            Some(idx) => &self.folders[idx],
            None => {
                return Box::pin(stream::iter(vec![Err(CleanupError::ProtocolError(
                    "No mailbox selected".to_string(),
                ))]))
            }
        };

        if self.fail_fetch.contains(&folder.name) {
            return Box::pin(stream::iter(vec![Err(CleanupError::ProtocolError(format!(
                "FETCH in {} failed",
                folder.name
            )))]));
        }

        let results: Vec<Result<FetchedMessage>> = folder
            .messages
            .iter()
            .filter(|m| uids.contains(&m.uid))
            .map(|m| {
                Ok(FetchedMessage {
                    uid: m.uid,
                    size: items.size.then_some(m.raw.len() as u32),
                    envelope: items.envelope.then(|| m.envelope.clone()),
                    body: items.body.then(|| m.raw.clone()),
                })
            })
            .collect();
        Box::pin(stream::iter(results))
    }

    async fn mark_deleted(&mut self, uids: &[u32]) -> Result<()> {
        self.store_calls += 1;
        if let Some(budget) = self.store_budget {
            if self.store_calls > budget {
                return Err(CleanupError::ProtocolError("STORE failed".to_string()));
            }
        }
        let folder = self.selected_folder()?;
        for message in folder.messages.iter_mut() {
            if uids.contains(&message.uid) {
                message.deleted = true;
            }
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<usize> {
        if self.fail_expunge {
            return Err(CleanupError::ProtocolError("EXPUNGE failed".to_string()));
        }
        let folder = self.selected_folder()?;
        let before = folder.messages.len();
        folder.messages.retain(|m| !m.deleted);
        Ok(before - folder.messages.len())
    }

    async fn create_folder(&mut self, name: &str) -> Result<()> {
        if self.folder_index(name).is_some() {
            return Err(CleanupError::ProtocolError(format!("{} already exists", name)));
        }
        self.add_folder(name, true);
        self.created.push(name.to_string());
        Ok(())
    }

    async fn append_message(&mut self, folder: &str, raw: &[u8], timestamp: DateTime<Utc>) -> Result<()> {
        if self.fail_append.contains(folder) {
            return Err(CleanupError::ProtocolError(format!("APPEND to {} failed", folder)));
        }
        let idx = self
            .folder_index(folder)
            .ok_or_else(|| CleanupError::ProtocolError(format!("[TRYCREATE] {}", folder)))?;
        let folder = &mut self.folders[idx];
        let uid = folder.next_uid;
        folder.next_uid += 1;
        folder.messages.push(FakeMessage {
            uid,
            envelope: Envelope::default(),
            raw: raw.to_vec(),
            deleted: false,
            internal_date: Some(timestamp),
        });
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.logged_out = true;
        Ok(())
    }
}

/// Split `local@host` into an envelope address
pub fn address(email: &str) -> Address {
    match email.split_once('@') {
        Some((mailbox, host)) => Address::new(mailbox, host),
        None => Address {
            mailbox: Some(email.to_string()),
            host: None,
        },
    }
}

pub fn envelope(from: &str, to: &str, subject: &str) -> Envelope {
    Envelope {
        from: vec![address(from)],
        to: vec![address(to)],
        subject: Some(subject.to_string()),
    }
}

pub fn raw_message(from: &str, to: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {}\r\nTo: {}\r\nSubject: {}\r\nMessage-ID: <{}@test>\r\n\r\n{}\r\n",
        from,
        to,
        subject,
        subject.len(),
        body
    )
    .into_bytes()
}
