use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CleanupError;

/// Name of the folder every IMAP server must expose
pub const INBOX: &str = "INBOX";

/// Header a scan groups messages by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GroupField {
    #[default]
    From,
    To,
    Subject,
}

impl GroupField {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupField::From => "from",
            GroupField::To => "to",
            GroupField::Subject => "subject",
        }
    }

    /// Header name as used in an IMAP `HEADER` search key
    pub fn header_name(&self) -> &'static str {
        match self {
            GroupField::From => "FROM",
            GroupField::To => "TO",
            GroupField::Subject => "SUBJECT",
        }
    }
}

impl fmt::Display for GroupField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "from" => Ok(GroupField::From),
            "to" => Ok(GroupField::To),
            "subject" => Ok(GroupField::Subject),
            other => Err(format!(
                "Invalid field: '{}'. Must be 'from', 'to', or 'subject'",
                other
            )),
        }
    }
}

/// `host:port` of an IMAP server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    pub host: String,
    pub port: u16,
}

impl ServerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddr {
    type Err = CleanupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || CleanupError::InvalidInput(format!("expected host:port, got '{}'", s));
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub name: String,
    pub selectable: bool,
}

impl FolderRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selectable: true,
        }
    }

    pub fn is_inbox(&self) -> bool {
        self.name.eq_ignore_ascii_case(INBOX)
    }
}

/// A message as captured at scan time. `uid` is only meaningful together
/// with the folder's UIDVALIDITY recorded in the same scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub folder: String,
    pub uid: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

impl Address {
    pub fn new(mailbox: &str, host: &str) -> Self {
        Self {
            mailbox: Some(mailbox.to_string()),
            host: Some(host.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub subject: Option<String>,
}

/// Data items requested per message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchItems {
    pub envelope: bool,
    pub size: bool,
    pub body: bool,
}

impl FetchItems {
    pub fn envelope(with_size: bool) -> Self {
        Self {
            envelope: true,
            size: with_size,
            body: false,
        }
    }

    pub fn raw_body() -> Self {
        Self {
            envelope: false,
            size: false,
            body: true,
        }
    }

    /// IMAP fetch attribute list, e.g. `(UID ENVELOPE RFC822.SIZE)`
    pub fn to_imap_query(&self) -> String {
        let mut items = vec!["UID"];
        if self.envelope {
            items.push("ENVELOPE");
        }
        if self.size {
            items.push("RFC822.SIZE");
        }
        if self.body {
            // PEEK so that backups leave \Seen untouched
            items.push("BODY.PEEK[]");
        }
        format!("({})", items.join(" "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedMessage {
    pub uid: u32,
    pub size: Option<u32>,
    pub envelope: Option<Envelope>,
    pub body: Option<Vec<u8>>,
}

/// Result of selecting a folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStatus {
    pub exists: u32,
    pub uid_validity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    HeaderContains { field: GroupField, text: String },
}

impl SearchCriteria {
    /// Header substring search. Quoted strings must be 7-bit, so non-ASCII
    /// text searches everything and relies on the caller filtering locally.
    pub fn header_contains(field: GroupField, text: &str) -> Self {
        if text.is_ascii() {
            SearchCriteria::HeaderContains {
                field,
                text: text.to_string(),
            }
        } else {
            SearchCriteria::All
        }
    }

    pub fn to_imap_query(&self) -> String {
        match self {
            SearchCriteria::All => "ALL".to_string(),
            SearchCriteria::HeaderContains { text, .. } if !text.is_ascii() => "ALL".to_string(),
            SearchCriteria::HeaderContains { field, text } => {
                format!("HEADER {} {}", field.header_name(), quote_imap_string(text))
            }
        }
    }
}

fn quote_imap_string(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// One message inside a backup archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub folder: String,
    pub uid: Option<u32>,
    pub raw: Vec<u8>,
}

/// File extension used for archived messages
pub const MESSAGE_EXTENSION: &str = "eml";

impl ArchiveEntry {
    /// Entry path inside the archive: `<folder>/<uid>.eml`
    pub fn path(&self) -> String {
        match self.uid {
            Some(uid) => format!("{}/{}.{}", self.folder, uid, MESSAGE_EXTENSION),
            None => format!("{}/unknown.{}", self.folder, MESSAGE_EXTENSION),
        }
    }

    /// Rebuild an entry from its archive path. Entries at the archive root
    /// belong to the inbox.
    pub fn from_path(path: &str, raw: Vec<u8>) -> Self {
        let path = path.trim_start_matches("./");
        let (folder, file) = match path.rsplit_once('/') {
            Some((dir, file)) if !dir.is_empty() && dir != "." => (dir.to_string(), file),
            Some((_, file)) => (INBOX.to_string(), file),
            None => (INBOX.to_string(), path),
        };
        let uid = file
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file)
            .parse::<u32>()
            .ok();
        Self { folder, uid, raw }
    }
}
