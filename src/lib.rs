//! IMAP mailbox cleanup
//!
//! Inspect, back up, restore and bulk-delete messages in a large remote
//! mailbox over IMAP.
//!
//! # Overview
//!
//! - **Connection**: server guessing from the email address, then TLS tier
//!   negotiation (modern, legacy, plaintext opt-in)
//! - **Scanning**: folder-by-folder streaming of envelopes, grouped by
//!   sender, recipient or subject
//! - **Deletion**: paginated interactive session or single-match confirm,
//!   dispatched per folder as mark + expunge
//! - **Archive**: gzip-compressed tar backup and restore, streamed message
//!   by message
//!
//! # Example Usage
//!
//! ```no_run
//! use imap_cleanup::client::ImapMailbox;
//! use imap_cleanup::config::Config;
//! use imap_cleanup::folders::enumerate_folders;
//! use imap_cleanup::models::{GroupField, ServerAddr};
//! use imap_cleanup::scanner::{MailboxScanner, ScanMode, ScanOptions};
//! use imap_cleanup::transport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("imap-cleanup.toml".as_ref()).await?;
//!
//!     let addr = ServerAddr::new("imap.example.com", 993);
//!     let connection = transport::negotiate(&addr, &config.connection, false).await?;
//!     let mut mailbox = ImapMailbox::login(connection, "me@example.com", "secret").await?;
//!
//!     let folders = enumerate_folders(&mut mailbox).await?;
//!     let scanner = MailboxScanner::new(ScanOptions {
//!         mode: ScanMode::Statistics,
//!         field: GroupField::From,
//!         size_accounting: true,
//!         subject_max_chars: config.scan.subject_max_chars,
//!     });
//!     let report = scanner.scan(&mut mailbox, &folders, |_| {}).await;
//!
//!     for group in report.groups.iter().take(10) {
//!         println!("{:>6}  {}", group.count, group.key);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`aggregator`] - Grouping of scanned messages by key
//! - [`archive`] - Backup to and restore from tar.gz archives
//! - [`classifier`] - Classification keys from envelopes
//! - [`cli`] - Command-line interface and workflow orchestration
//! - [`client`] - Mailbox service trait and IMAP implementation
//! - [`config`] - Configuration management
//! - [`dispatcher`] - Per-folder deletion
//! - [`error`] - Error types and result aliases
//! - [`folders`] - Folder enumeration and ordering
//! - [`interactive`] - Paginated delete session
//! - [`models`] - Core data structures
//! - [`resolver`] - Server guessing from an email address
//! - [`scanner`] - Folder-by-folder scan engine
//! - [`transport`] - TLS tier negotiation

pub mod aggregator;
pub mod archive;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod folders;
pub mod interactive;
pub mod models;
pub mod resolver;
pub mod scanner;
pub mod transport;

pub use error::{CleanupError, Result};
pub use models::*;
