//! Mailbox service abstraction and its IMAP implementation

use async_imap::imap_proto::types::{Address as ProtoAddress, Envelope as ProtoEnvelope};
use async_imap::types::{Fetch, Name, NameAttribute};
use async_imap::{Client, Session};
use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info, warn};

use crate::error::{CleanupError, Result};
use crate::models::{
    Address, Envelope, FetchItems, FetchedMessage, FolderRef, FolderStatus, SearchCriteria,
};
use crate::transport::{Connection, ImapStream};

/// Lazily produced fetch results. The stream borrows the service mutably, so
/// no other command can be issued until it is dropped.
pub type MessageStream<'a> = Pin<Box<dyn Stream<Item = Result<FetchedMessage>> + Send + 'a>>;

/// Operations the cleanup workflows need from a mailbox.
///
/// Every method takes `&mut self`: a session is a single stateful resource
/// and callers must never interleave commands on it.
#[async_trait]
pub trait MailboxService: Send {
    /// List every folder, selectable or not
    async fn list_folders(&mut self) -> Result<Vec<FolderRef>>;

    /// Select a folder for subsequent search/fetch/store/expunge calls
    async fn select_folder(&mut self, name: &str) -> Result<FolderStatus>;

    /// UIDs in the selected folder matching the criteria, ascending
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    /// Fetch the requested items for the given UIDs of the selected folder
    fn fetch<'a>(&'a mut self, uids: &'a [u32], items: FetchItems) -> MessageStream<'a>;

    /// Set `\Deleted` on the given UIDs of the selected folder
    async fn mark_deleted(&mut self, uids: &[u32]) -> Result<()>;

    /// Permanently remove flagged messages; returns how many were removed
    async fn expunge(&mut self) -> Result<usize>;

    async fn create_folder(&mut self, name: &str) -> Result<()>;

    /// Store a raw message in a folder with the given internal date
    async fn append_message(
        &mut self,
        folder: &str,
        raw: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Compress UIDs into an IMAP sequence set, e.g. `1:3,7,9:10`
pub fn uid_set(uids: &[u32]) -> String {
    let mut sorted = uids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for uid in iter {
        if uid == end + 1 {
            end = uid;
            continue;
        }
        parts.push(range_to_string(start, end));
        start = uid;
        end = uid;
    }
    parts.push(range_to_string(start, end));
    parts.join(",")
}

fn range_to_string(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}

/// IMAP `date-time` for APPEND, e.g. `17-Jul-1996 02:44:25 +0000`
pub fn imap_date_time(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

/// Production mailbox backed by an authenticated IMAP session
pub struct ImapMailbox {
    session: Session<ImapStream>,
}

impl ImapMailbox {
    /// Authenticate with LOGIN over a negotiated connection
    pub async fn login(connection: Connection, user: &str, password: &str) -> Result<Self> {
        let mut client = Client::new(connection.stream);

        if !connection.greeting_consumed {
            read_greeting(&mut client).await?;
        }

        let session = client
            .login(user, password)
            .await
            .map_err(|(e, _)| CleanupError::AuthError(format!("Login failed for {}: {}", user, e)))?;

        info!("Logged in as {}", user);
        Ok(Self { session })
    }
}

/// Wait for the untagged greeting that opens every IMAP connection
pub(crate) async fn read_greeting<T>(client: &mut Client<T>) -> Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + std::fmt::Debug + Send,
{
    client
        .read_response()
        .await
        .ok_or_else(|| {
            CleanupError::NegotiationError("Connection closed before greeting".to_string())
        })?
        .map_err(|e| CleanupError::NegotiationError(format!("No server greeting: {}", e)))?;
    Ok(())
}

fn folder_from_name(name: &Name) -> FolderRef {
    let selectable = !name.attributes().iter().any(|attr| match attr {
        NameAttribute::NoSelect => true,
        NameAttribute::Extension(ext) => ext.eq_ignore_ascii_case("\\NonExistent"),
        _ => false,
    });
    FolderRef {
        name: name.name().to_string(),
        selectable,
    }
}

fn lossy(bytes: Option<&[u8]>) -> Option<String> {
    bytes.map(|b| String::from_utf8_lossy(b).into_owned())
}

fn convert_addresses(list: Option<&Vec<ProtoAddress<'_>>>) -> Vec<Address> {
    list.map(|addresses| {
        addresses
            .iter()
            .map(|a| Address {
                mailbox: lossy(a.mailbox.as_deref()),
                host: lossy(a.host.as_deref()),
            })
            .collect()
    })
    .unwrap_or_default()
}

fn convert_envelope(env: &ProtoEnvelope<'_>) -> Envelope {
    Envelope {
        from: convert_addresses(env.from.as_ref()),
        to: convert_addresses(env.to.as_ref()),
        subject: lossy(env.subject.as_deref()),
    }
}

fn convert_fetch(fetch: &Fetch) -> Option<FetchedMessage> {
    let uid = fetch.uid?;
    Some(FetchedMessage {
        uid,
        size: fetch.size,
        envelope: fetch.envelope().map(convert_envelope),
        body: fetch.body().map(|b| b.to_vec()),
    })
}

#[async_trait]
impl MailboxService for ImapMailbox {
    async fn list_folders(&mut self) -> Result<Vec<FolderRef>> {
        let names = self.session.list(Some(""), Some("*")).await?;

        let names: Vec<_> = names.collect::<Vec<_>>().await;
        let mut folders = Vec::with_capacity(names.len());
        for name in names {
            folders.push(folder_from_name(&name?));
        }

        debug!("LIST returned {} folders", folders.len());
        Ok(folders)
    }

    async fn select_folder(&mut self, name: &str) -> Result<FolderStatus> {
        let mailbox = self.session.select(name).await?;
        Ok(FolderStatus {
            exists: mailbox.exists,
            uid_validity: mailbox.uid_validity,
        })
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let uids = self.session.uid_search(criteria.to_imap_query()).await?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch<'a>(&'a mut self, uids: &'a [u32], items: FetchItems) -> MessageStream<'a> {
        Box::pin(stream! {
            if uids.is_empty() {
                return;
            }

            let set = uid_set(uids);
            let query = items.to_imap_query();
            let fetches = match self.session.uid_fetch(&set, &query).await {
                Ok(fetches) => fetches,
                Err(e) => {
                    yield Err(CleanupError::from(e));
                    return;
                }
            };
            futures::pin_mut!(fetches);

            while let Some(item) = fetches.next().await {
                match item {
                    Ok(fetch) => match convert_fetch(&fetch) {
                        Some(message) => yield Ok(message),
                        // Unsolicited FETCH (e.g. a flag update) without a UID
                        None => debug!("Ignoring FETCH response without UID"),
                    },
                    Err(e) => {
                        yield Err(CleanupError::from(e));
                        break;
                    }
                }
            }
        })
    }

    async fn mark_deleted(&mut self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let responses = self
            .session
            .uid_store(uid_set(uids), "+FLAGS.SILENT (\\Deleted)")
            .await?;
        let responses: Vec<_> = responses.collect().await;
        for response in responses {
            response?;
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<usize> {
        let expunged = self.session.expunge().await?;
        let expunged: Vec<_> = expunged.collect().await;
        let mut count = 0;
        for seq in expunged {
            seq?;
            count += 1;
        }
        Ok(count)
    }

    async fn create_folder(&mut self, name: &str) -> Result<()> {
        self.session.create(name).await?;
        Ok(())
    }

    async fn append_message(
        &mut self,
        folder: &str,
        raw: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let date = imap_date_time(timestamp);
        self.session
            .append(folder, None, Some(date.as_str()), raw)
            .await?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        if let Err(e) = self.session.logout().await {
            warn!("LOGOUT failed: {}", e);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_uid_set_compresses_ranges() {
        assert_eq!(uid_set(&[1, 2, 3, 7, 9, 10]), "1:3,7,9:10");
    }

    #[test]
    fn test_uid_set_unsorted_with_duplicates() {
        assert_eq!(uid_set(&[5, 3, 4, 4, 1]), "1,3:5");
    }

    #[test]
    fn test_uid_set_single_and_empty() {
        assert_eq!(uid_set(&[42]), "42");
        assert_eq!(uid_set(&[]), "");
    }

    #[tokio::test]
    async fn test_read_greeting_accepts_ok() {
        let (local, mut remote) = tokio::io::duplex(256);
        remote.write_all(b"* OK IMAP4rev1 ready\r\n").await.unwrap();

        let mut client = Client::new(local);
        assert!(read_greeting(&mut client).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_greeting_on_closed_connection() {
        let (local, remote) = tokio::io::duplex(256);
        drop(remote);

        let mut client = Client::new(local);
        let result = read_greeting(&mut client).await;
        assert!(matches!(result, Err(CleanupError::NegotiationError(_))));
    }

    #[test]
    fn test_imap_date_time_format() {
        let ts = Utc.with_ymd_and_hms(1996, 7, 17, 2, 44, 25).unwrap();
        assert_eq!(imap_date_time(ts), "17-Jul-1996 02:44:25 +0000");
    }
}
