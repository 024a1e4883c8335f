//! Folder enumeration: selectable folders only, INBOX first

use tracing::{debug, info};

use crate::client::MailboxService;
use crate::error::{CleanupError, Result};
use crate::models::{FolderRef, INBOX};

/// Selectable folders with INBOX first.
///
/// INBOX is synthesized when the listing omits it. Only a failing LIST call
/// is an error; an empty listing still yields `[INBOX]`.
pub async fn enumerate_folders<S: MailboxService + ?Sized>(service: &mut S) -> Result<Vec<FolderRef>> {
    let listed = service
        .list_folders()
        .await
        .map_err(|e| CleanupError::EnumerationError(e.to_string()))?;

    Ok(order_folders(listed))
}

fn order_folders(listed: Vec<FolderRef>) -> Vec<FolderRef> {
    let total = listed.len();
    let mut inbox: Option<FolderRef> = None;
    let mut others = Vec::with_capacity(total);

    for folder in listed {
        if !folder.selectable {
            debug!("Skipping non-selectable folder {}", folder.name);
            continue;
        }
        if folder.is_inbox() {
            if inbox.is_none() {
                inbox = Some(folder);
            }
            continue;
        }
        others.push(folder);
    }

    let inbox = inbox.unwrap_or_else(|| {
        debug!("Listing omitted INBOX, adding it");
        FolderRef::new(INBOX)
    });

    let mut folders = Vec::with_capacity(others.len() + 1);
    folders.push(inbox);
    folders.extend(others);

    info!("Found {} selectable folders ({} listed)", folders.len(), total);
    folders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(name: &str, selectable: bool) -> FolderRef {
        FolderRef {
            name: name.to_string(),
            selectable,
        }
    }

    fn names(folders: &[FolderRef]) -> Vec<&str> {
        folders.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_inbox_moved_first() {
        let folders = order_folders(vec![
            folder("Sent", true),
            folder("INBOX", true),
            folder("Archive", true),
        ]);
        assert_eq!(names(&folders), vec!["INBOX", "Sent", "Archive"]);
    }

    #[test]
    fn test_non_selectable_excluded() {
        let folders = order_folders(vec![
            folder("INBOX", true),
            folder("[Gmail]", false),
            folder("[Gmail]/Sent Mail", true),
        ]);
        assert_eq!(names(&folders), vec!["INBOX", "[Gmail]/Sent Mail"]);
    }

    #[test]
    fn test_inbox_synthesized_when_missing() {
        let folders = order_folders(vec![folder("Sent", true)]);
        assert_eq!(names(&folders), vec!["INBOX", "Sent"]);
        assert!(folders[0].selectable);
    }

    #[test]
    fn test_empty_listing_yields_inbox() {
        let folders = order_folders(Vec::new());
        assert_eq!(names(&folders), vec!["INBOX"]);
    }

    #[test]
    fn test_inbox_name_case_preserved() {
        let folders = order_folders(vec![folder("Junk", true), folder("Inbox", true)]);
        assert_eq!(names(&folders), vec!["Inbox", "Junk"]);
    }
}
