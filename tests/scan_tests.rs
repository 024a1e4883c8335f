//! Scan engine tests against an in-memory mailbox

mod common;

use common::FakeMailbox;
use imap_cleanup::folders::enumerate_folders;
use imap_cleanup::models::GroupField;
use imap_cleanup::scanner::{FolderOutcome, MailboxScanner, ScanMode, ScanOptions, ScanProgress};

fn stats(field: GroupField, sizes: bool) -> MailboxScanner {
    MailboxScanner::new(ScanOptions {
        mode: ScanMode::Statistics,
        field,
        size_accounting: sizes,
        subject_max_chars: 60,
    })
}

fn matching(text: &str, field: GroupField) -> MailboxScanner {
    MailboxScanner::new(ScanOptions {
        mode: ScanMode::matching(text).unwrap(),
        field,
        size_accounting: false,
        subject_max_chars: 60,
    })
}

#[tokio::test]
async fn test_stats_groups_across_folders_ranked_by_count() {
    let mut mailbox = FakeMailbox::new()
        .with_folder("INBOX")
        .with_folder("A")
        .with_folder("B")
        .with_folder("C");
    mailbox.fill("A", "x@example.com", 5);
    mailbox.fill("A", "y@example.com", 3);

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = stats(GroupField::From, false)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.groups[0].key, "x@example.com");
    assert_eq!(report.groups[0].count, 5);
    assert_eq!(report.groups[1].key, "y@example.com");
    assert_eq!(report.groups[1].count, 3);
    assert_eq!(report.total_messages, 8);
    assert!(report.skipped_folders().is_empty());
}

#[tokio::test]
async fn test_stats_counts_sum_to_total_and_uids_are_unique() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX").with_folder("Archive");
    for i in 0..40 {
        let folder = if i % 3 == 0 { "Archive" } else { "INBOX" };
        mailbox.add(
            folder,
            &format!("sender{}@example.com", i % 7),
            "me@example.com",
            "hello",
        );
    }

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = stats(GroupField::From, true)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    let sum: usize = report.groups.iter().map(|g| g.count).sum();
    assert_eq!(sum, 40);
    assert_eq!(report.total_messages, 40);

    let mut seen = std::collections::HashSet::new();
    for group in &report.groups {
        let listed: usize = group.messages_by_folder.iter().map(|f| f.uids.len()).sum();
        assert_eq!(listed, group.count);
        assert!(group.total_bytes > 0);
        for folder in &group.messages_by_folder {
            for uid in &folder.uids {
                assert!(seen.insert((folder.folder.clone(), *uid)));
            }
        }
    }
}

#[tokio::test]
async fn test_group_by_recipient_and_subject() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX");
    mailbox.add("INBOX", "a@example.com", "list@example.org", "Weekly digest");
    mailbox.add("INBOX", "b@example.com", "list@example.org", "Weekly digest");
    mailbox.add("INBOX", "c@example.com", "me@example.com", "Invoice");

    let folders = enumerate_folders(&mut mailbox).await.unwrap();

    let by_to = stats(GroupField::To, false)
        .scan(&mut mailbox, &folders, |_| {})
        .await;
    assert_eq!(by_to.groups[0].key, "list@example.org");
    assert_eq!(by_to.groups[0].count, 2);

    let by_subject = stats(GroupField::Subject, false)
        .scan(&mut mailbox, &folders, |_| {})
        .await;
    assert_eq!(by_subject.groups[0].key, "Weekly digest");
    assert_eq!(by_subject.groups[1].key, "Invoice");
}

#[tokio::test]
async fn test_match_is_case_insensitive_across_folders() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX").with_folder("Junk");
    for i in 0..7 {
        mailbox.add("INBOX", "promo@shop.com", "me@example.com", &format!("SPAM offer {}", i));
    }
    for i in 0..5 {
        mailbox.add("Junk", "x@y.com", "me@example.com", &format!("more Spam {}", i));
    }
    mailbox.add("INBOX", "boss@work.com", "me@example.com", "Quarterly plan");

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = matching("spam", GroupField::Subject)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    assert_eq!(report.groups.len(), 1);
    let group = report.target_group().unwrap();
    assert_eq!(group.key, "spam");
    assert_eq!(group.count, 12);
    assert!(group.total_bytes > 0);

    let per_folder: Vec<_> = group
        .messages_by_folder
        .iter()
        .map(|f| (f.folder.as_str(), f.uids.len()))
        .collect();
    assert_eq!(per_folder, vec![("INBOX", 7), ("Junk", 5)]);
}

#[tokio::test]
async fn test_match_filters_imprecise_server_search() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX").with_folder("Junk");
    mailbox.loose_search = true;
    for i in 0..4 {
        mailbox.add("INBOX", "a@example.com", "me@example.com", &format!("Spam deal {}", i));
    }
    mailbox.fill("INBOX", "b@example.com", 6);
    mailbox.add("Junk", "c@example.com", "me@example.com", "SPAM again");
    mailbox.fill("Junk", "d@example.com", 3);

    let expected = mailbox
        .folders
        .iter()
        .flat_map(|f| f.messages.iter())
        .filter(|m| {
            m.envelope
                .subject
                .as_deref()
                .unwrap_or_default()
                .to_lowercase()
                .contains("spam")
        })
        .count();

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = matching("spam", GroupField::Subject)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    let group = report.target_group().unwrap();
    assert_eq!(expected, 5);
    assert_eq!(group.count, expected);
    assert_eq!(report.total_messages, expected);
}

#[tokio::test]
async fn test_match_non_ascii_text_filters_locally() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX");
    mailbox.add("INBOX", "a@example.com", "me@example.com", "Grüße aus Wien");
    mailbox.add("INBOX", "b@example.com", "me@example.com", "=?UTF-8?Q?Gr=C3=BC=C3=9Fe?=");
    mailbox.add("INBOX", "c@example.com", "me@example.com", "Greetings");
    mailbox.add("INBOX", "d@example.com", "me@example.com", "VIELE GRÜSSE");

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = matching("GRÜßE", GroupField::Subject)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    let group = report.target_group().unwrap();
    assert_eq!(group.count, 2);
    assert!(report.skipped_folders().is_empty());
}

#[tokio::test]
async fn test_match_nothing_yields_no_group() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX");
    mailbox.fill("INBOX", "a@example.com", 3);

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = matching("nomatch", GroupField::From)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    assert!(report.target_group().is_none());
    assert_eq!(report.total_messages, 0);
}

#[tokio::test]
async fn test_failing_folder_is_skipped_and_scan_continues() {
    let mut mailbox = FakeMailbox::new()
        .with_folder("INBOX")
        .with_folder("Broken")
        .with_folder("Sent");
    mailbox.fill("INBOX", "a@example.com", 2);
    mailbox.fill("Broken", "a@example.com", 4);
    mailbox.fill("Sent", "a@example.com", 1);
    mailbox.fail_fetch.insert("Broken".to_string());

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = stats(GroupField::From, false)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    assert_eq!(report.total_messages, 3);
    let skipped = report.skipped_folders();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].0, "Broken");
    assert!(matches!(
        report.folders.iter().find(|f| f.folder == "Sent").unwrap().outcome,
        FolderOutcome::Processed(1)
    ));
}

#[tokio::test]
async fn test_unselectable_folders_never_scanned() {
    let mut mailbox = FakeMailbox::new()
        .with_folder("INBOX")
        .with_unselectable("[Gmail]");
    mailbox.fill("INBOX", "a@example.com", 1);

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let report = stats(GroupField::From, false)
        .scan(&mut mailbox, &folders, |_| {})
        .await;

    assert_eq!(report.folders.len(), 1);
    assert_eq!(report.folders[0].folder, "INBOX");
}

#[tokio::test]
async fn test_progress_reported_per_folder() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX").with_folder("Sent");
    mailbox.fill("INBOX", "a@example.com", 2);
    mailbox.fill("Sent", "b@example.com", 3);

    let folders = enumerate_folders(&mut mailbox).await.unwrap();
    let mut updates = Vec::new();
    stats(GroupField::From, false)
        .scan(&mut mailbox, &folders, |p| updates.push(p))
        .await;

    assert_eq!(
        updates,
        vec![
            ScanProgress {
                folders_done: 1,
                folders_total: 2,
                count: 2
            },
            ScanProgress {
                folders_done: 2,
                folders_total: 2,
                count: 5
            },
        ]
    );
}

#[tokio::test]
async fn test_enumeration_failure_is_reported() {
    let mut mailbox = FakeMailbox::new().with_folder("INBOX");
    mailbox.fail_list = true;

    let result = enumerate_folders(&mut mailbox).await;
    assert!(matches!(
        result,
        Err(imap_cleanup::CleanupError::EnumerationError(_))
    ));
}
