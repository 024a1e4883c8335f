//! Command-line interface

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::{InquireError, Password};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::archive::{self, BackupReport, RestoreReport};
use crate::client::{ImapMailbox, MailboxService};
use crate::config::Config;
use crate::dispatcher::{DeletionDispatcher, DeletionOutcome};
use crate::error::{CleanupError, Result};
use crate::folders::enumerate_folders;
use crate::interactive::{
    confirm_and_delete_match, key_column_width, DeleteSession, PageState, SessionSummary,
    StdinLines, TableOptions,
};
use crate::models::{FolderRef, GroupField, ServerAddr};
use crate::resolver::{self, DnsMxLookup, TlsProber};
use crate::scanner::{MailboxScanner, ScanMode, ScanOptions, ScanReport};
use crate::transport;

#[derive(Parser, Debug)]
#[command(name = "imap-cleanup")]
#[command(version = "0.1.0")]
#[command(about = "Inspect, back up, restore and bulk-delete mail over IMAP", long_about = None)]
pub struct Cli {
    /// Account address, also used as the login name
    #[arg(short, long, global = true)]
    pub email: Option<String>,

    /// Account password (prompted when omitted)
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// IMAP server as host:port (guessed from the address when omitted)
    #[arg(long, global = true)]
    pub imap: Option<ServerAddr>,

    /// Permit unencrypted IMAP as a last resort on the plaintext port
    #[arg(long, global = true)]
    pub allow_plain: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "imap-cleanup.toml")]
    pub config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rank messages by sender, recipient or subject and delete groups interactively
    Stats {
        /// Header to group by
        #[arg(short, long, value_enum)]
        field: Option<GroupField>,

        /// Also total up message sizes
        #[arg(long)]
        size: bool,
    },

    /// Delete every message whose header contains TEXT (case-insensitive)
    Match {
        text: String,

        /// Header to match against
        #[arg(short, long, value_enum)]
        field: Option<GroupField>,
    },

    /// Write every message into a gzip-compressed tar archive
    Backup { file: PathBuf },

    /// Append every message of an archive back into the mailbox
    Restore { file: PathBuf },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "imap-cleanup.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a MultiProgress with the log writer so log lines print above the bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a `stats` run
#[derive(Debug, Default)]
pub struct StatsSummary {
    pub messages: usize,
    pub groups: usize,
    pub skipped_folders: usize,
    pub session: SessionSummary,
}

/// Outcome of a `match` run
#[derive(Debug, Default)]
pub struct MatchSummary {
    pub matched: usize,
    pub megabytes: f64,
    pub skipped_folders: usize,
    pub deleted: usize,
    pub failed_folders: usize,
}

fn prompt_password(email: &str) -> Result<String> {
    Password::new(&format!("IMAP password for {}:", email))
        .without_confirmation()
        .prompt()
        .map_err(|e| match e {
            InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                CleanupError::UserDeclined
            }
            other => CleanupError::InvalidInput(format!("Could not read password: {}", other)),
        })
}

/// Resolve, negotiate and log in
pub async fn connect(cli: &Cli, config: &Config, reporter: &ProgressReporter) -> Result<ImapMailbox> {
    let email = cli
        .email
        .as_deref()
        .ok_or_else(|| CleanupError::InvalidInput("--email is required".to_string()))?;

    let password = match &cli.password {
        Some(password) => password.clone(),
        None => prompt_password(email)?,
    };

    let addr = match &cli.imap {
        Some(addr) => addr.clone(),
        None => {
            let spinner = reporter.add_spinner(&format!("Looking up IMAP server for {}...", email));
            let prober = TlsProber::new(config.connection.probe_timeout());
            let mx = DnsMxLookup::new();
            let addr = resolver::resolve(email, &config.connection, &prober, &mx).await;
            spinner.finish_and_clear();
            let addr = addr?;
            println!("  ✓ Using server {}", addr);
            addr
        }
    };

    let connection = transport::negotiate(&addr, &config.connection, cli.allow_plain).await?;

    let spinner = reporter.add_spinner(&format!("Logging in as {}...", email));
    let mailbox = ImapMailbox::login(connection, email, &password).await;
    spinner.finish_and_clear();
    let mailbox = mailbox?;
    println!("  ✓ Logged in as {}", email);

    Ok(mailbox)
}

async fn finish_session<S: MailboxService + ?Sized>(service: &mut S) {
    if let Err(e) = service.logout().await {
        warn!("Logout failed: {}", e);
    }
}

async fn list_folders<S>(service: &mut S, reporter: &ProgressReporter) -> Result<Vec<FolderRef>>
where
    S: MailboxService + ?Sized,
{
    let spinner = reporter.add_spinner("Listing folders...");
    let folders = enumerate_folders(service).await;
    spinner.finish_and_clear();
    let folders = folders?;
    println!("  ✓ Found {} folders", folders.len());
    Ok(folders)
}

async fn scan_with_progress<S>(
    service: &mut S,
    folders: &[FolderRef],
    options: ScanOptions,
    reporter: &ProgressReporter,
) -> ScanReport
where
    S: MailboxService + ?Sized,
{
    let label = options.mode.counter_label();
    let spinner = reporter.add_spinner("Scanning folders...");
    let scanner = MailboxScanner::new(options);

    let report = scanner
        .scan(service, folders, |p| {
            spinner.set_message(format!(
                "folders:{}/{} {}:{}",
                p.folders_done, p.folders_total, label, p.count
            ))
        })
        .await;

    reporter.finish_spinner(
        &spinner,
        &format!(
            "Scanned {} folders, {} {}",
            folders.len(),
            report.total_messages,
            label
        ),
    );
    print_skipped(report.skipped_folders().into_iter());
    report
}

fn print_skipped<'a>(skipped: impl Iterator<Item = (&'a str, &'a str)>) {
    let skipped: Vec<_> = skipped.collect();
    if skipped.is_empty() {
        return;
    }
    println!("\n⚠️  Skipped {} folder(s):", skipped.len());
    for (folder, reason) in skipped {
        println!("  - {}: {}", folder, reason);
    }
}

fn log_identifier_policy() {
    info!("Deleting by UID captured at scan time; folders whose UIDVALIDITY changed are refused");
}

/// `stats`: rank groups, then run the interactive delete session
pub async fn run_stats(
    cli: &Cli,
    config: &Config,
    field: GroupField,
    size: bool,
    multi: MultiProgress,
) -> Result<StatsSummary> {
    let reporter = ProgressReporter::with_multi_progress(multi);
    let mut mailbox = connect(cli, config, &reporter).await?;

    let result = stats_session(&mut mailbox, config, field, size, &reporter).await;
    finish_session(&mut mailbox).await;
    result
}

async fn stats_session<S>(
    service: &mut S,
    config: &Config,
    field: GroupField,
    size: bool,
    reporter: &ProgressReporter,
) -> Result<StatsSummary>
where
    S: MailboxService + ?Sized,
{
    let folders = list_folders(service, reporter).await?;
    let options = ScanOptions {
        mode: ScanMode::Statistics,
        field,
        size_accounting: size,
        subject_max_chars: config.scan.subject_max_chars,
    };
    let report = scan_with_progress(service, &folders, options, reporter).await;

    let mut summary = StatsSummary {
        messages: report.total_messages,
        groups: report.groups.len(),
        skipped_folders: report.skipped_folders().len(),
        session: SessionSummary::default(),
    };

    if !report.groups.is_empty() {
        log_identifier_policy();
    }

    let table = TableOptions {
        field,
        show_sizes: size,
        key_width: key_column_width(config.display.key_column_width, size),
    };
    let mut session = DeleteSession::new(
        service,
        DeletionDispatcher::new(config.delete.batch_size),
        StdinLines,
        io::stdout(),
        PageState::new(report.groups, config.display.page_size),
        table,
    );
    summary.session = session.run().await?;

    Ok(summary)
}

/// `match`: collect every matching message into one group and offer to delete it
pub async fn run_match(
    cli: &Cli,
    config: &Config,
    text: &str,
    field: GroupField,
    multi: MultiProgress,
) -> Result<MatchSummary> {
    let mode = ScanMode::matching(text)?;
    let reporter = ProgressReporter::with_multi_progress(multi);
    let mut mailbox = connect(cli, config, &reporter).await?;

    let result = match_session(&mut mailbox, config, mode, field, &reporter).await;
    finish_session(&mut mailbox).await;
    result
}

async fn match_session<S>(
    service: &mut S,
    config: &Config,
    mode: ScanMode,
    field: GroupField,
    reporter: &ProgressReporter,
) -> Result<MatchSummary>
where
    S: MailboxService + ?Sized,
{
    let folders = list_folders(service, reporter).await?;
    let options = ScanOptions {
        mode,
        field,
        size_accounting: true,
        subject_max_chars: config.scan.subject_max_chars,
    };
    let report = scan_with_progress(service, &folders, options, reporter).await;

    let mut summary = MatchSummary {
        skipped_folders: report.skipped_folders().len(),
        ..MatchSummary::default()
    };

    let Some(group) = report.target_group() else {
        println!("Nothing matches");
        return Ok(summary);
    };
    summary.matched = group.count;
    summary.megabytes = group.total_megabytes();

    log_identifier_policy();
    let dispatcher = DeletionDispatcher::new(config.delete.batch_size);
    let deletion = confirm_and_delete_match(
        service,
        &dispatcher,
        group,
        &mut StdinLines,
        &mut io::stdout(),
    )
    .await?;

    summary.deleted = deletion.total_deleted();
    summary.failed_folders = deletion
        .folders
        .iter()
        .filter(|f| !matches!(f.outcome, DeletionOutcome::Succeeded { .. }))
        .count();
    Ok(summary)
}

/// `backup`: stream every folder into `file`
pub async fn run_backup(
    cli: &Cli,
    config: &Config,
    file: &Path,
    multi: MultiProgress,
) -> Result<BackupReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);
    let mut mailbox = connect(cli, config, &reporter).await?;

    let result = backup_session(&mut mailbox, file, &reporter).await;
    finish_session(&mut mailbox).await;
    result
}

async fn backup_session<S>(service: &mut S, file: &Path, reporter: &ProgressReporter) -> Result<BackupReport>
where
    S: MailboxService + ?Sized,
{
    let folders = list_folders(service, reporter).await?;

    let bar = reporter.add_progress_bar(folders.len() as u64, "Backing up...");
    let report = archive::backup(service, &folders, file, |p| {
        bar.set_position(p.visited as u64);
        bar.set_message(format!("folders:{} msgs:{}", p.folders, p.messages))
    })
    .await;
    bar.finish_and_clear();
    let report = report?;

    println!(
        "  ✓ Archived {} messages from {} folders to {}",
        report.messages,
        report.folders,
        file.display()
    );
    print_skipped(
        report
            .skipped
            .iter()
            .map(|(folder, reason)| (folder.as_str(), reason.as_str())),
    );
    Ok(report)
}

/// `restore`: append the contents of `file` back into the mailbox
pub async fn run_restore(
    cli: &Cli,
    config: &Config,
    file: &Path,
    multi: MultiProgress,
) -> Result<RestoreReport> {
    if !file.is_file() {
        return Err(CleanupError::ArchiveIoError(format!(
            "{} does not exist or is not a file",
            file.display()
        )));
    }

    let reporter = ProgressReporter::with_multi_progress(multi);
    let mut mailbox = connect(cli, config, &reporter).await?;

    let spinner = reporter.add_spinner("Restoring...");
    let result = archive::restore(&mut mailbox, file, |n| spinner.set_message(format!("msgs:{}", n))).await;
    spinner.finish_and_clear();
    finish_session(&mut mailbox).await;
    let report = result?;

    println!(
        "  ✓ Restored {} messages ({} folders created)",
        report.restored, report.folders_created
    );
    if !report.failed.is_empty() {
        println!("\n⚠️  {} message(s) could not be restored:", report.failed.len());
        for (path, reason) in &report.failed {
            println!("  - {}: {}", path, reason);
        }
    }
    Ok(report)
}
