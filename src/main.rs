use anyhow::Result;
use clap::Parser;
use imap_cleanup::cli::{self, Cli, Commands};
use imap_cleanup::config::Config;
use imap_cleanup::error::CleanupError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "log buffer poisoned"))?;
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl MultiProgressMakeWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self { multi }
    }
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Answering "no" is a normal way to end a run
        if matches!(e.downcast_ref::<CleanupError>(), Some(err) if err.is_decline()) {
            println!("Aborted. Nothing was deleted.");
            return;
        }
        display_error(&e);
        eprintln!("\nFor help, run: imap-cleanup --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // rustls needs one process-wide crypto provider: aws-lc-rs, or ring on Windows
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("imap_cleanup=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("imap_cleanup=info,warn,error"))
    };

    // Shared between progress bars and the log writer
    let multi_progress = Arc::new(MultiProgress::new());
    let make_writer = MultiProgressMakeWriter::new(Arc::clone(&multi_progress));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if let Commands::InitConfig { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    let config = Config::load(&cli.config).await?;

    match &cli.command {
        Commands::Stats { field, size } => {
            let field = field.unwrap_or(config.scan.default_field);
            tracing::info!("Starting statistics run grouped by {}", field);

            let summary =
                cli::run_stats(&cli, &config, field, *size, (*multi_progress).clone()).await?;

            println!("\n========================================");
            println!("Statistics Summary");
            println!("========================================");
            println!("Messages scanned: {}", summary.messages);
            println!("Groups: {}", summary.groups);
            println!("Folders skipped: {}", summary.skipped_folders);
            println!("Groups deleted: {}", summary.session.groups_deleted);
            println!("Messages deleted: {}", summary.session.messages_deleted);
            println!("========================================");
        }

        Commands::Match { text, field } => {
            let field = field.unwrap_or(config.scan.default_field);
            tracing::info!("Starting match run for {:?} in {}", text, field);

            let summary =
                cli::run_match(&cli, &config, text, field, (*multi_progress).clone()).await?;

            println!("\n========================================");
            println!("Match Summary");
            println!("========================================");
            println!("Messages matched: {}", summary.matched);
            println!("Size: {:.1} MB", summary.megabytes);
            println!("Folders skipped: {}", summary.skipped_folders);
            println!("Messages deleted: {}", summary.deleted);
            if summary.failed_folders > 0 {
                println!("Folders with failed deletions: {}", summary.failed_folders);
            }
            println!("========================================");
        }

        Commands::Backup { file } => {
            tracing::info!("Starting backup to {:?}", file);

            let report = cli::run_backup(&cli, &config, file, (*multi_progress).clone()).await?;

            println!("\n========================================");
            println!("Backup Summary");
            println!("========================================");
            println!("Archive: {:?}", file);
            println!("Folders: {}", report.folders);
            println!("Messages archived: {}", report.messages);
            println!("Folders skipped: {}", report.skipped.len());
            println!("========================================");
        }

        Commands::Restore { file } => {
            tracing::info!("Starting restore from {:?}", file);

            let report = cli::run_restore(&cli, &config, file, (*multi_progress).clone()).await?;

            println!("\n========================================");
            println!("Restore Summary");
            println!("========================================");
            println!("Archive: {:?}", file);
            println!("Messages restored: {}", report.restored);
            println!("Folders created: {}", report.folders_created);
            println!("Messages failed: {}", report.failed.len());
            println!("========================================");
        }

        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

async fn init_config(output: &std::path::Path, force: bool) -> Result<()> {
    tracing::info!("Generating example configuration file");

    if output.exists() && !force {
        return Err(CleanupError::ConfigError(format!(
            "Configuration file already exists at {:?}. Use --force to overwrite.",
            output
        ))
        .into());
    }

    Config::create_example(output).await?;

    println!("Created example configuration file at: {:?}", output);
    println!("\nPlease edit this file to customize your settings.");
    println!("Key settings to review:");
    println!("  - connection.probe_prefixes: Host prefixes tried when guessing the server");
    println!("  - scan.default_field: Header used when --field is not given");
    println!("  - display.page_size: Groups shown per page in the delete session");
    println!("  - delete.batch_size: UIDs flagged per STORE command");

    Ok(())
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(cleanup_err) = error.downcast_ref::<CleanupError>() {
        if cleanup_err.is_fatal() {
            eprintln!("\nThe run stopped before touching any message.");
        }
        match cleanup_err {
            CleanupError::ResolutionError(_) => {
                eprintln!("\nHint: The server could not be guessed from the address.");
                eprintln!("      Pass it explicitly: --imap imap.example.com:993");
            }
            CleanupError::NegotiationError(_) => {
                eprintln!("\nHint: No secure connection could be established.");
                eprintln!("      Check the host and port. On port 143 you may add --allow-plain");
                eprintln!("      if you accept sending credentials unencrypted.");
            }
            CleanupError::AuthError(_) => {
                eprintln!("\nHint: Check the address and password.");
                eprintln!("      Some providers require an app-specific password for IMAP.");
            }
            CleanupError::EnumerationError(_) => {
                eprintln!("\nHint: The server refused to list folders.");
                eprintln!("      Try running the command again.");
            }
            CleanupError::ArchiveIoError(_) => {
                eprintln!("\nHint: Check that the archive path is readable/writable");
                eprintln!("      and that the file is a .tar.gz produced by the backup command.");
            }
            CleanupError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: imap-cleanup init-config --force");
            }
            _ => {}
        }
    }
}
