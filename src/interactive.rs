//! Interactive deletion over scan results
//!
//! Statistics mode shows the ranked groups a page at a time and accepts one
//! command per line:
//!
//! - `<number>`: delete the group at that position on the current page
//!   (asks for confirmation first)
//! - `n` / `p`: next / previous page
//! - `q`: quit
//!
//! Match mode skips paging and asks a single yes/no question for the whole
//! match. Input comes from a [`LineSource`] so the session can be driven by
//! scripted input.

use crossterm::style::Stylize;
use crossterm::terminal;
use std::collections::VecDeque;
use std::io::{self, Write};
use tracing::{debug, info};

use crate::aggregator::{bytes_to_megabytes, Group};
use crate::classifier::truncate_with_ellipsis;
use crate::client::MailboxService;
use crate::dispatcher::{DeletionDispatcher, DeletionOutcome, DeletionReport};
use crate::error::{CleanupError, Result};
use crate::models::GroupField;

pub const COMMAND_PROMPT: &str = "num=del  n/p  q : ";
pub const INVALID_NOTICE: &str = "bad input";
pub const END_NOTICE: &str = "End";

/// Source of operator input, one line at a time
pub trait LineSource {
    /// Show `prompt` and read one line; `None` at end of input
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Reads lines from the terminal
pub struct StdinLines;

impl LineSource for StdinLines {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{}", prompt);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        Ok(Some(input))
    }
}

/// Pre-recorded input, e.g. for tests or piped command lists
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: VecDeque<String>,
    prompts: Vec<String>,
}

impl ScriptedLines {
    pub fn new<I, T>(lines: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        }
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl LineSource for ScriptedLines {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        self.prompts.push(prompt.to_string());
        Ok(self.lines.pop_front())
    }
}

/// Parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 1-based position on the current page
    Select(usize),
    Next,
    Prev,
    Quit,
    Invalid(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let input = line.trim().to_lowercase();
        match input.as_str() {
            "n" => Command::Next,
            "p" => Command::Prev,
            "q" => Command::Quit,
            other => match other.parse::<usize>() {
                Ok(n) if n > 0 => Command::Select(n),
                _ => Command::Invalid(other.to_string()),
            },
        }
    }
}

fn is_affirmative(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Ranked groups plus the page currently shown
#[derive(Debug, Clone)]
pub struct PageState {
    page_index: usize,
    page_size: usize,
    groups: Vec<Group>,
}

impl PageState {
    pub fn new(groups: Vec<Group>, page_size: usize) -> Self {
        Self {
            page_index: 0,
            page_size: page_size.max(1),
            groups,
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// At least one page, even when empty
    pub fn page_count(&self) -> usize {
        self.groups.len().div_ceil(self.page_size).max(1)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn page_start(&self) -> usize {
        self.page_index * self.page_size
    }

    pub fn current_page(&self) -> &[Group] {
        let start = self.page_start().min(self.groups.len());
        let end = (start + self.page_size).min(self.groups.len());
        &self.groups[start..end]
    }

    /// Advance one page; false (and no change) on the last page
    pub fn next(&mut self) -> bool {
        if self.page_index + 1 < self.page_count() {
            self.page_index += 1;
            true
        } else {
            false
        }
    }

    /// Go back one page; false (and no change) on the first page
    pub fn prev(&mut self) -> bool {
        if self.page_index > 0 {
            self.page_index -= 1;
            true
        } else {
            false
        }
    }

    /// Index into all groups for a 1-based position on the current page
    pub fn resolve(&self, position: usize) -> Option<usize> {
        if position == 0 || position > self.current_page().len() {
            return None;
        }
        Some(self.page_start() + position - 1)
    }

    pub fn get(&self, index: usize) -> Option<&Group> {
        self.groups.get(index)
    }

    /// Drop a group; steps back a page if the current one fell off the end
    pub fn remove(&mut self, index: usize) -> Option<Group> {
        if index >= self.groups.len() {
            return None;
        }
        let group = self.groups.remove(index);
        if self.page_index > 0 && self.page_start() >= self.groups.len() {
            self.page_index -= 1;
        }
        Some(group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Listing,
    AwaitingCommand,
    AwaitingConfirmation(usize),
    Deleting(usize),
    Terminal,
}

/// Rendering options for the group table
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    pub field: GroupField,
    pub show_sizes: bool,
    pub key_width: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub groups_deleted: usize,
    pub messages_deleted: usize,
}

/// Paginated delete workflow over a mailbox
pub struct DeleteSession<'a, S: ?Sized, L, W> {
    service: &'a mut S,
    dispatcher: DeletionDispatcher,
    input: L,
    out: W,
    pages: PageState,
    table: TableOptions,
    state: SessionState,
    summary: SessionSummary,
}

impl<'a, S, L, W> DeleteSession<'a, S, L, W>
where
    S: MailboxService + ?Sized,
    L: LineSource,
    W: Write,
{
    pub fn new(
        service: &'a mut S,
        dispatcher: DeletionDispatcher,
        input: L,
        out: W,
        pages: PageState,
        table: TableOptions,
    ) -> Self {
        Self {
            service,
            dispatcher,
            input,
            out,
            pages,
            table,
            state: SessionState::Listing,
            summary: SessionSummary::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pages(&self) -> &PageState {
        &self.pages
    }

    pub fn input(&self) -> &L {
        &self.input
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Drive the state machine until the operator quits or input ends
    pub async fn run(&mut self) -> Result<SessionSummary> {
        if self.pages.is_empty() {
            writeln!(self.out, "Mailbox empty")?;
            self.state = SessionState::Terminal;
        }

        while self.state != SessionState::Terminal {
            self.state = self.step().await?;
        }

        info!(
            "Delete session finished: {} groups, {} messages deleted",
            self.summary.groups_deleted, self.summary.messages_deleted
        );
        Ok(self.summary)
    }

    async fn step(&mut self) -> Result<SessionState> {
        match self.state {
            SessionState::Listing => {
                render_page(&mut self.out, &self.pages, &self.table)?;
                Ok(SessionState::AwaitingCommand)
            }
            SessionState::AwaitingCommand => {
                let Some(line) = self.input.read_line(COMMAND_PROMPT)? else {
                    return Ok(SessionState::Terminal);
                };
                Ok(self.handle_command(Command::parse(&line))?)
            }
            SessionState::AwaitingConfirmation(index) => {
                let Some(group) = self.pages.get(index) else {
                    return Ok(SessionState::Listing);
                };
                let prompt = format!("Delete ALL for \"{}\" ({})? (y/N) ", group.key, group.count);
                match self.input.read_line(&prompt)? {
                    Some(answer) if is_affirmative(&answer) => Ok(SessionState::Deleting(index)),
                    Some(_) => Ok(SessionState::AwaitingCommand),
                    None => Ok(SessionState::Terminal),
                }
            }
            SessionState::Deleting(index) => {
                self.delete_group(index).await?;
                if self.pages.is_empty() {
                    writeln!(self.out, "Nothing left")?;
                    return Ok(SessionState::Terminal);
                }
                Ok(SessionState::Listing)
            }
            SessionState::Terminal => Ok(SessionState::Terminal),
        }
    }

    fn handle_command(&mut self, command: Command) -> Result<SessionState> {
        debug!("Command: {:?} on page {}", command, self.pages.page_index());
        let next = match command {
            Command::Select(position) => match self.pages.resolve(position) {
                Some(index) => SessionState::AwaitingConfirmation(index),
                None => {
                    writeln!(self.out, "{}", INVALID_NOTICE.red())?;
                    SessionState::Listing
                }
            },
            Command::Next => {
                if !self.pages.next() {
                    writeln!(self.out, "{}", END_NOTICE)?;
                }
                SessionState::Listing
            }
            Command::Prev => {
                self.pages.prev();
                SessionState::Listing
            }
            Command::Quit => SessionState::Terminal,
            Command::Invalid(_) => {
                writeln!(self.out, "{}", INVALID_NOTICE.red())?;
                SessionState::Listing
            }
        };
        Ok(next)
    }

    async fn delete_group(&mut self, index: usize) -> Result<()> {
        let Some(group) = self.pages.get(index) else {
            return Ok(());
        };
        info!("Deleting group {:?} ({} messages)", group.key, group.count);

        let report = self
            .dispatcher
            .dispatch(&mut *self.service, &group.messages_by_folder)
            .await;
        write_deletion_report(&mut self.out, &report)?;

        // A group whose deletion failed everywhere stays listed
        if report.any_applied() {
            self.pages.remove(index);
            self.summary.groups_deleted += 1;
        }
        self.summary.messages_deleted += report.total_deleted();
        Ok(())
    }
}

/// Single summary and yes/no prompt for a match scan.
///
/// Returns `UserDeclined` when the operator does not confirm.
pub async fn confirm_and_delete_match<S, L, W>(
    service: &mut S,
    dispatcher: &DeletionDispatcher,
    group: &Group,
    input: &mut L,
    out: &mut W,
) -> Result<DeletionReport>
where
    S: MailboxService + ?Sized,
    L: LineSource,
    W: Write,
{
    writeln!(out)?;
    writeln!(
        out,
        "Matches for \"{}\" in {} folder(s):",
        group.key,
        group.folder_count()
    )?;
    for folder in &group.messages_by_folder {
        writeln!(out, "  {:<30} {:>7}", folder.folder, folder.uids.len())?;
    }
    writeln!(
        out,
        "Total: {} msgs  {:.1} MB",
        group.count,
        group.total_megabytes()
    )?;
    out.flush()?;

    match input.read_line("Delete? (y/N) ")? {
        Some(answer) if is_affirmative(&answer) => {}
        _ => return Err(CleanupError::UserDeclined),
    }

    let report = dispatcher.dispatch(service, &group.messages_by_folder).await;
    write_deletion_report(out, &report)?;
    Ok(report)
}

/// Per-folder outcome lines followed by the total
pub fn write_deletion_report<W: Write>(out: &mut W, report: &DeletionReport) -> Result<()> {
    for folder in &report.folders {
        match &folder.outcome {
            DeletionOutcome::Succeeded { deleted } => {
                writeln!(out, "  ✓ {}: deleted {}", folder.folder, deleted)?
            }
            DeletionOutcome::PartiallyFailed { flagged, reason } => writeln!(
                out,
                "  {} {}: {} of {} flagged, {}",
                "⚠".yellow(),
                folder.folder,
                flagged,
                folder.requested,
                reason
            )?,
            DeletionOutcome::Failed { reason } => {
                writeln!(out, "  {} {}: {}", "✗".red(), folder.folder, reason)?
            }
        }
    }
    writeln!(out, "  ✓ deleted {}", report.total_deleted())?;
    Ok(())
}

/// Key column width, shrunk to fit narrow terminals
pub fn key_column_width(configured: usize, show_sizes: bool) -> usize {
    let fixed = if show_sizes { 30 } else { 20 };
    let available = terminal::size()
        .map(|(cols, _)| (cols as usize).saturating_sub(fixed))
        .unwrap_or(configured);
    configured.min(available).max(10)
}

fn render_page<W: Write>(out: &mut W, pages: &PageState, table: &TableOptions) -> Result<()> {
    let w = table.key_width;
    let header = table.field.as_str().to_uppercase();

    let (top, mid, bottom) = if table.show_sizes {
        (
            format!("┌─────┬{}┬─────────┬─────────┐", "─".repeat(w + 2)),
            format!("├─────┼{}┼─────────┼─────────┤", "─".repeat(w + 2)),
            format!("└─────┴{}┴─────────┴─────────┘", "─".repeat(w + 2)),
        )
    } else {
        (
            format!("┌─────┬{}┬─────────┐", "─".repeat(w + 2)),
            format!("├─────┼{}┼─────────┤", "─".repeat(w + 2)),
            format!("└─────┴{}┴─────────┘", "─".repeat(w + 2)),
        )
    };

    writeln!(out)?;
    writeln!(out, "{}", top)?;
    if table.show_sizes {
        writeln!(out, "│ {:>3} │ {:<w$} │ {:>7} │ {:>7} │", "#", header, "MSGS", "MB")?;
    } else {
        writeln!(out, "│ {:>3} │ {:<w$} │ {:>7} │", "#", header, "MSGS")?;
    }
    writeln!(out, "{}", mid)?;

    for (i, group) in pages.current_page().iter().enumerate() {
        let key = truncate_with_ellipsis(&group.key, w);
        if table.show_sizes {
            writeln!(
                out,
                "│ {:>3} │ {:<w$} │ {:>7} │ {:>7.1} │",
                i + 1,
                key,
                group.count,
                bytes_to_megabytes(group.total_bytes)
            )?;
        } else {
            writeln!(out, "│ {:>3} │ {:<w$} │ {:>7} │", i + 1, key, group.count)?;
        }
    }

    writeln!(out, "{}", bottom)?;
    writeln!(
        out,
        "Page {}/{}  ({} groups)",
        pages.page_index() + 1,
        pages.page_count(),
        pages.groups().len()
    )?;
    out.flush()?;
    Ok(())
}
