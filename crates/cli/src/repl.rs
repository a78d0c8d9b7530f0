use console::style;
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tutor_api::SessionId;
use tutor_chat::{
    ChatError, ConversationDriver, ConversationSnapshot, HistoryOutcome, SendOutcome, Settled,
};

use crate::error::{CliResult, TerminalSnafu};
use crate::view::{self, TranscriptCursor, TranscriptUpdate, TranscriptView};

pub type Input = Lines<BufReader<Stdin>>;

pub fn stdin_lines() -> Input {
    BufReader::new(tokio::io::stdin()).lines()
}

const HELP: &str = "\
/new            start a new conversation
/sessions       list your conversations
/open <n|#id>   open conversation n from the list, or by id
/refresh        reload the conversation list
/logout         sign out and leave
/help           show this help
/quit           leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New,
    Sessions,
    Open(String),
    Refresh,
    Logout,
    Help,
    Quit,
    Unknown(String),
    Blank,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Send(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map(|(name, argument)| (name, argument.trim()))
            .unwrap_or((command, ""));

        match name {
            "new" => Self::New,
            "sessions" | "ls" => Self::Sessions,
            "open" if !argument.is_empty() => Self::Open(argument.to_string()),
            "refresh" => Self::Refresh,
            "logout" => Self::Logout,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => Self::Unknown(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatExit {
    Quit,
    Logout,
}

/// Resolves `/open` targets: a 1-based position in the listed directory, or
/// `#id` for an explicit session id. Bare numbers beyond the list are ids.
pub fn resolve_open_target(snapshot: &ConversationSnapshot, target: &str) -> SessionId {
    if let Some(id) = target.strip_prefix('#') {
        return SessionId::new(id);
    }

    target
        .parse::<usize>()
        .ok()
        .and_then(|position| position.checked_sub(1))
        .and_then(|index| snapshot.sessions.get(index))
        .map(|summary| summary.session_id.clone())
        .unwrap_or_else(|| SessionId::new(target))
}

pub async fn run(driver: &mut ConversationDriver, input: &mut Input) -> CliResult<ChatExit> {
    let view = TranscriptView::for_terminal();
    let mut cursor = TranscriptCursor::default();
    let mut observer = driver.observe();

    println!(
        "{}",
        style(format!(
            "signed in as {}, type /help for commands",
            driver.controller().user_session().display_name()
        ))
        .dim()
    );
    render(&view, &mut cursor, &observer.current());

    loop {
        tokio::select! {
            line = input.next_line() => {
                let line = line.context(TerminalSnafu { stage: "read-chat-input" })?;
                let Some(line) = line else {
                    return Ok(ChatExit::Quit);
                };
                if let Some(exit) = handle_command(driver, ReplCommand::parse(&line)) {
                    return Ok(exit);
                }
            }
            Some(settled) = driver.next_settled(), if driver.in_flight() > 0 => {
                report(settled);
            }
            Some(snapshot) = observer.changed() => {
                render(&view, &mut cursor, &snapshot);
            }
        }
    }
}

fn handle_command(driver: &mut ConversationDriver, command: ReplCommand) -> Option<ChatExit> {
    match command {
        ReplCommand::Blank => {}
        ReplCommand::Send(text) => match driver.send_message(&text) {
            Ok(_) => {}
            Err(ChatError::PendingEntryExists { .. }) => {
                view::notice("still waiting for the previous answer");
            }
            Err(error) => view::failure(error),
        },
        ReplCommand::New => driver.start_new_chat(),
        ReplCommand::Sessions => {
            view::print_directory(&driver.controller().snapshot().directory_rows());
        }
        ReplCommand::Open(target) => {
            let session_id = resolve_open_target(&driver.controller().snapshot(), &target);
            view::notice(format!("opening conversation #{session_id}…"));
            driver.select_session(session_id);
        }
        ReplCommand::Refresh => {
            driver.refresh_directory();
        }
        ReplCommand::Logout => return Some(ChatExit::Logout),
        ReplCommand::Quit => return Some(ChatExit::Quit),
        ReplCommand::Help => println!("{HELP}"),
        ReplCommand::Unknown(command) => {
            view::notice(format!("unknown command {command}, try /help"));
        }
    }
    None
}

fn report(settled: Settled) {
    match settled {
        Settled::Directory(Err(error)) => {
            view::failure(format!("could not refresh conversations: {error}"));
        }
        Settled::History {
            session_id,
            outcome: Err(error),
        } => {
            tracing::debug!(%session_id, "history load reported");
            view::failure(error);
        }
        Settled::History {
            outcome: Ok(HistoryOutcome::Discarded),
            session_id,
        } => {
            tracing::debug!(%session_id, "history arrived after switching away");
        }
        Settled::Answer(Ok(SendOutcome::Answered {
            created_session: Some(session_id),
        })) => {
            view::notice(format!("saved as conversation #{session_id}"));
        }
        Settled::Answer(Ok(SendOutcome::Discarded {
            created_session: Some(session_id),
        })) => {
            view::notice(format!("your earlier question was saved as conversation #{session_id}"));
        }
        // The apology is already in the transcript.
        Settled::Answer(Err(ChatError::AskFailed { source, .. })) if source.is_timeout() => {
            view::notice("the tutor took too long to answer, try asking again");
        }
        Settled::Answer(Err(error)) => tracing::warn!(%error, "answer failed"),
        Settled::Directory(Ok(_)) | Settled::History { .. } | Settled::Answer(Ok(_)) => {}
    }
}

fn render(view: &TranscriptView, cursor: &mut TranscriptCursor, snapshot: &ConversationSnapshot) {
    match cursor.advance(&snapshot.messages) {
        TranscriptUpdate::Unchanged => {}
        TranscriptUpdate::Append(entries) => view.print_entries(entries),
        TranscriptUpdate::Replace(entries) => {
            let title = match &snapshot.active_session_id {
                Some(session_id) => format!("── conversation #{session_id} ──"),
                None => "── new conversation ──".to_string(),
            };
            println!("{}\n", style(title).dim());
            view.print_entries(entries);
        }
    }
}
