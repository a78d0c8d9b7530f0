use tutor_api::{SessionId, SessionSummary};

use crate::message::{MessageEntry, Role};

/// Title shown for sessions the service listed without a first query.
pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";
const TITLE_HINT_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alignment {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedContent {
    /// Markdown source, passed through untouched.
    Text(String),
    PendingIndicator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEntry {
    pub role: Role,
    pub alignment: Alignment,
    pub content: RenderedContent,
}

pub fn render_entry(entry: &MessageEntry) -> RenderedEntry {
    let role = entry.role();
    let alignment = match role {
        Role::User => Alignment::Right,
        Role::Bot => Alignment::Left,
    };
    let content = match entry {
        MessageEntry::User { text } | MessageEntry::Bot { text } => {
            RenderedContent::Text(text.clone())
        }
        MessageEntry::BotPending { .. } => RenderedContent::PendingIndicator,
    };

    RenderedEntry {
        role,
        alignment,
        content,
    }
}

pub fn render_transcript(entries: &[MessageEntry]) -> Vec<RenderedEntry> {
    entries.iter().map(render_entry).collect()
}

/// One sidebar row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRow {
    pub session_id: SessionId,
    pub title: String,
    pub created_on: String,
    pub active: bool,
}

pub fn render_directory(
    sessions: &[SessionSummary],
    active: Option<&SessionId>,
) -> Vec<DirectoryRow> {
    sessions
        .iter()
        .map(|summary| DirectoryRow {
            session_id: summary.session_id.clone(),
            title: display_title(&summary.title_hint),
            created_on: summary.created_at.format("%Y-%m-%d").to_string(),
            active: active == Some(&summary.session_id),
        })
        .collect()
}

/// Short single-line hint derived from a session's first query.
pub fn title_hint(query: &str) -> String {
    let first_line = query.trim().lines().next().unwrap_or_default().trim();
    let mut hint = first_line
        .chars()
        .take(TITLE_HINT_MAX_CHARS)
        .collect::<String>();
    if first_line.chars().count() > TITLE_HINT_MAX_CHARS {
        hint.push('…');
    }
    hint
}

fn display_title(hint: &str) -> String {
    let hint = hint.trim();
    if hint.is_empty() {
        DEFAULT_SESSION_TITLE.to_string()
    } else {
        title_hint(hint)
    }
}
