use console::{Term, pad_str, style};
use tutor_chat::{
    Alignment, DirectoryRow, MessageEntry, RenderedContent, RenderedEntry, render_entry,
};

const PENDING_TEXT: &str = "typing…";

/// Lays rendered entries out for a terminal of a given width: bot entries on the
/// left, user entries pushed to the right edge.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptView {
    width: usize,
}

impl TranscriptView {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.clamp(40, 120),
        }
    }

    pub fn for_terminal() -> Self {
        let (_, columns) = Term::stdout().size();
        Self::new(usize::from(columns))
    }

    pub fn entry_lines(&self, entry: &RenderedEntry) -> Vec<String> {
        let body = match &entry.content {
            RenderedContent::Text(text) => text.lines().map(str::to_string).collect::<Vec<_>>(),
            RenderedContent::PendingIndicator => vec![PENDING_TEXT.to_string()],
        };

        match entry.alignment {
            Alignment::Left => std::iter::once(style("tutor").cyan().bold().to_string())
                .chain(body.into_iter().map(|line| format!("  {line}")))
                .collect(),
            Alignment::Right => std::iter::once(style("you").green().bold().to_string())
                .chain(body)
                .map(|line| {
                    pad_str(&line, self.width, console::Alignment::Right, None).into_owned()
                })
                .collect(),
        }
    }

    pub fn print_entries(&self, entries: &[MessageEntry]) {
        for entry in entries {
            for line in self.entry_lines(&render_entry(entry)) {
                println!("{line}");
            }
            println!();
        }
    }
}

pub fn directory_lines(rows: &[DirectoryRow]) -> Vec<String> {
    if rows.is_empty() {
        return vec![style("no conversations yet").dim().to_string()];
    }

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let marker = if row.active { "*" } else { " " };
            format!(
                "{marker} {:>2}. {} {} {}",
                index + 1,
                row.title,
                style(row.created_on.as_str()).dim(),
                style(format!("#{}", row.session_id)).dim()
            )
        })
        .collect()
}

pub fn print_directory(rows: &[DirectoryRow]) {
    println!("{}", style("Conversations").bold());
    for line in directory_lines(rows) {
        println!("{line}");
    }
}

pub fn notice(message: impl std::fmt::Display) {
    println!("{}", style(message).yellow());
}

pub fn failure(message: impl std::fmt::Display) {
    eprintln!("{}", style(message).red());
}

/// What the terminal must print to catch up with a new transcript.
#[derive(Debug, PartialEq, Eq)]
pub enum TranscriptUpdate<'a> {
    Unchanged,
    Append(&'a [MessageEntry]),
    /// The transcript was replaced wholesale (new chat or another session).
    Replace(&'a [MessageEntry]),
}

/// Remembers what was already printed so only new entries are written.
#[derive(Debug, Default)]
pub struct TranscriptCursor {
    shown: Vec<MessageEntry>,
}

impl TranscriptCursor {
    pub fn advance<'a>(&mut self, messages: &'a [MessageEntry]) -> TranscriptUpdate<'a> {
        let common = self
            .shown
            .iter()
            .zip(messages)
            .take_while(|(shown, current)| shown == current)
            .count();

        // A resolved placeholder counts as an append of its answer.
        let resolved_placeholder = common + 1 == self.shown.len()
            && self.shown.last().is_some_and(MessageEntry::is_pending);

        let update = if common == self.shown.len() && common == messages.len() {
            TranscriptUpdate::Unchanged
        } else if common == self.shown.len() || resolved_placeholder {
            TranscriptUpdate::Append(&messages[common..])
        } else {
            TranscriptUpdate::Replace(messages)
        };

        self.shown = messages.to_vec();
        update
    }
}
