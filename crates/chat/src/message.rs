use tutor_api::HistoryRecord;

/// Identifier of one outstanding remote request.
///
/// Allocated per dispatch so that a settled response can be matched against the
/// state it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Bot,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEntry {
    User { text: String },
    Bot { text: String },
    /// Placeholder for the answer to `request`, shown as a typing indicator.
    BotPending { request: RequestId },
}

impl MessageEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::Bot { text: text.into() }
    }

    pub fn pending(request: RequestId) -> Self {
        Self::BotPending { request }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::Bot { .. } | Self::BotPending { .. } => Role::Bot,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::BotPending { .. })
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { text } | Self::Bot { text } => Some(text),
            Self::BotPending { .. } => None,
        }
    }
}

/// Interleaves stored exchanges into `User(query), Bot(answer)` pairs, keeping
/// the server's record order.
pub fn entries_from_history(records: &[HistoryRecord]) -> Vec<MessageEntry> {
    records
        .iter()
        .flat_map(|record| {
            [
                MessageEntry::user(record.query.clone()),
                MessageEntry::bot(record.answer.clone()),
            ]
        })
        .collect()
}
