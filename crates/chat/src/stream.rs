use snafu::ensure;

use crate::error::{ChatResult, EmptyInputSnafu, NoPendingEntrySnafu, PendingEntryExistsSnafu};
use crate::message::{MessageEntry, RequestId};

/// Counts wholesale replacements of the stream.
///
/// A response tagged with an older generation belongs to a transcript that is no
/// longer displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamGeneration(pub u64);

/// Ordered transcript of the active conversation.
///
/// At most one [`MessageEntry::BotPending`] exists and it is always the last entry.
/// A second placeholder is refused with `PendingEntryExists` rather than panicking,
/// and so is any append while a placeholder is unresolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStream {
    entries: Vec<MessageEntry>,
    generation: StreamGeneration,
    revision: u64,
}

impl MessageStream {
    pub fn new(greeting: impl Into<String>) -> Self {
        let mut stream = Self::default();
        stream.reset(greeting);
        stream
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> StreamGeneration {
        self.generation
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        match self.entries.last() {
            Some(MessageEntry::BotPending { request }) => Some(*request),
            _ => None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_request().is_some()
    }

    /// Replaces the transcript with a single bot greeting.
    pub fn reset(&mut self, greeting: impl Into<String>) {
        self.replace_all(vec![MessageEntry::bot(greeting)]);
    }

    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = MessageEntry>) {
        self.entries = entries.into_iter().collect();
        self.generation = StreamGeneration(self.generation.0.saturating_add(1));
        self.touch();
    }

    pub fn append_user(&mut self, text: &str) -> ChatResult<()> {
        ensure!(
            !text.trim().is_empty(),
            EmptyInputSnafu {
                stage: "stream-append-user"
            }
        );
        ensure!(
            !self.has_pending(),
            PendingEntryExistsSnafu {
                stage: "stream-append-user"
            }
        );

        self.entries.push(MessageEntry::user(text));
        self.touch();
        Ok(())
    }

    pub fn append_pending_bot(&mut self, request: RequestId) -> ChatResult<()> {
        ensure!(
            !self.has_pending(),
            PendingEntryExistsSnafu {
                stage: "stream-append-pending"
            }
        );

        self.entries.push(MessageEntry::pending(request));
        self.touch();
        Ok(())
    }

    /// Swaps the placeholder for the final answer, keeping its position.
    pub fn resolve_pending_bot(&mut self, text: impl Into<String>) -> ChatResult<RequestId> {
        let Some(request) = self.pending_request() else {
            return NoPendingEntrySnafu {
                stage: "stream-resolve-pending",
            }
            .fail();
        };

        if let Some(slot) = self.entries.last_mut() {
            *slot = MessageEntry::bot(text);
        }
        self.touch();
        Ok(request)
    }

    pub(crate) fn append_bot(&mut self, text: impl Into<String>) {
        self.entries.push(MessageEntry::bot(text));
        self.touch();
    }

    fn touch(&mut self) {
        self.revision = self.revision.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    #[test]
    fn reset_leaves_only_the_greeting_and_advances_generation() {
        let mut stream = MessageStream::new("hello");
        let first_generation = stream.generation();
        stream.append_user("question").unwrap();

        stream.reset("welcome back");

        assert_eq!(stream.entries(), &[MessageEntry::bot("welcome back")]);
        assert!(stream.generation() > first_generation);
    }

    #[test]
    fn blank_user_text_is_rejected_without_mutation() {
        let mut stream = MessageStream::new("hello");
        let revision = stream.revision();

        let error = stream.append_user(" \t\n").unwrap_err();

        assert!(matches!(error, ChatError::EmptyInput { .. }));
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.revision(), revision);
    }

    #[test]
    fn second_pending_placeholder_is_refused() {
        let mut stream = MessageStream::new("hello");
        stream.append_user("first").unwrap();
        stream.append_pending_bot(RequestId::new(1)).unwrap();

        let error = stream.append_pending_bot(RequestId::new(2)).unwrap_err();
        assert!(matches!(error, ChatError::PendingEntryExists { .. }));

        let error = stream.append_user("second").unwrap_err();
        assert!(matches!(error, ChatError::PendingEntryExists { .. }));

        assert_eq!(stream.pending_request(), Some(RequestId::new(1)));
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn resolving_replaces_placeholder_in_place() {
        let mut stream = MessageStream::new("hello");
        stream.append_user("question").unwrap();
        stream.append_pending_bot(RequestId::new(4)).unwrap();
        let generation = stream.generation();

        let resolved = stream.resolve_pending_bot("answer").unwrap();

        assert_eq!(resolved, RequestId::new(4));
        assert_eq!(
            stream.entries(),
            &[
                MessageEntry::bot("hello"),
                MessageEntry::user("question"),
                MessageEntry::bot("answer"),
            ]
        );
        assert_eq!(stream.generation(), generation);
        assert!(!stream.has_pending());
    }

    #[test]
    fn resolving_without_placeholder_fails() {
        let mut stream = MessageStream::new("hello");

        let error = stream.resolve_pending_bot("orphan").unwrap_err();

        assert!(matches!(error, ChatError::NoPendingEntry { .. }));
        assert_eq!(stream.len(), 1);
    }
}
