use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tutor_api::{SessionId, SessionSummary};

use crate::message::MessageEntry;
use crate::render::{DirectoryRow, RenderedEntry, render_directory, render_transcript};

/// Read-only copy of the conversation state handed to everything but the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub revision: u64,
    pub active_session_id: Option<SessionId>,
    pub messages: Vec<MessageEntry>,
    pub sessions: Vec<SessionSummary>,
    pub answer_pending: bool,
    /// Session whose history fetch is still outstanding.
    pub history_pending: Option<SessionId>,
}

impl ConversationSnapshot {
    pub fn is_draft(&self) -> bool {
        self.active_session_id.is_none()
    }

    pub fn transcript(&self) -> Vec<RenderedEntry> {
        render_transcript(&self.messages)
    }

    pub fn directory_rows(&self) -> Vec<DirectoryRow> {
        render_directory(&self.sessions, self.active_session_id.as_ref())
    }
}

/// Publishing side owned by the controller.
#[derive(Debug)]
pub(crate) struct SnapshotPublisher {
    current: Arc<ArcSwap<ConversationSnapshot>>,
    revisions: watch::Sender<u64>,
}

impl SnapshotPublisher {
    pub(crate) fn new(initial: ConversationSnapshot) -> Self {
        let (revisions, _) = watch::channel(initial.revision);
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
            revisions,
        }
    }

    pub(crate) fn current(&self) -> Arc<ConversationSnapshot> {
        self.current.load_full()
    }

    pub(crate) fn publish(&self, snapshot: ConversationSnapshot) {
        let revision = snapshot.revision;
        self.current.store(Arc::new(snapshot));
        self.revisions.send_replace(revision);
    }

    pub(crate) fn observer(&self) -> StateObserver {
        StateObserver {
            current: Arc::clone(&self.current),
            revisions: self.revisions.subscribe(),
        }
    }
}

/// Subscriber handle for re-rendering (and auto-scrolling) on state changes.
#[derive(Debug, Clone)]
pub struct StateObserver {
    current: Arc<ArcSwap<ConversationSnapshot>>,
    revisions: watch::Receiver<u64>,
}

impl StateObserver {
    pub fn current(&self) -> Arc<ConversationSnapshot> {
        self.current.load_full()
    }

    /// Waits for the next published snapshot. Returns `None` once the controller
    /// has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<ConversationSnapshot>> {
        self.revisions.changed().await.ok()?;
        Some(self.current())
    }
}
