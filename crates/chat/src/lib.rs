//! Conversation state for the tutor chat client: the session directory, the
//! message stream and the controller that reconciles overlapping requests.

mod auth;
mod controller;
mod directory;
mod driver;
mod error;
mod message;
mod render;
mod snapshot;
mod stream;

pub use auth::UserSession;
pub use controller::{
    ASK_FAILED_REPLY, AskTicket, ConversationController, DEFAULT_GREETING, DirectoryOutcome,
    DirectoryTicket, HistoryOutcome, HistoryTicket, MISSING_ANSWER_REPLY, SendOutcome,
};
pub use directory::SessionDirectory;
pub use driver::{ConversationDriver, Settled};
pub use error::{ChatError, ChatResult};
pub use message::{MessageEntry, RequestId, Role, entries_from_history};
pub use render::{
    Alignment, DEFAULT_SESSION_TITLE, DirectoryRow, RenderedContent, RenderedEntry,
    render_directory, render_entry, render_transcript, title_hint,
};
pub use snapshot::{ConversationSnapshot, StateObserver};
pub use stream::{MessageStream, StreamGeneration};
