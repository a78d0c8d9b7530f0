use std::sync::Arc;

use chrono::Utc;
use snafu::{ResultExt, ensure};
use tutor_api::{
    ApiResult, AskReply, AskRequest, HistoryRecord, SessionId, SessionSummary, TutorApi,
};

use crate::auth::UserSession;
use crate::directory::SessionDirectory;
use crate::error::{
    AskFailedSnafu, ChatResult, EmptyInputSnafu, HistoryLoadFailedSnafu,
    PendingEntryExistsSnafu,
};
use crate::message::{MessageEntry, RequestId, entries_from_history};
use crate::render::title_hint;
use crate::snapshot::{ConversationSnapshot, SnapshotPublisher, StateObserver};
use crate::stream::{MessageStream, StreamGeneration};

pub const DEFAULT_GREETING: &str = "Hello! I'm your AI assistant. How can I help you today?";
/// Shown in place of the answer when the round-trip failed.
pub const ASK_FAILED_REPLY: &str = "Sorry, there was an error processing your request.";
/// Shown when the service answered without any text.
pub const MISSING_ANSWER_REPLY: &str = "Sorry, I couldn't process that request.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTicket {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub request_id: RequestId,
    pub session_id: SessionId,
}

/// Dispatch-time view of an `ask`: the session it continues (if any) and the
/// transcript generation its placeholder lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AskTicket {
    pub request_id: RequestId,
    pub session_id: Option<SessionId>,
    pub generation: StreamGeneration,
    request: AskRequest,
}

impl AskTicket {
    pub fn request(&self) -> &AskRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    Applied { sessions: usize },
    /// A newer listing request superseded this one.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied { entries: usize },
    /// The user navigated away before the history arrived.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Answered {
        /// Set when a draft conversation was persisted by this answer.
        created_session: Option<SessionId>,
    },
    /// The conversation the question was asked in is no longer displayed. A
    /// session the answer created is still listed in the directory.
    Discarded { created_session: Option<SessionId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct StateFingerprint {
    stream_revision: u64,
    directory_revision: u64,
    active_session_id: Option<SessionId>,
    history_request: Option<RequestId>,
}

/// Sole owner and writer of the conversation state of one signed-in user.
///
/// Every remote operation is split into a `begin_*` half that mutates state
/// optimistically and hands out a ticket, and a `finish_*` half that reconciles
/// the settled result against the state current at that moment. The async
/// helpers chain both halves for callers that do not overlap requests;
/// [`crate::ConversationDriver`] overlaps them.
#[derive(Debug)]
pub struct ConversationController {
    user: UserSession,
    greeting: String,
    active_session_id: Option<SessionId>,
    stream: MessageStream,
    directory: SessionDirectory,
    awaiting_history: Option<HistoryTicket>,
    last_applied_history: Option<RequestId>,
    latest_directory_request: Option<RequestId>,
    /// Target session of every unsettled ask, `None` for a draft.
    asks_in_flight: Vec<(RequestId, Option<SessionId>)>,
    next_request_id: u64,
    revision: u64,
    published: StateFingerprint,
    publisher: SnapshotPublisher,
}

impl ConversationController {
    pub fn new(user: UserSession, greeting: impl Into<String>) -> Self {
        let greeting = greeting.into();
        let stream = MessageStream::new(greeting.clone());
        let initial = ConversationSnapshot {
            messages: stream.entries().to_vec(),
            ..ConversationSnapshot::default()
        };

        let mut controller = Self {
            user,
            greeting,
            active_session_id: None,
            stream,
            directory: SessionDirectory::new(),
            awaiting_history: None,
            last_applied_history: None,
            latest_directory_request: None,
            asks_in_flight: Vec::new(),
            next_request_id: 1,
            revision: 0,
            published: StateFingerprint::default(),
            publisher: SnapshotPublisher::new(initial),
        };
        controller.published = controller.fingerprint();
        controller
    }

    pub fn user_session(&self) -> &UserSession {
        &self.user
    }

    pub fn active_session_id(&self) -> Option<&SessionId> {
        self.active_session_id.as_ref()
    }

    pub fn messages(&self) -> &[MessageEntry] {
        self.stream.entries()
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        self.directory.sessions()
    }

    pub fn is_answer_pending(&self) -> bool {
        self.stream.has_pending()
    }

    pub fn awaiting_history(&self) -> Option<&SessionId> {
        self.awaiting_history
            .as_ref()
            .map(|ticket| &ticket.session_id)
    }

    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.publisher.current()
    }

    pub fn observe(&self) -> StateObserver {
        self.publisher.observer()
    }

    /// Replaces the transcript with the greeting and detaches from any session.
    pub fn start_new_chat(&mut self) {
        self.stream.reset(self.greeting.clone());
        self.active_session_id = None;
        self.awaiting_history = None;
        tracing::info!("started a new draft conversation");
        self.publish();
    }

    pub fn begin_directory_load(&mut self) -> DirectoryTicket {
        let request_id = self.allocate_request_id();
        self.latest_directory_request = Some(request_id);
        DirectoryTicket { request_id }
    }

    pub fn finish_directory_load(
        &mut self,
        ticket: DirectoryTicket,
        listing: ApiResult<Vec<SessionSummary>>,
    ) -> ChatResult<DirectoryOutcome> {
        if self.latest_directory_request != Some(ticket.request_id) {
            tracing::debug!(request = ticket.request_id.0, "discarding superseded session listing");
            return Ok(DirectoryOutcome::Discarded);
        }
        self.latest_directory_request = None;

        let applied = self.directory.apply_listing(self.user.user_id(), listing);
        self.publish();

        match applied {
            Ok(sessions) => {
                tracing::info!(sessions, "session directory refreshed");
                Ok(DirectoryOutcome::Applied { sessions })
            }
            Err(error) => {
                tracing::warn!(%error, "keeping cached session directory");
                Err(error)
            }
        }
    }

    /// Targets `session_id` immediately; the transcript follows once its history
    /// arrives.
    pub fn begin_select_session(&mut self, session_id: SessionId) -> HistoryTicket {
        let ticket = HistoryTicket {
            request_id: self.allocate_request_id(),
            session_id: session_id.clone(),
        };

        tracing::info!(%session_id, request = ticket.request_id.0, "selecting session");
        self.active_session_id = Some(session_id);
        self.awaiting_history = Some(ticket.clone());
        self.publish();
        ticket
    }

    pub fn finish_select_session(
        &mut self,
        ticket: HistoryTicket,
        history: ApiResult<Vec<HistoryRecord>>,
    ) -> ChatResult<HistoryOutcome> {
        if self
            .awaiting_history
            .as_ref()
            .is_some_and(|awaiting| awaiting.request_id == ticket.request_id)
        {
            self.awaiting_history = None;
        }

        // Target is compared at resolution time, never at dispatch time.
        let still_active = self.active_session_id.as_ref() == Some(&ticket.session_id);
        let superseded = self
            .last_applied_history
            .is_some_and(|applied| applied > ticket.request_id);
        if !still_active || superseded {
            tracing::debug!(
                session_id = %ticket.session_id,
                request = ticket.request_id.0,
                "discarding stale session history"
            );
            self.publish();
            return Ok(HistoryOutcome::Discarded);
        }

        let outcome = match history {
            Ok(records) => {
                let mut entries = entries_from_history(&records);
                let count = entries.len();
                entries.extend(self.unanswered_tail(&ticket.session_id));
                self.stream.replace_all(entries);
                self.last_applied_history = Some(ticket.request_id);
                tracing::info!(session_id = %ticket.session_id, entries = count, "session history loaded");
                Ok(HistoryOutcome::Applied { entries: count })
            }
            Err(source) => {
                tracing::warn!(session_id = %ticket.session_id, error = %source, "session history unavailable");
                Err(source).context(HistoryLoadFailedSnafu {
                    stage: "select-session",
                    session_id: ticket.session_id,
                })
            }
        };

        self.publish();
        outcome
    }

    /// Appends the user message and the answer placeholder, then hands back the
    /// request to dispatch. Nothing changes when this fails.
    pub fn begin_send(&mut self, text: &str) -> ChatResult<AskTicket> {
        ensure!(
            !text.trim().is_empty(),
            EmptyInputSnafu {
                stage: "send-message"
            }
        );
        ensure!(
            !self.stream.has_pending(),
            PendingEntryExistsSnafu {
                stage: "send-message"
            }
        );

        let request_id = self.allocate_request_id();
        self.stream.append_user(text)?;
        self.stream.append_pending_bot(request_id)?;

        let ticket = AskTicket {
            request_id,
            session_id: self.active_session_id.clone(),
            generation: self.stream.generation(),
            request: AskRequest::new(
                text,
                self.user.user_id().clone(),
                self.active_session_id.clone(),
            ),
        };

        tracing::info!(
            request = request_id.0,
            session_id = ?ticket.session_id,
            "asking tutor"
        );
        self.asks_in_flight
            .push((request_id, ticket.session_id.clone()));
        self.publish();
        Ok(ticket)
    }

    /// Resolves the placeholder with the answer, or with the apology text on
    /// failure. Failures are reported after the transcript is consistent again.
    ///
    /// The answer is shown when its placeholder is still on screen or when the
    /// conversation it was asked in is still the displayed one; otherwise it is
    /// dropped. A session created from a draft is listed either way.
    pub fn finish_send(
        &mut self,
        ticket: AskTicket,
        reply: ApiResult<AskReply>,
    ) -> ChatResult<SendOutcome> {
        self.asks_in_flight
            .retain(|(request, _)| *request != ticket.request_id);
        let shown = self.stream.pending_request() == Some(ticket.request_id)
            || self.is_displaying(&ticket);

        match reply {
            Ok(reply) => {
                let created_session = self.record_created_session(&ticket, reply.session_id.clone());
                if !shown {
                    tracing::debug!(request = ticket.request_id.0, "dropping answer for a conversation no longer displayed");
                    self.publish();
                    return Ok(SendOutcome::Discarded { created_session });
                }

                let answer = reply.answer_text().unwrap_or(MISSING_ANSWER_REPLY).to_string();
                self.settle_pending(ticket.request_id, answer);
                self.publish();
                Ok(SendOutcome::Answered { created_session })
            }
            Err(source) => {
                tracing::warn!(request = ticket.request_id.0, error = %source, "ask failed");
                if !shown {
                    return Ok(SendOutcome::Discarded {
                        created_session: None,
                    });
                }

                self.settle_pending(ticket.request_id, ASK_FAILED_REPLY);
                self.publish();
                Err(source).context(AskFailedSnafu {
                    stage: "send-message",
                })
            }
        }
    }

    pub async fn load_directory(&mut self, api: &dyn TutorApi) -> ChatResult<usize> {
        // Supersedes any listing still in flight.
        self.latest_directory_request = None;
        let loaded = self.directory.load(api, self.user.user_id()).await;
        self.publish();
        loaded
    }

    pub async fn select_session(
        &mut self,
        api: &dyn TutorApi,
        session_id: SessionId,
    ) -> ChatResult<HistoryOutcome> {
        let ticket = self.begin_select_session(session_id);
        let history = api
            .session_history(self.user.user_id().clone(), ticket.session_id.clone())
            .await;
        self.finish_select_session(ticket, history)
    }

    pub async fn send_message(&mut self, api: &dyn TutorApi, text: &str) -> ChatResult<SendOutcome> {
        let ticket = self.begin_send(text)?;
        let reply = api.ask(ticket.request().clone()).await;
        self.finish_send(ticket, reply)
    }

    /// Discards the conversation state, handing back the user session for logout.
    pub fn into_user_session(self) -> UserSession {
        tracing::info!(user_id = %self.user.user_id(), "discarding conversation state");
        self.user
    }

    // Resolve-or-append: an answer for the displayed conversation is never dropped.
    fn settle_pending(&mut self, request_id: RequestId, text: impl Into<String>) {
        match self.stream.pending_request() {
            Some(pending) if pending == request_id => {
                if let Err(error) = self.stream.resolve_pending_bot(text) {
                    tracing::error!(%error, "failed to resolve answer placeholder");
                }
            }
            Some(other) => {
                tracing::error!(
                    request = request_id.0,
                    pending = other.0,
                    "answer settled behind another placeholder, dropping it"
                );
            }
            None => {
                tracing::debug!(request = request_id.0, "placeholder was replaced, appending answer");
                self.stream.append_bot(text);
            }
        }
    }

    // A draft is the same draft only while no session is active and the
    // transcript was never reset or replaced.
    fn is_displaying(&self, ticket: &AskTicket) -> bool {
        match &ticket.session_id {
            Some(session_id) => self.active_session_id.as_ref() == Some(session_id),
            None => {
                self.active_session_id.is_none() && self.stream.generation() == ticket.generation
            }
        }
    }

    /// Lists a session the service created for a draft ask, and opens it when
    /// that draft is still on screen.
    fn record_created_session(
        &mut self,
        ticket: &AskTicket,
        created: Option<SessionId>,
    ) -> Option<SessionId> {
        // Continuing an existing session never touches the directory.
        if ticket.session_id.is_some() {
            return None;
        }
        let session_id = created?;

        self.directory.prepend(SessionSummary::new(
            session_id.clone(),
            Utc::now(),
            title_hint(&ticket.request.query),
        ));

        if self.is_displaying(ticket) {
            self.active_session_id = Some(session_id.clone());
            tracing::info!(%session_id, "draft conversation persisted as a new session");
        } else {
            tracing::info!(%session_id, "listed session created by a draft that was left");
        }
        Some(session_id)
    }

    /// The question and placeholder of an unsettled ask on `session_id`, kept
    /// across a reload of that session's history.
    fn unanswered_tail(&self, session_id: &SessionId) -> Vec<MessageEntry> {
        let Some(pending) = self.stream.pending_request() else {
            return Vec::new();
        };
        let asked_here = self
            .asks_in_flight
            .iter()
            .any(|(request, target)| *request == pending && target.as_ref() == Some(session_id));
        if !asked_here {
            return Vec::new();
        }

        let entries = self.stream.entries();
        entries[entries.len().saturating_sub(2)..].to_vec()
    }

    fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id = self.next_request_id.saturating_add(1);
        id
    }

    fn fingerprint(&self) -> StateFingerprint {
        StateFingerprint {
            stream_revision: self.stream.revision(),
            directory_revision: self.directory.revision(),
            active_session_id: self.active_session_id.clone(),
            history_request: self
                .awaiting_history
                .as_ref()
                .map(|ticket| ticket.request_id),
        }
    }

    fn publish(&mut self) {
        let fingerprint = self.fingerprint();
        if fingerprint == self.published {
            return;
        }

        self.published = fingerprint;
        self.revision = self.revision.saturating_add(1);
        self.publisher.publish(ConversationSnapshot {
            revision: self.revision,
            active_session_id: self.active_session_id.clone(),
            messages: self.stream.entries().to_vec(),
            sessions: self.directory.sessions().to_vec(),
            answer_pending: self.stream.has_pending(),
            history_pending: self.awaiting_history().cloned(),
        });
    }
}
