use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tutor_api::{
    ApiError, ApiResult, AskReply, BoxFuture, HistoryRecord, SessionId, SessionSummary, TutorApi,
};

use crate::auth::UserSession;
use crate::controller::{
    AskTicket, ConversationController, DirectoryOutcome, DirectoryTicket, HistoryOutcome,
    HistoryTicket, SendOutcome,
};
use crate::error::ChatResult;
use crate::message::RequestId;
use crate::snapshot::StateObserver;

enum Settlement {
    Directory(DirectoryTicket, ApiResult<Vec<SessionSummary>>),
    History(HistoryTicket, ApiResult<Vec<HistoryRecord>>),
    Answer(AskTicket, ApiResult<AskReply>),
}

/// Result of reconciling one settled request with the controller.
#[derive(Debug)]
pub enum Settled {
    Directory(ChatResult<DirectoryOutcome>),
    History {
        session_id: SessionId,
        outcome: ChatResult<HistoryOutcome>,
    },
    Answer(ChatResult<SendOutcome>),
}

/// Runs remote calls concurrently on the Tokio runtime and feeds their results
/// back into the controller one at a time, in settlement order.
///
/// Dropping the driver aborts everything still in flight.
pub struct ConversationDriver {
    controller: ConversationController,
    api: Arc<dyn TutorApi>,
    tasks: JoinSet<Settlement>,
}

impl ConversationDriver {
    pub fn new(controller: ConversationController, api: Arc<dyn TutorApi>) -> Self {
        Self {
            controller,
            api,
            tasks: JoinSet::new(),
        }
    }

    pub fn controller(&self) -> &ConversationController {
        &self.controller
    }

    pub fn observe(&self) -> StateObserver {
        self.controller.observe()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn start_new_chat(&mut self) {
        self.controller.start_new_chat();
    }

    pub fn refresh_directory(&mut self) -> RequestId {
        let ticket = self.controller.begin_directory_load();
        let request_id = ticket.request_id;
        let user_id = self.controller.user_session().user_id().clone();
        let api = Arc::clone(&self.api);

        self.tasks.spawn(async move {
            let listing = guarded("list-sessions", api.list_sessions(user_id)).await;
            Settlement::Directory(ticket, listing)
        });
        request_id
    }

    pub fn select_session(&mut self, session_id: SessionId) -> RequestId {
        let ticket = self.controller.begin_select_session(session_id);
        let request_id = ticket.request_id;
        let user_id = self.controller.user_session().user_id().clone();
        let api = Arc::clone(&self.api);

        self.tasks.spawn(async move {
            let history = guarded(
                "session-history",
                api.session_history(user_id, ticket.session_id.clone()),
            )
            .await;
            Settlement::History(ticket, history)
        });
        request_id
    }

    /// Appends the message and its placeholder right away; the answer arrives
    /// through [`Self::next_settled`].
    pub fn send_message(&mut self, text: &str) -> ChatResult<RequestId> {
        let ticket = self.controller.begin_send(text)?;
        let request_id = ticket.request_id;
        let request = ticket.request().clone();
        let api = Arc::clone(&self.api);

        self.tasks.spawn(async move {
            let reply = guarded("ask", api.ask(request)).await;
            Settlement::Answer(ticket, reply)
        });
        Ok(request_id)
    }

    /// Waits for the next request to settle and applies it. Returns `None` when
    /// nothing is in flight. Cancel safe.
    pub async fn next_settled(&mut self) -> Option<Settled> {
        loop {
            match self.tasks.join_next().await? {
                Ok(settlement) => return Some(self.apply(settlement)),
                Err(error) => tracing::error!(%error, "request task ended without settling"),
            }
        }
    }

    pub async fn settle_all(&mut self) -> Vec<Settled> {
        let mut settled = Vec::new();
        while let Some(next) = self.next_settled().await {
            settled.push(next);
        }
        settled
    }

    /// Aborts outstanding requests and discards the conversation state.
    pub fn into_user_session(mut self) -> UserSession {
        self.tasks.abort_all();
        self.controller.into_user_session()
    }

    fn apply(&mut self, settlement: Settlement) -> Settled {
        match settlement {
            Settlement::Directory(ticket, listing) => {
                Settled::Directory(self.controller.finish_directory_load(ticket, listing))
            }
            Settlement::History(ticket, history) => {
                let session_id = ticket.session_id.clone();
                let outcome = self.controller.finish_select_session(ticket, history);
                Settled::History {
                    session_id,
                    outcome,
                }
            }
            Settlement::Answer(ticket, reply) => {
                Settled::Answer(self.controller.finish_send(ticket, reply))
            }
        }
    }
}

// A panicking client must still settle its ticket, or a placeholder would never resolve.
async fn guarded<T>(stage: &'static str, call: BoxFuture<'_, ApiResult<T>>) -> ApiResult<T> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Unavailable {
            stage,
            details: "request panicked before settling".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use tokio::sync::oneshot;
    use tutor_api::{AskRequest, AuthenticatedUser, Credentials, NewAccount, UserId};

    use super::*;
    use crate::controller::{ASK_FAILED_REPLY, DEFAULT_GREETING};
    use crate::error::ChatError;
    use crate::message::MessageEntry;

    type Gate<T> = oneshot::Receiver<ApiResult<T>>;

    /// Each call waits until the test releases its response.
    #[derive(Default)]
    struct GatedApi {
        listings: Mutex<VecDeque<Gate<Vec<SessionSummary>>>>,
        histories: Mutex<HashMap<SessionId, Gate<Vec<HistoryRecord>>>>,
        answers: Mutex<HashMap<String, Gate<AskReply>>>,
        asked: Mutex<Vec<AskRequest>>,
    }

    impl GatedApi {
        fn listing(&self) -> oneshot::Sender<ApiResult<Vec<SessionSummary>>> {
            let (tx, rx) = oneshot::channel();
            self.listings.lock().unwrap().push_back(rx);
            tx
        }

        fn history(&self, session_id: i64) -> oneshot::Sender<ApiResult<Vec<HistoryRecord>>> {
            let (tx, rx) = oneshot::channel();
            self.histories
                .lock()
                .unwrap()
                .insert(SessionId::from(session_id), rx);
            tx
        }

        fn answer(&self, query: &str) -> oneshot::Sender<ApiResult<AskReply>> {
            let (tx, rx) = oneshot::channel();
            self.answers.lock().unwrap().insert(query.to_string(), rx);
            tx
        }

        fn asked(&self) -> Vec<AskRequest> {
            self.asked.lock().unwrap().clone()
        }
    }

    fn released<'a, T: Send + 'a>(gate: Option<Gate<T>>) -> BoxFuture<'a, ApiResult<T>> {
        Box::pin(async move {
            match gate {
                Some(gate) => gate.await.unwrap_or_else(|_| Err(offline())),
                None => Err(offline()),
            }
        })
    }

    impl TutorApi for GatedApi {
        fn list_sessions(&self, _user_id: UserId) -> BoxFuture<'_, ApiResult<Vec<SessionSummary>>> {
            released(self.listings.lock().unwrap().pop_front())
        }

        fn session_history(
            &self,
            _user_id: UserId,
            session_id: SessionId,
        ) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>> {
            released(self.histories.lock().unwrap().remove(&session_id))
        }

        fn ask(&self, request: AskRequest) -> BoxFuture<'_, ApiResult<AskReply>> {
            let gate = self.answers.lock().unwrap().remove(&request.query);
            self.asked.lock().unwrap().push(request);
            released(gate)
        }

        fn login(&self, _credentials: Credentials) -> BoxFuture<'_, ApiResult<AuthenticatedUser>> {
            released(None)
        }

        fn register(&self, _account: NewAccount) -> BoxFuture<'_, ApiResult<AuthenticatedUser>> {
            released(None)
        }
    }

    fn offline() -> ApiError {
        ApiError::Unavailable {
            stage: "test",
            details: "offline".to_string(),
        }
    }

    fn summary(id: i64, title: &str) -> SessionSummary {
        SessionSummary::new(
            SessionId::from(id),
            Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap(),
            title,
        )
    }

    fn driver(api: &Arc<GatedApi>) -> ConversationDriver {
        let user = AuthenticatedUser::new(UserId::from(7), "Ada", "ada@example.com");
        let controller = ConversationController::new(UserSession::new(user), DEFAULT_GREETING);
        ConversationDriver::new(controller, Arc::clone(api) as Arc<dyn TutorApi>)
    }

    #[tokio::test]
    async fn draft_answer_creates_session_at_directory_head() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        let mut observer = driver.observe();
        let answer = api.answer("What is recursion?");

        driver.send_message("What is recursion?").unwrap();

        let pending = observer.changed().await.unwrap();
        assert!(pending.answer_pending);
        assert!(pending.messages.last().is_some_and(MessageEntry::is_pending));

        answer
            .send(Ok(AskReply::new(
                "Recursion is when a function calls itself.",
                Some(SessionId::from(42)),
            )))
            .unwrap();
        let settled = driver.next_settled().await.unwrap();

        assert!(matches!(
            settled,
            Settled::Answer(Ok(SendOutcome::Answered {
                created_session: Some(_)
            }))
        ));
        let snapshot = driver.controller().snapshot();
        assert_eq!(
            snapshot.messages,
            [
                MessageEntry::bot(DEFAULT_GREETING),
                MessageEntry::user("What is recursion?"),
                MessageEntry::bot("Recursion is when a function calls itself."),
            ]
        );
        assert!(!snapshot.answer_pending);
        assert_eq!(snapshot.active_session_id, Some(SessionId::from(42)));
        assert_eq!(snapshot.sessions[0].session_id, SessionId::from(42));
        assert_eq!(snapshot.sessions[0].title_hint, "What is recursion?");

        let asked = api.asked();
        assert_eq!(asked[0].user_id, UserId::from(7));
        assert_eq!(asked[0].chat_session_id, None);
    }

    #[tokio::test]
    async fn failed_answer_resolves_placeholder_with_apology() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        api.answer("Explain closures")
            .send(Err(ApiError::Status {
                stage: "ask",
                url: "http://localhost:8000/tutor/ask".to_string(),
                status: 500,
                body: String::new(),
            }))
            .unwrap();

        driver.send_message("Explain closures").unwrap();
        let settled = driver.next_settled().await.unwrap();

        assert!(matches!(
            settled,
            Settled::Answer(Err(ChatError::AskFailed { .. }))
        ));
        let controller = driver.controller();
        assert_eq!(
            controller.messages().last(),
            Some(&MessageEntry::bot(ASK_FAILED_REPLY))
        );
        assert!(!controller.is_answer_pending());
        assert!(controller.active_session_id().is_none());
        assert!(controller.sessions().is_empty());
    }

    #[tokio::test]
    async fn blank_input_dispatches_nothing() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);

        let error = driver.send_message(" \n\t").unwrap_err();

        assert!(matches!(error, ChatError::EmptyInput { .. }));
        assert_eq!(driver.in_flight(), 0);
        assert_eq!(driver.controller().messages().len(), 1);
        assert!(api.asked().is_empty());
    }

    #[tokio::test]
    async fn late_history_for_abandoned_session_is_ignored() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        let history_a = api.history(1);
        let history_b = api.history(2);

        driver.select_session(SessionId::from(1));
        driver.select_session(SessionId::from(2));

        history_b
            .send(Ok(vec![HistoryRecord::new("About B?", "This is B.")]))
            .unwrap();
        let first = driver.next_settled().await.unwrap();
        assert!(matches!(
            first,
            Settled::History {
                outcome: Ok(HistoryOutcome::Applied { entries: 2 }),
                ..
            }
        ));

        history_a
            .send(Ok(vec![HistoryRecord::new("About A?", "This is A.")]))
            .unwrap();
        let second = driver.next_settled().await.unwrap();
        assert!(matches!(
            second,
            Settled::History {
                outcome: Ok(HistoryOutcome::Discarded),
                ..
            }
        ));

        let controller = driver.controller();
        assert_eq!(controller.active_session_id(), Some(&SessionId::from(2)));
        assert_eq!(
            controller.messages(),
            [MessageEntry::user("About B?"), MessageEntry::bot("This is B.")]
        );
        assert!(controller.awaiting_history().is_none());
    }

    #[tokio::test]
    async fn continuing_a_session_leaves_directory_untouched() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        api.listing()
            .send(Ok(vec![summary(2, "Loops"), summary(1, "Tuples")]))
            .unwrap();
        api.history(1)
            .send(Ok(vec![HistoryRecord::new("What is a tuple?", "An ordered group.")]))
            .unwrap();
        api.answer("Are tuples mutable?")
            .send(Ok(AskReply::new("No.", Some(SessionId::from(1)))))
            .unwrap();

        driver.refresh_directory();
        driver.select_session(SessionId::from(1));
        driver.settle_all().await;
        let directory = driver.controller().sessions().to_vec();

        driver.send_message("Are tuples mutable?").unwrap();
        driver.settle_all().await;

        let controller = driver.controller();
        assert_eq!(controller.sessions(), directory.as_slice());
        assert_eq!(controller.active_session_id(), Some(&SessionId::from(1)));
        assert_eq!(controller.messages().len(), 4);
        assert_eq!(api.asked()[0].chat_session_id, Some(SessionId::from(1)));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_directory() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        api.listing()
            .send(Ok(vec![summary(2, "Loops"), summary(1, "Tuples")]))
            .unwrap();
        driver.refresh_directory();
        driver.settle_all().await;

        api.listing().send(Err(offline())).unwrap();
        driver.refresh_directory();
        let settled = driver.settle_all().await;

        assert!(matches!(
            settled.as_slice(),
            [Settled::Directory(Err(ChatError::DirectoryUnavailable { .. }))]
        ));
        assert_eq!(driver.controller().sessions().len(), 2);
    }

    #[tokio::test]
    async fn new_chat_drops_answer_but_lists_its_session() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        let answer = api.answer("Slow question");

        driver.send_message("Slow question").unwrap();
        driver.start_new_chat();
        answer
            .send(Ok(AskReply::new("Slow answer", Some(SessionId::from(9)))))
            .unwrap();
        let settled = driver.next_settled().await.unwrap();

        assert!(matches!(
            settled,
            Settled::Answer(Ok(SendOutcome::Discarded {
                created_session: Some(_)
            }))
        ));
        let controller = driver.controller();
        assert_eq!(controller.messages(), [MessageEntry::bot(DEFAULT_GREETING)]);
        assert!(controller.active_session_id().is_none());
        assert_eq!(controller.sessions()[0].session_id, SessionId::from(9));
        assert_eq!(controller.sessions()[0].title_hint, "Slow question");
    }

    #[tokio::test]
    async fn answer_lands_after_history_of_the_same_session() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        let history = api.history(1);
        let answer = api.answer("Are tuples mutable?");

        driver.select_session(SessionId::from(1));
        driver.send_message("Are tuples mutable?").unwrap();

        history
            .send(Ok(vec![HistoryRecord::new("What is a tuple?", "An ordered group.")]))
            .unwrap();
        let first = driver.next_settled().await.unwrap();
        assert!(matches!(
            first,
            Settled::History {
                outcome: Ok(HistoryOutcome::Applied { entries: 2 }),
                ..
            }
        ));

        answer
            .send(Ok(AskReply::new("No.", Some(SessionId::from(1)))))
            .unwrap();
        let second = driver.next_settled().await.unwrap();
        assert!(matches!(
            second,
            Settled::Answer(Ok(SendOutcome::Answered {
                created_session: None
            }))
        ));

        let controller = driver.controller();
        assert_eq!(controller.active_session_id(), Some(&SessionId::from(1)));
        assert_eq!(
            controller.messages(),
            [
                MessageEntry::user("What is a tuple?"),
                MessageEntry::bot("An ordered group."),
                MessageEntry::user("Are tuples mutable?"),
                MessageEntry::bot("No."),
            ]
        );
        assert!(controller.sessions().is_empty());
    }

    #[tokio::test]
    async fn failed_history_keeps_selection_and_transcript() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        api.history(4).send(Err(offline())).unwrap();
        let before = driver.controller().messages().to_vec();

        driver.select_session(SessionId::from(4));
        let settled = driver.settle_all().await;

        match settled.as_slice() {
            [Settled::History {
                session_id,
                outcome: Err(ChatError::HistoryLoadFailed { session_id: failed, .. }),
            }] => {
                assert_eq!(session_id, &SessionId::from(4));
                assert_eq!(failed, &SessionId::from(4));
            }
            other => panic!("unexpected settlement {other:?}"),
        }
        let controller = driver.controller();
        assert_eq!(controller.active_session_id(), Some(&SessionId::from(4)));
        assert_eq!(controller.messages(), before.as_slice());
        assert!(controller.awaiting_history().is_none());
    }

    #[tokio::test]
    async fn dropped_response_still_settles_placeholder() {
        let api = Arc::new(GatedApi::default());
        let mut driver = driver(&api);
        drop(api.answer("Anyone there?"));

        driver.send_message("Anyone there?").unwrap();
        driver.settle_all().await;

        assert_eq!(
            driver.controller().messages().last(),
            Some(&MessageEntry::bot(ASK_FAILED_REPLY))
        );
        assert_eq!(driver.in_flight(), 0);
    }
}
