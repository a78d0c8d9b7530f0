use snafu::Snafu;
use tutor_api::{ApiError, SessionId, UserId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message text is empty"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("an answer is still pending for this conversation"))]
    PendingEntryExists { stage: &'static str },
    #[snafu(display("no pending answer placeholder to resolve"))]
    NoPendingEntry { stage: &'static str },
    #[snafu(display("session list for user {user_id} is unavailable: {source}"))]
    DirectoryUnavailable {
        stage: &'static str,
        user_id: UserId,
        source: ApiError,
    },
    #[snafu(display("failed to load history of session {session_id}: {source}"))]
    HistoryLoadFailed {
        stage: &'static str,
        session_id: SessionId,
        source: ApiError,
    },
    #[snafu(display("tutor did not answer: {source}"))]
    AskFailed {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("email and password are required"))]
    MissingCredentials { stage: &'static str },
    #[snafu(display("login failed for {email}: {source}"))]
    LoginFailed {
        stage: &'static str,
        email: String,
        source: ApiError,
    },
    #[snafu(display("registration failed for {email}: {source}"))]
    RegistrationFailed {
        stage: &'static str,
        email: String,
        source: ApiError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
