//! Request/response contract with the tutoring service.
//!
//! The chat core only sees [`TutorApi`]; [`HttpTutorApi`] is the production
//! implementation and tests supply in-memory fakes.

pub mod error;
pub mod http;
pub mod ids;
pub mod types;

use std::future::Future;
use std::pin::Pin;

pub use error::{ApiError, ApiResult};
pub use http::{DEFAULT_BASE_URL, HttpApiConfig, HttpTutorApi};
pub use ids::{SessionId, UserId};
pub use types::{
    AskReply, AskRequest, AuthenticatedUser, Credentials, HistoryRecord, NewAccount,
    SessionSummary,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait TutorApi: Send + Sync {
    /// Sessions of one user, most recent first.
    fn list_sessions(&self, user_id: UserId) -> BoxFuture<'_, ApiResult<Vec<SessionSummary>>>;
    /// Stored exchanges of one session in chronological order.
    fn session_history(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>>;
    fn ask(&self, request: AskRequest) -> BoxFuture<'_, ApiResult<AskReply>>;
    fn login(&self, credentials: Credentials) -> BoxFuture<'_, ApiResult<AuthenticatedUser>>;
    fn register(&self, account: NewAccount) -> BoxFuture<'_, ApiResult<AuthenticatedUser>>;
}
