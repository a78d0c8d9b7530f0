use snafu::ResultExt;
use tutor_api::{ApiResult, SessionSummary, TutorApi, UserId};

use crate::error::{ChatResult, DirectoryUnavailableSnafu};

/// Cached, most-recent-first list of the signed-in user's sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDirectory {
    sessions: Vec<SessionSummary>,
    revision: u64,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Fetches and replaces the whole list.
    pub async fn load(&mut self, api: &dyn TutorApi, user_id: &UserId) -> ChatResult<usize> {
        let listing = api.list_sessions(user_id.clone()).await;
        self.apply_listing(user_id, listing)
    }

    /// Applies a settled listing. A failure keeps the previous list in place.
    pub fn apply_listing(
        &mut self,
        user_id: &UserId,
        listing: ApiResult<Vec<SessionSummary>>,
    ) -> ChatResult<usize> {
        let sessions = listing.context(DirectoryUnavailableSnafu {
            stage: "directory-load",
            user_id: user_id.clone(),
        })?;

        self.sessions = sessions;
        self.touch();
        Ok(self.sessions.len())
    }

    /// Inserts a freshly created session at the head without a round-trip.
    pub fn prepend(&mut self, summary: SessionSummary) {
        self.sessions
            .retain(|existing| existing.session_id != summary.session_id);
        self.sessions.insert(0, summary);
        self.touch();
    }

    fn touch(&mut self) {
        self.revision = self.revision.saturating_add(1);
    }
}
