use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use super::error::{ApiResult, BuildClientSnafu, DecodeSnafu, RequestSnafu, StatusSnafu};
use super::ids::{SessionId, UserId};
use super::types::{
    AskReply, AskRequest, AuthenticatedUser, Credentials, HistoryPayload, HistoryRecord,
    NewAccount, SessionSummary,
};
use super::{BoxFuture, TutorApi};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpApiConfig {
    pub base_url: String,
    /// Transport-level deadline. `None` waits for the server or the OS to give up.
    pub request_timeout: Option<Duration>,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl HttpApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// `TutorApi` over the service's JSON HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpTutorApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTutorApi {
    pub fn new(config: HttpApiConfig) -> ApiResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().context(BuildClientSnafu {
            stage: "http-build-client",
        })?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment.trim_matches('/'));
        }
        url
    }

    async fn get_json<T>(&self, stage: &'static str, url: String) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        tracing::debug!(%url, stage, "GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(RequestSnafu {
                stage,
                url: url.clone(),
            })?;

        decode_response(stage, url, response).await
    }

    async fn post_json<B, T>(&self, stage: &'static str, url: String, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!(%url, stage, "POST");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context(RequestSnafu {
                stage,
                url: url.clone(),
            })?;

        decode_response(stage, url, response).await
    }
}

impl TutorApi for HttpTutorApi {
    fn list_sessions(&self, user_id: UserId) -> BoxFuture<'_, ApiResult<Vec<SessionSummary>>> {
        Box::pin(async move {
            let url = self.endpoint(&["tutor", "sessions", user_id.as_str()]);
            self.get_json("list-sessions", url).await
        })
    }

    fn session_history(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>> {
        Box::pin(async move {
            let url = self.endpoint(&["tutor", "history", user_id.as_str(), session_id.as_str()]);
            let payload: HistoryPayload = self.get_json("session-history", url).await?;
            Ok(payload.into_records())
        })
    }

    fn ask(&self, request: AskRequest) -> BoxFuture<'_, ApiResult<AskReply>> {
        Box::pin(async move {
            let url = self.endpoint(&["tutor", "ask"]);
            self.post_json("ask", url, &request).await
        })
    }

    fn login(&self, credentials: Credentials) -> BoxFuture<'_, ApiResult<AuthenticatedUser>> {
        Box::pin(async move {
            let url = self.endpoint(&["auth", "login"]);
            self.post_json("login", url, &credentials).await
        })
    }

    fn register(&self, account: NewAccount) -> BoxFuture<'_, ApiResult<AuthenticatedUser>> {
        Box::pin(async move {
            let url = self.endpoint(&["auth", "register"]);
            self.post_json("register", url, &account).await
        })
    }
}

async fn decode_response<T>(
    stage: &'static str,
    url: String,
    response: reqwest::Response,
) -> ApiResult<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return StatusSnafu {
            stage,
            url,
            status: status.as_u16(),
            body,
        }
        .fail();
    }

    response.json::<T>().await.context(DecodeSnafu { stage, url })
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}
