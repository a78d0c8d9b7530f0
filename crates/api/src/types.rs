use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{SessionId, UserId};

/// One persisted chat session as listed by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(rename = "chat_session_id")]
    pub session_id: SessionId,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Short text derived from the session's first query.
    #[serde(rename = "chat_query", default)]
    pub title_hint: String,
}

impl SessionSummary {
    pub fn new(
        session_id: SessionId,
        created_at: DateTime<Utc>,
        title_hint: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            created_at,
            title_hint: title_hint.into(),
        }
    }
}

/// One stored question/answer exchange inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub query: String,
    #[serde(default)]
    pub answer: String,
}

impl HistoryRecord {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }
}

/// History payloads arrive either wrapped (`{"chats": [...]}`) or as a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum HistoryPayload {
    Envelope { chats: Vec<HistoryRecord> },
    Records(Vec<HistoryRecord>),
}

impl HistoryPayload {
    pub(crate) fn into_records(self) -> Vec<HistoryRecord> {
        match self {
            Self::Envelope { chats } => chats,
            Self::Records(records) => records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AskRequest {
    pub query: String,
    pub user_id: UserId,
    /// `None` asks the service to open a new session.
    pub chat_session_id: Option<SessionId>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>, user_id: UserId, session_id: Option<SessionId>) -> Self {
        Self {
            query: query.into(),
            user_id,
            chat_session_id: session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AskReply {
    #[serde(default)]
    pub answer: Option<String>,
    /// Present when the request opened a new session.
    #[serde(rename = "chat_session_id", default)]
    pub session_id: Option<SessionId>,
}

impl AskReply {
    pub fn new(answer: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            answer: Some(answer.into()),
            session_id,
        }
    }

    /// Answer text if the service produced a non-blank one.
    pub fn answer_text(&self) -> Option<&str> {
        self.answer
            .as_deref()
            .filter(|answer| !answer.trim().is_empty())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Emails are matched case-insensitively by the service.
    pub fn new(email: impl AsRef<str>, password: impl Into<String>) -> Self {
        Self {
            email: email.as_ref().trim().to_lowercase(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.email.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl NewAccount {
    pub fn new(
        name: impl AsRef<str>,
        email: impl AsRef<str>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.as_ref().trim().to_string(),
            email: email.as_ref().trim().to_lowercase(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.email.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity returned by login and registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    #[serde(alias = "id", alias = "userId")]
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl AuthenticatedUser {
    pub fn new(user_id: UserId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            email: email.into(),
        }
    }
}

/// The service stores naive timestamps; they are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }

        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| naive.and_utc())
    }
}
