use snafu::{ResultExt, ensure};
use tutor_api::{AuthenticatedUser, Credentials, NewAccount, TutorApi, UserId};

use crate::error::{ChatResult, LoginFailedSnafu, MissingCredentialsSnafu, RegistrationFailedSnafu};

/// The signed-in user. Created by [`UserSession::login`], torn down by
/// [`UserSession::logout`]; the conversation controller owns one for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    user: AuthenticatedUser,
}

impl UserSession {
    pub fn new(user: AuthenticatedUser) -> Self {
        Self { user }
    }

    pub async fn login(api: &dyn TutorApi, credentials: Credentials) -> ChatResult<Self> {
        ensure!(
            credentials.is_complete(),
            MissingCredentialsSnafu { stage: "login" }
        );

        let email = credentials.email.clone();
        let user = api.login(credentials).await.context(LoginFailedSnafu {
            stage: "login",
            email: email.clone(),
        })?;

        tracing::info!(user_id = %user.user_id, %email, "signed in");
        Ok(Self::new(user))
    }

    pub async fn register(api: &dyn TutorApi, account: NewAccount) -> ChatResult<AuthenticatedUser> {
        ensure!(
            account.is_complete(),
            MissingCredentialsSnafu { stage: "register" }
        );

        let email = account.email.clone();
        let user = api
            .register(account)
            .await
            .context(RegistrationFailedSnafu {
                stage: "register",
                email: email.clone(),
            })?;

        tracing::info!(user_id = %user.user_id, %email, "registered account");
        Ok(user)
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.user_id
    }

    pub fn display_name(&self) -> &str {
        if self.user.name.trim().is_empty() {
            &self.user.email
        } else {
            &self.user.name
        }
    }

    pub fn logout(self) {
        tracing::info!(user_id = %self.user.user_id, "signed out");
    }
}
