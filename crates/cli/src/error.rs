use snafu::Snafu;
use tutor_api::ApiError;
use tutor_chat::ChatError;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("failed to set up the tutor client on `{stage}`: {source}"))]
    Client { stage: &'static str, source: ApiError },
    #[snafu(display("{source}"))]
    Chat { stage: &'static str, source: ChatError },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read from the terminal on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("input closed before {what} was entered"))]
    InputClosed {
        stage: &'static str,
        what: &'static str,
    },
}

pub type CliResult<T> = Result<T, CliError>;
