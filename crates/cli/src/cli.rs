use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Terminal client for the AI tutor service
#[derive(Parser, Debug)]
#[command(name = "tutor", version, about = "Chat with the AI tutor from the terminal")]
pub struct Cli {
    /// Tutor service URL; overrides the configured one for this run
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account
    Register {
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        login: LoginArgs,
    },
    /// List your conversations, most recent first
    Sessions {
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Print the transcript of one conversation
    History {
        session_id: String,
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Start an interactive chat
    Chat {
        /// Open this conversation instead of starting a new one
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        login: LoginArgs,
    },
    /// Show or change persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct LoginArgs {
    /// Account email; prompted for when missing
    #[arg(long, env = "TUTOR_EMAIL")]
    pub email: Option<String>,

    /// Account password; prompted for when missing
    #[arg(long, env = "TUTOR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Persist new values
    Set {
        #[arg(long)]
        base_url: Option<String>,
        /// Request deadline in seconds, 0 to disable
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        greeting: Option<String>,
        #[arg(long)]
        log_filter: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_takes_positional_session_id() {
        let cli = Cli::try_parse_from([
            "tutor",
            "history",
            "42",
            "--email",
            "ada@example.com",
            "--base-url",
            "http://tutor.test",
        ])
        .unwrap();

        assert_eq!(cli.base_url.as_deref(), Some("http://tutor.test"));
        match cli.command {
            Command::History { session_id, login } => {
                assert_eq!(session_id, "42");
                assert_eq!(login.email.as_deref(), Some("ada@example.com"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_set_accepts_partial_updates() {
        let cli = Cli::try_parse_from(["tutor", "config", "set", "--timeout-secs", "30"]).unwrap();

        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Set {
                    timeout_secs: Some(30),
                    base_url: None,
                    ..
                }
            }
        ));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["tutor"]).is_err());
    }
}
