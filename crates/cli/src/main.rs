mod cli;
mod error;
mod repl;
mod settings;
mod view;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use console::{Term, style};
use snafu::{OptionExt, ResultExt};
use tracing_subscriber::EnvFilter;
use tutor_api::{Credentials, HttpTutorApi, NewAccount, SessionId, TutorApi};
use tutor_chat::{ConversationController, ConversationDriver, UserSession};

use cli::{Cli, Command, ConfigAction, LoginArgs};
use error::{
    ChatSnafu, ClientSnafu, CliResult, InputClosedSnafu, SettingsSnafu, TerminalSnafu,
};
use repl::{ChatExit, Input};
use settings::{ClientSettings, SettingsStore};
use view::TranscriptView;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let store = match &cli.config {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };
    init_tracing(&store.settings().log_filter);

    match run(cli, store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            view::failure(&error);
            ExitCode::FAILURE
        }
    }
}

// Logs go to stderr so they never interleave with the transcript on stdout.
fn init_tracing(configured_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, store: SettingsStore) -> CliResult<()> {
    let mut settings = (*store.settings()).clone();
    if let Some(base_url) = cli.base_url {
        settings = ClientSettings {
            base_url,
            ..settings
        }
        .normalized();
    }

    let mut input = repl::stdin_lines();
    match cli.command {
        Command::Config { action } => configure(&store, action),
        Command::Register { name, login } => {
            let api = connect(&settings)?;
            register(api.as_ref(), &mut input, name, login).await
        }
        Command::Sessions { login } => {
            let api = connect(&settings)?;
            let user = sign_in(api.as_ref(), &mut input, login).await?;
            let mut controller = ConversationController::new(user, settings.greeting.clone());
            controller
                .load_directory(api.as_ref())
                .await
                .context(ChatSnafu {
                    stage: "list-sessions",
                })?;
            view::print_directory(&controller.snapshot().directory_rows());
            controller.into_user_session().logout();
            Ok(())
        }
        Command::History { session_id, login } => {
            let api = connect(&settings)?;
            let user = sign_in(api.as_ref(), &mut input, login).await?;
            let mut controller = ConversationController::new(user, settings.greeting.clone());
            controller
                .select_session(api.as_ref(), SessionId::new(session_id))
                .await
                .context(ChatSnafu {
                    stage: "session-history",
                })?;
            TranscriptView::for_terminal().print_entries(controller.messages());
            controller.into_user_session().logout();
            Ok(())
        }
        Command::Chat { session, login } => {
            let api = connect(&settings)?;
            let user = sign_in(api.as_ref(), &mut input, login).await?;
            let controller = ConversationController::new(user, settings.greeting.clone());
            let mut driver = ConversationDriver::new(controller, api);
            driver.refresh_directory();
            if let Some(session_id) = session {
                driver.select_session(SessionId::new(session_id));
            }

            let exit = repl::run(&mut driver, &mut input).await?;
            driver.into_user_session().logout();
            if exit == ChatExit::Logout {
                println!("{}", style("signed out").dim());
            }
            Ok(())
        }
    }
}

fn connect(settings: &ClientSettings) -> CliResult<Arc<dyn TutorApi>> {
    let api = HttpTutorApi::new(settings.http_config()).context(ClientSnafu {
        stage: "build-http-client",
    })?;
    tracing::debug!(base_url = api.base_url(), "using tutor service");
    Ok(Arc::new(api))
}

fn configure(store: &SettingsStore, action: ConfigAction) -> CliResult<()> {
    match action {
        ConfigAction::Show => {
            let settings = store.settings();
            println!("settings file  {}", store.config_path().display());
            println!("base_url       {}", settings.base_url);
            match settings.request_timeout_secs {
                Some(secs) => println!("timeout        {secs}s"),
                None => println!("timeout        none"),
            }
            println!("greeting       {}", settings.greeting);
            println!("log_filter     {}", settings.log_filter);
            Ok(())
        }
        ConfigAction::Set {
            base_url,
            timeout_secs,
            greeting,
            log_filter,
        } => {
            let mut settings = store.stored_settings();
            if let Some(base_url) = base_url {
                settings.base_url = base_url;
            }
            if let Some(secs) = timeout_secs {
                settings.request_timeout_secs = Some(secs);
            }
            if let Some(greeting) = greeting {
                settings.greeting = greeting;
            }
            if let Some(log_filter) = log_filter {
                settings.log_filter = log_filter;
            }

            store.update(settings).context(SettingsSnafu {
                stage: "update-settings",
            })?;
            println!("saved {}", store.config_path().display());
            Ok(())
        }
    }
}

async fn register(
    api: &dyn TutorApi,
    input: &mut Input,
    name: Option<String>,
    login: LoginArgs,
) -> CliResult<()> {
    let name = match name {
        Some(name) => name,
        None => prompt_line(input, "name").await?,
    };
    let (email, password) = read_login(input, login).await?;

    let user = UserSession::register(api, NewAccount::new(name, email, password))
        .await
        .context(ChatSnafu { stage: "register" })?;
    println!(
        "registered {} as user #{}, sign in with `tutor chat`",
        user.email, user.user_id
    );
    Ok(())
}

async fn sign_in(api: &dyn TutorApi, input: &mut Input, login: LoginArgs) -> CliResult<UserSession> {
    let (email, password) = read_login(input, login).await?;
    UserSession::login(api, Credentials::new(email, password))
        .await
        .context(ChatSnafu { stage: "login" })
}

async fn read_login(input: &mut Input, login: LoginArgs) -> CliResult<(String, String)> {
    let email = match login.email {
        Some(email) => email,
        None => prompt_line(input, "email").await?,
    };
    let password = match login.password {
        Some(password) => password,
        None => prompt_password(input).await?,
    };
    Ok((email, password))
}

async fn prompt_line(input: &mut Input, what: &'static str) -> CliResult<String> {
    print!("{what}: ");
    std::io::stdout()
        .flush()
        .context(TerminalSnafu { stage: "prompt" })?;

    let line = input
        .next_line()
        .await
        .context(TerminalSnafu { stage: "prompt" })?;
    line.context(InputClosedSnafu {
        stage: "prompt",
        what,
    })
}

async fn prompt_password(input: &mut Input) -> CliResult<String> {
    if !console::user_attended() {
        return prompt_line(input, "password").await;
    }

    print!("password: ");
    std::io::stdout()
        .flush()
        .context(TerminalSnafu { stage: "prompt" })?;
    tokio::task::spawn_blocking(|| Term::stdout().read_secure_line())
        .await
        .map_err(std::io::Error::other)
        .and_then(|read| read)
        .context(TerminalSnafu {
            stage: "read-password",
        })
}
