//! hackportal - command-line client for the Hack the 6ix applicant portal.
//!
//! Signs in with a token pair issued by the portal's identity provider, then
//! runs one action per invocation against the persisted session.

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hackportal_core::{
    ApiClient, Execution, PortalActions, PortalConfig, RefreshOutcome, RequestOptions,
    SessionStore,
};

/// Transport timeout when the config does not set one
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on waiting for the profile to load
const READY_TIMEOUT_SECS: u64 = 60;

const USAGE: &str = "\
Usage: hackportal <command> [args]

Commands:
  login                      Sign in with an access/refresh token pair
  whoami                     Show the signed-in user and application status
  refresh                    Exchange the refresh token for a new pair
  logout                     End the session here and on the server
  rsvp <yes|no>              Confirm or decline attendance
  enums                      List the application form's choices
  submit <file.json> [--final]
                             Save an application draft, or submit it
  resume <file>              Upload a resume

Environment:
  HACKPORTAL_API_URL, HACKPORTAL_AUTH_PROVIDER, HACKPORTAL_STORAGE,
  HACKPORTAL_REQUEST_TIMEOUT_SECS, RUST_LOG";

#[derive(Debug, PartialEq)]
enum Command {
    Login,
    Whoami,
    Refresh,
    Logout,
    Rsvp(bool),
    Enums,
    Submit { file: String, submit: bool },
    Resume(String),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(name) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];
    let command = match name.as_str() {
        "login" => Command::Login,
        "whoami" => Command::Whoami,
        "refresh" => Command::Refresh,
        "logout" => Command::Logout,
        "enums" => Command::Enums,
        "rsvp" => match rest.first().map(String::as_str) {
            Some("yes") => Command::Rsvp(true),
            Some("no") => Command::Rsvp(false),
            _ => bail!("rsvp expects `yes` or `no`"),
        },
        "submit" => {
            let file = rest
                .iter()
                .find(|arg| !arg.starts_with("--"))
                .ok_or_else(|| anyhow!("submit expects an application JSON file"))?;
            Command::Submit {
                file: file.clone(),
                submit: rest.iter().any(|arg| arg == "--final"),
            }
        }
        "resume" => Command::Resume(
            rest.first()
                .cloned()
                .ok_or_else(|| anyhow!("resume expects a file path"))?,
        ),
        "help" | "--help" | "-h" => Command::Help,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };
    Ok(command)
}

/// Log to stderr, filtered by RUST_LOG, and to a daily file in the cache dir
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer().with_writer(io::stderr);

    let log_dir = PortalConfig::cache_dir()
        .and_then(|dir| std::fs::create_dir_all(&dir).map(|_| dir).map_err(Into::into));
    let Ok(log_dir) = log_dir else {
        tracing_subscriber::registry().with(stderr).with(filter).init();
        return None;
    };
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "hackportal.log"));
    tracing_subscriber::registry()
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(filter)
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let _log_guard = init_tracing();

    let mut config = PortalConfig::load()?;
    config
        .request_timeout_secs
        .get_or_insert(DEFAULT_REQUEST_TIMEOUT_SECS);
    info!(api_url = %config.api_url, storage = ?config.storage, "hackportal starting");

    let api = ApiClient::new(&config).context("Failed to build HTTP client")?;
    let session = SessionStore::new(api, config.open_storage()?);
    if command != Command::Login && session.restore()? {
        debug!("Waiting for persisted session");
        wait_ready(&session).await?;
    }

    run(command, &session).await
}

async fn run(command: Command, session: &SessionStore) -> Result<()> {
    let actions = PortalActions::new(session.clone());
    match command {
        Command::Login => login(session).await,
        Command::Whoami => whoami(session),
        Command::Refresh => {
            require_session(session)?;
            match session.refresh_credential().await {
                RefreshOutcome::Refreshed(_) => {
                    println!("Credential refreshed.");
                    Ok(())
                }
                RefreshOutcome::Rejected => bail!("Refresh token was rejected; please log in again"),
                RefreshOutcome::Skipped => bail!("No session to refresh"),
                RefreshOutcome::Unreachable(reason) => bail!("Could not refresh: {}", reason),
            }
        }
        Command::Logout => {
            require_session(session)?;
            session.revoke_credential().await;
            println!("Logged out.");
            Ok(())
        }
        Command::Rsvp(attending) => {
            require_session(session)?;
            report(actions.send_rsvp(attending).await?)?;
            println!("{}", if attending { "Attendance confirmed." } else { "Attendance declined." });
            Ok(())
        }
        Command::Enums => {
            let execution = actions
                .application_enums()
                .execute(RequestOptions::default())
                .await?;
            let enums = report(execution)?;
            println!("{}", serde_json::to_string_pretty(&enums)?);
            Ok(())
        }
        Command::Submit { file, submit } => {
            require_session(session)?;
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file))?;
            let application: Value = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not valid JSON", file))?;
            report(actions.save_application(application, submit).await?)?;
            println!("{}", if submit { "Application submitted." } else { "Draft saved." });
            Ok(())
        }
        Command::Resume(file) => {
            require_session(session)?;
            let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file))?;
            let file_name = Path::new(&file)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("resume")
                .to_string();
            report(actions.upload_resume(&file_name, bytes).await?)?;
            println!("Resume uploaded.");
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

async fn login(session: &SessionStore) -> Result<()> {
    let access_token = rpassword::prompt_password("Access token: ")?;
    let refresh_token = rpassword::prompt_password("Refresh token: ")?;
    let (access_token, refresh_token) = (access_token.trim(), refresh_token.trim());
    if access_token.is_empty() || refresh_token.is_empty() {
        bail!("Both tokens are required");
    }

    session
        .set_credential(access_token, refresh_token)
        .await
        .context("Failed to store credential")?;
    let snapshot = wait_ready(session).await?;
    match snapshot.user() {
        Some(user) => {
            println!("Logged in as {}.", user.display_name());
            Ok(())
        }
        None => bail!("Login failed: the portal did not accept the access token"),
    }
}

fn whoami(session: &SessionStore) -> Result<()> {
    let snapshot = session.snapshot();
    let user = snapshot
        .user()
        .ok_or_else(|| anyhow!("Not logged in. Run `hackportal login` first."))?;
    println!("{}", user.display_name());
    if let Some(email) = &user.email {
        println!("  email:  {}", email);
    }
    println!("  status: {}", user.status.label());
    Ok(())
}

async fn wait_ready(session: &SessionStore) -> Result<hackportal_core::SessionSnapshot> {
    tokio::time::timeout(Duration::from_secs(READY_TIMEOUT_SECS), session.wait_ready())
        .await
        .context("Timed out waiting for the portal")
}

fn require_session(session: &SessionStore) -> Result<()> {
    if !session.snapshot().is_authenticated() {
        bail!("Not logged in. Run `hackportal login` first.");
    }
    Ok(())
}

/// Turn a settled call into its payload, or a readable error
fn report<T>(execution: Execution<T>) -> Result<T> {
    let result = execution
        .settled()
        .ok_or_else(|| anyhow!("Request did not complete"))?;
    Ok(result.into_result()?)
}
