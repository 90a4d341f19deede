//! `tasklist` command-line client.
//!
//! Logs go to a file (default `$TMPDIR/tasklist.log`) so stdout carries only
//! command output.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasklist::api::{ApiClient, ApiError};
use tasklist::config::{CliArgs, ClientConfig, Command, ConfigError};
use tasklist::connection::ConnectionError;
use tasklist::net::{self, LiveEvent, LiveHandle};
use tasklist::session::{Session, SessionError, SessionStore};
use tasklist::sync::LocalState;
use tasklist_proto::{ListId, TaskId, TaskList};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("not logged in; run `tasklist login` first")]
    NotLoggedIn,
    #[error("list {0} not found")]
    NoSuchList(i64),
    #[error("no lists available")]
    NoLists,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("tasklist starting");

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging via `tracing-appender`.
///
/// Returns a guard that must be held for the lifetime of the program to
/// ensure buffered logs are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasklist.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_env("TASKLIST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(cli: &CliArgs) -> Result<(), CliError> {
    let config = ClientConfig::load(cli)?;
    let store = SessionStore::default_location()?;
    let api = ApiClient::new(&config.api_url)?;

    match cli.command.clone().unwrap_or(Command::Watch { list: None }) {
        Command::Login { email, password } => {
            let session = api.login(&email, &password).await?;
            store.save(&session)?;
            println!("logged in as {}", session.user_name());
        }
        Command::Logout => {
            store.clear()?;
            println!("logged out");
        }
        Command::Lists => {
            let session = require_session(&store)?;
            let lists = authorized(&store, api.fetch_lists(&session).await)?;
            for list in &lists {
                print_list(list);
            }
        }
        Command::Watch { list } => {
            let session = require_session(&store)?;
            watch(&config, &api, &store, &session, list.map(ListId::new)).await?;
        }
    }
    Ok(())
}

fn require_session(store: &SessionStore) -> Result<Session, CliError> {
    store.load()?.ok_or(CliError::NotLoggedIn)
}

/// Drops the stored session when the backend no longer accepts it.
fn authorized<T>(store: &SessionStore, result: Result<T, ApiError>) -> Result<T, CliError> {
    match result {
        Err(e) if e.is_unauthorized() => {
            if let Err(clear) = store.clear() {
                tracing::warn!(err = %clear, "failed to clear rejected session");
            }
            Err(e.into())
        }
        other => other.map_err(Into::into),
    }
}

fn print_list(list: &TaskList) {
    println!(
        "{:>6}  {:<32} {:>4} tasks  {} members",
        list.id,
        list.name,
        list.tasks.len(),
        list.assignments.len()
    );
}

async fn watch(
    config: &ClientConfig,
    api: &ApiClient,
    store: &SessionStore,
    session: &Session,
    requested: Option<ListId>,
) -> Result<(), CliError> {
    let mut state = LocalState::new(session.user_id());
    let _ = state.replace_lists(authorized(store, api.fetch_lists(session).await)?);

    let selected = match requested {
        Some(id) if state.list(id).is_some() => id,
        Some(id) => return Err(CliError::NoSuchList(id.get())),
        None => state.lists().first().map(|l| l.id).ok_or(CliError::NoLists)?,
    };
    let tasks = authorized(store, api.fetch_tasks(session, selected).await)?;
    let _ = state.select_list(selected, tasks);

    if let Some(list) = state.list(selected) {
        println!("watching list {} \"{}\"", list.id, list.name);
    }
    for task in state.tasks() {
        println!("  [{}] {} ({})", task.id, task.name, task.status_name);
    }

    let (handle, mut events) = net::spawn_live(&config.to_live_config(), session, state)?;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&handle, &event),
                None => break,
            },
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(err = %e, "failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }
    handle.shutdown().await;
    println!("disconnected");
    Ok(())
}

fn print_event(handle: &LiveHandle, event: &LiveEvent) {
    match event {
        LiveEvent::Connected { reconnect: false } => println!("* connected"),
        LiveEvent::Connected { reconnect: true } => println!("* reconnected"),
        LiveEvent::Disconnected { code, reason, .. } => {
            println!("* connection closed ({code}) {reason}");
        }
        LiveEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => println!(
            "* reconnecting in {}s (attempt {attempt}/{max_attempts})",
            delay.as_secs()
        ),
        LiveEvent::ReconnectFailed { message } | LiveEvent::Error(message) => {
            println!("! {message}");
        }
        LiveEvent::StateChanged { kind, entity } => {
            let task = entity.and_then(|id| {
                handle.with_state(|s| {
                    s.task(TaskId::new(id))
                        .map(|t| format!("{} ({})", t.name, t.status_name))
                })
            });
            match task {
                Some(task) => println!("~ {kind}: {task}"),
                None => println!("~ {kind}"),
            }
        }
        LiveEvent::NotificationReceived { task_id } => {
            let name = handle.with_state(|s| {
                s.notifications()
                    .get(*task_id)
                    .map(|n| format!("{} (from {})", n.task_name, n.creator.user_name))
            });
            println!(
                "+ assigned to you: {}",
                name.unwrap_or_else(|| task_id.to_string())
            );
        }
    }
}
