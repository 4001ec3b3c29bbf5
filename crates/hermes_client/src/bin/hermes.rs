//! hermes: command-line client for the Hermes RAG assistant.
//! Reads config, connects to the chat socket (REST fallback when it cannot),
//! streams answers to stdout and handles login state.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hermes_client::auth::{self, Credentials};
use hermes_client::messages::is_incremental;
use hermes_client::{
    config, BackendApi, ChatSession, ClientError, ClientStatus, FrameHandler, SignupRequest,
    StreamingClient,
};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hermes")]
#[command(version, about = "Hermes - RAG assistant client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file (defaults to ~/.hermes/config.yaml)
    #[arg(long, global = true, env = "HERMES_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question; reads stdin when QUESTION is omitted
    Ask { question: Option<String> },
    /// Interactive chat
    Chat,
    /// Probe backend health
    Health,
    /// Log in and store the access token
    Login {
        username: String,
        #[arg(long, env = "HERMES_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account
    Signup {
        username: String,
        #[arg(long, env = "HERMES_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    /// Log out and forget the stored token
    Logout,
    /// Show the logged-in user
    Whoami,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("HERMES_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None => config::default_config_path()
            .context("unable to determine config path (set --config or HERMES_CONFIG)"),
    }
}

fn credentials_path() -> Result<PathBuf> {
    auth::default_credentials_path().context("unable to determine home directory")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = resolve_config_path(cli.config)?;
    let cfg = config::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let settings = cfg.settings();
    tracing::debug!(?settings, "resolved settings");

    match cli.command.unwrap_or(Command::Ask { question: None }) {
        Command::Ask { question } => ask(settings, question).await,
        Command::Chat => chat(settings).await,
        Command::Health => {
            let api = BackendApi::from_settings(&settings);
            if api.health().await {
                println!("ok");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("unavailable");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Login { username, password } => {
            let api = BackendApi::from_settings(&settings);
            let resp = api.login(&username, &password).await?;
            let creds = Credentials::from(resp);
            auth::save_credentials(&credentials_path()?, &creds)?;
            println!("Logged in as {}", username);
            Ok(ExitCode::SUCCESS)
        }
        Command::Signup {
            username,
            password,
            full_name,
        } => {
            let api = BackendApi::from_settings(&settings);
            let request = SignupRequest::new(&username, &password, full_name.as_deref());
            api.signup(&request).await?;
            println!("Account {} created; log in with `hermes login {}`", username, username);
            Ok(ExitCode::SUCCESS)
        }
        Command::Logout => {
            let path = credentials_path()?;
            let creds = auth::load_credentials(&path)?;
            let api = BackendApi::from_settings(&settings);
            let token = creds.as_ref().map(|c| c.access_token.as_str());
            if let Err(e) = api.logout(token).await {
                tracing::warn!(error = %e, "logout request failed");
            }
            auth::clear_credentials(&path)?;
            println!("Logged out");
            Ok(ExitCode::SUCCESS)
        }
        Command::Whoami => match auth::load_credentials(&credentials_path()?)? {
            Some(creds) => {
                println!("{}", serde_json::to_string_pretty(&creds.user)?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("Not logged in");
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

/// Accumulated result of a one-shot question.
#[derive(Default)]
struct AskOutcome {
    sources: Vec<String>,
    error: Option<ClientError>,
    printed: bool,
}

/// Streams answer text straight to stdout.
struct PrintHandler {
    outcome: Arc<Mutex<AskOutcome>>,
}

impl PrintHandler {
    fn with_outcome(&self, f: impl FnOnce(&mut AskOutcome)) {
        let mut guard = self
            .outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard);
    }
}

impl FrameHandler for PrintHandler {
    fn on_sources(&mut self, sources: Vec<String>, _mode: Option<String>) {
        self.with_outcome(|o| o.sources = sources);
    }

    fn on_token(&mut self, content: String, mode: Option<String>) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.with_outcome(|o| {
            // A snapshot supersedes whatever streamed before it.
            if !is_incremental(mode.as_deref()) && o.printed {
                let _ = writeln!(out);
            }
            o.printed = true;
        });
        let _ = write!(out, "{}", content);
        let _ = out.flush();
    }

    fn on_error(&mut self, error: ClientError) {
        self.with_outcome(|o| o.error = Some(error));
    }
}

fn read_question(arg: Option<String>) -> Result<String> {
    let question = match arg {
        Some(q) => q,
        None => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line
        }
    };
    let question = question.trim().to_string();
    if question.is_empty() {
        bail!("no question provided (pass it as an argument or on stdin)");
    }
    Ok(question)
}

async fn ask(settings: hermes_client::Settings, question: Option<String>) -> Result<ExitCode> {
    let question = read_question(question)?;
    let outcome = Arc::new(Mutex::new(AskOutcome::default()));
    let client = StreamingClient::spawn(
        settings,
        PrintHandler {
            outcome: outcome.clone(),
        },
    );

    client.wait_for(ClientStatus::is_settled).await?;
    client.send_message(&question)?;
    client.wait_for(|s| !s.is_loading).await?;
    client.dispose().await;

    let outcome = std::mem::take(
        &mut *outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner),
    );
    if let Some(error) = outcome.error {
        eprintln!("Error: {}", error);
        return Ok(ExitCode::FAILURE);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out)?;
    if !outcome.sources.is_empty() {
        writeln!(out, "\nSources:")?;
        for src in &outcome.sources {
            writeln!(out, "  {}", src)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_status(status: &ClientStatus) {
    let label = if status.is_connected {
        "connected"
    } else if status.is_offline() {
        "offline"
    } else {
        "connecting"
    };
    println!("[{}]", label);
}

fn print_conversations(session: &ChatSession) {
    session.read(|store| {
        for (i, conv) in store.conversations().iter().enumerate() {
            let marker = if conv.id == store.current_id() { "*" } else { " " };
            println!("{} {}. {}", marker, i + 1, conv.title);
        }
    });
}

/// Conversation id at 1-based position `arg` in the list.
fn conversation_at(session: &ChatSession, arg: &str) -> Option<String> {
    let n: usize = arg.trim().parse().ok()?;
    session.read(|store| {
        n.checked_sub(1)
            .and_then(|i| store.conversations().get(i))
            .map(|c| c.id.clone())
    })
}

fn print_last_answer(session: &ChatSession) {
    session.read(|store| {
        let id = store.current_id();
        if let Some(msg) = store.visible_messages(id).last() {
            println!("{}", msg.content);
            if let Some(sources) = msg.sources.as_ref().filter(|s| !s.is_empty()) {
                println!("\nSources:");
                for src in sources {
                    println!("  {}", src);
                }
            }
        }
    });
}

async fn chat(settings: hermes_client::Settings) -> Result<ExitCode> {
    let session = ChatSession::start(settings);
    let status = session.wait_ready().await?;
    print_status(&status);
    print_last_answer(&session);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));
        match cmd {
            "/quit" | "/exit" => break,
            "/new" => {
                session.new_conversation();
                print_last_answer(&session);
            }
            "/list" => print_conversations(&session),
            "/switch" => match conversation_at(&session, arg) {
                Some(id) => {
                    session.switch_conversation(&id);
                    print_last_answer(&session);
                }
                None => eprintln!("No conversation {}", arg),
            },
            "/delete" => match conversation_at(&session, arg) {
                Some(id) => {
                    session.delete_conversation(&id);
                    print_conversations(&session);
                }
                None => eprintln!("No conversation {}", arg),
            },
            "/search" => {
                for conv in session.search(arg) {
                    println!("  {}", conv.title);
                }
            }
            "/stop" => eprintln!("Nothing to stop"),
            "/reconnect" => {
                session.reconnect()?;
                println!("[connecting]");
            }
            "/status" => print_status(&session.status()),
            _ => {
                if !session.send_message(line)? {
                    continue;
                }
                // Only /stop is accepted while an answer is being generated.
                loop {
                    tokio::select! {
                        idle = session.wait_idle() => {
                            idle?;
                            break;
                        }
                        next = lines.next_line() => match next?.as_deref().map(str::trim) {
                            Some("/stop") => {
                                session.stop()?;
                                break;
                            }
                            Some(_) => eprintln!("Still answering; type /stop to cancel"),
                            None => break,
                        },
                    }
                }
                print_last_answer(&session);
            }
        }
    }
    session.dispose().await;
    Ok(ExitCode::SUCCESS)
}
