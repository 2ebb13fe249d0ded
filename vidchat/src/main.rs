//! `VidChat`: line-oriented client for the video-analysis chat assistant.
//!
//! Reads commands and messages from stdin and prints the conversation as it
//! syncs. Configuration via CLI flags, environment variables, or config file
//! (`~/.config/vidchat/config.toml`).
//!
//! ```bash
//! # Offline demo with a local echo bot
//! cargo run --bin vidchat -- --offline
//!
//! # Against a backend
//! VIDCHAT_URL=http://127.0.0.1:8000/ VIDCHAT_EMAIL=me@example.com \
//!     VIDCHAT_PASSWORD=secret cargo run --bin vidchat
//! ```

use std::io;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use vidchat::app::{self, App, Command, HELP_TEXT};
use vidchat::chat::{ConversationSession, SessionConfig};
use vidchat::config::{CliArgs, ClientConfig};
use vidchat::sync::http::HttpSyncClient;
use vidchat::sync::memory::InMemoryBackend;
use vidchat::sync::{Attachment, SyncClient};

/// How long the offline echo bot takes to answer.
const OFFLINE_REPLY_DELAY: Duration = Duration::from_millis(1500);

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Logs go to a file so they never interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(offline = config.offline, base_url = %config.http.base_url, "vidchat starting");

    let result = if config.offline {
        println!("offline mode: replies come from a local echo bot");
        run(InMemoryBackend::with_echo_bot(OFFLINE_REPLY_DELAY), config.session).await
    } else {
        let client = HttpSyncClient::new(config.http.clone()).map_err(io::Error::other)?;
        if let (Some(email), Some(password)) = (&config.email, &config.password) {
            client
                .login(email, password)
                .await
                .map_err(io::Error::other)?;
            println!("logged in as {email}");
            // Clones share the cookie jar.
            let result = run(client.clone(), config.session).await;
            if let Err(e) = client.logout().await {
                tracing::warn!(error = %e, "sign-out failed");
            }
            result
        } else {
            run(client, config.session).await
        }
    };

    tracing::info!("vidchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("vidchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Input loop: stdin lines and session events, until `/quit` or EOF.
async fn run<C: SyncClient + 'static>(client: C, config: SessionConfig) -> io::Result<()> {
    let (session, mut events) = ConversationSession::new(client, config);
    let mut app = App::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    match session.refresh_conversations().await {
        Ok(conversations) => {
            for line in app::format_conversations(&conversations, None) {
                println!("{line}");
            }
        }
        Err(e) => println!("{e}"),
    }
    println!("type /help for commands");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                handle_line(&session, &mut app, &line).await;
                if app.should_quit {
                    break;
                }
            }
            Some(event) = events.recv() => {
                for line in app.on_event(&event) {
                    println!("{line}");
                }
            }
        }
    }

    session.close();
    Ok(())
}

async fn handle_line<C: SyncClient + 'static>(
    session: &ConversationSession<C>,
    app: &mut App,
    line: &str,
) {
    if line.trim().is_empty() && app.pending_attachments.is_empty() {
        return;
    }
    let command = match app::parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    match command {
        Command::Send(text) => {
            let mut attachments = Vec::new();
            for path in std::mem::take(&mut app.pending_attachments) {
                match Attachment::from_path(&path).await {
                    Ok(attachment) => attachments.push(attachment),
                    Err(e) => println!("could not read {}: {e}", path.display()),
                }
            }
            if let Err(e) = session.send_message(&text, &attachments).await {
                println!("{e}");
            }
        }
        Command::New(title) => {
            if let Err(e) = session.create_and_switch(&title).await {
                println!("{e}");
            }
        }
        Command::List => match session.refresh_conversations().await {
            Ok(conversations) => {
                let active = session.active_conversation().map(|c| c.id);
                for line in app::format_conversations(&conversations, active.as_ref()) {
                    println!("{line}");
                }
            }
            Err(e) => println!("{e}"),
        },
        Command::Switch(id) => {
            if let Err(e) = session.switch_to(&id).await {
                println!("{e}");
            }
        }
        Command::Rename(id, title) => match session.rename_conversation(&id, &title).await {
            Ok(()) => println!("renamed {id} to {title}"),
            Err(e) => println!("{e}"),
        },
        Command::Delete(id) => match session.delete_conversation(&id).await {
            Ok(()) => println!("deleted {id}"),
            Err(e) => println!("{e}"),
        },
        Command::Attach(path) => {
            println!("attached {} (sent with the next message)", path.display());
            app.pending_attachments.push(path);
        }
        Command::Retry => {
            if session.resume_polling() {
                println!("polling resumed");
            } else {
                println!("no active conversation");
            }
        }
        Command::Status => {
            let active = session.active_conversation();
            println!(
                "{}",
                app::format_status(&session.poll_status(), active.as_ref(), session.token_balance())
            );
        }
        Command::Help => println!("{HELP_TEXT}"),
        Command::Quit => app.should_quit = true,
    }
}
