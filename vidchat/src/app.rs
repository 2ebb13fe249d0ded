//! Line-oriented front end: command parsing and event rendering.
//!
//! Nothing here touches the network or the terminal directly. The binary
//! feeds input lines to [`parse_command`] and session events to
//! [`App::on_event`], and prints whatever lines come back.

use std::path::PathBuf;

use vidchat_proto::message::{Conversation, ConversationId, Message, Role};

use crate::chat::SessionEvent;
use crate::poll::{PollPhase, PollStatus, StopReason};

/// Help text printed by `/help`.
pub const HELP_TEXT: &str = "\
Type a message and press Enter to send it.
  /new <title>            start a conversation
  /list                   list conversations
  /switch <id>            open a conversation
  /rename <id> <title>    rename a conversation
  /delete <id>            delete a conversation
  /attach <path>          attach a video to the next message
  /retry                  resume polling after a lost connection
  /status                 show connection status
  /help                   show this help
  /quit                   exit";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to send.
    Send(String),
    /// `/new <title>`
    New(String),
    /// `/list`
    List,
    /// `/switch <id>`
    Switch(ConversationId),
    /// `/rename <id> <title>`
    Rename(ConversationId, String),
    /// `/delete <id>`
    Delete(ConversationId),
    /// `/attach <path>`
    Attach(PathBuf),
    /// `/retry`
    Retry,
    /// `/status`
    Status,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
}

/// Errors from [`parse_command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The slash command is not known.
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),

    /// A required argument is missing.
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parses one input line. Lines that do not start with `/` are messages.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands or missing arguments.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(n, a)| (n, a.trim()));

    let required = |usage: &'static str| {
        if args.is_empty() {
            Err(CommandError::Usage(usage))
        } else {
            Ok(args)
        }
    };

    match name {
        "new" => required("/new <title>").map(|t| Command::New(t.to_string())),
        "list" => Ok(Command::List),
        "switch" => required("/switch <id>").map(|id| Command::Switch(ConversationId::new(id))),
        "rename" => {
            let usage = "/rename <id> <title>";
            let (id, title) = required(usage)?
                .split_once(char::is_whitespace)
                .ok_or(CommandError::Usage(usage))?;
            Ok(Command::Rename(
                ConversationId::new(id),
                title.trim().to_string(),
            ))
        }
        "delete" => required("/delete <id>").map(|id| Command::Delete(ConversationId::new(id))),
        "attach" => required("/attach <path>").map(|p| Command::Attach(PathBuf::from(p))),
        "retry" => Ok(Command::Retry),
        "status" => Ok(Command::Status),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Render-side state: what has already been printed.
#[derive(Debug, Default)]
pub struct App {
    conversation: Option<ConversationId>,
    shown: Vec<Message>,
    last_phase: Option<PollPhase>,
    /// Attachments queued by `/attach` for the next send.
    pub pending_attachments: Vec<PathBuf>,
    /// Set by `/quit`.
    pub should_quit: bool,
}

impl App {
    /// Creates a front end with nothing printed yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns a session event into lines to print.
    pub fn on_event(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::MessagesChanged {
                conversation_id,
                messages,
            } => self.on_messages(conversation_id.as_ref(), messages),
            SessionEvent::ActiveConversationChanged(Some(conversation)) => {
                vec![format!(
                    "== {} ({}) ==",
                    conversation.title, conversation.id
                )]
            }
            SessionEvent::ActiveConversationChanged(None) => {
                vec!["== no active conversation ==".to_string()]
            }
            SessionEvent::ConnectionLost {
                failures, error, ..
            } => vec![format!(
                "!! connection lost after {failures} failed polls ({error}); /retry to resume"
            )],
            SessionEvent::PollStateChanged(status) => self.on_poll_status(status),
            SessionEvent::ConversationsChanged(_) => Vec::new(),
        }
    }

    fn on_messages(
        &mut self,
        conversation: Option<&ConversationId>,
        messages: &[Message],
    ) -> Vec<String> {
        if self.conversation.as_ref() != conversation {
            self.conversation = conversation.cloned();
            self.shown.clear();
        }
        // Promotions and re-sorts are not news; only unseen messages print.
        let lines = messages
            .iter()
            .filter(|m| {
                !self
                    .shown
                    .iter()
                    .any(|s| s.same_logical(m) || m.confirms(s))
            })
            .map(format_message)
            .collect();
        self.shown = messages.to_vec();
        lines
    }

    fn on_poll_status(&mut self, status: &PollStatus) -> Vec<String> {
        let changed = self.last_phase.replace(status.phase) != Some(status.phase);
        if changed && status.phase == PollPhase::Stopped && status.stop_reason == Some(StopReason::BotReplied) {
            return vec!["-- reply received, polling paused --".to_string()];
        }
        Vec::new()
    }
}

/// One timeline line, e.g. `[14:03:07] bot: analysis complete`.
#[must_use]
pub fn format_message(message: &Message) -> String {
    let time = message
        .created_at
        .as_datetime()
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    let who = match message.role {
        Role::User => "you",
        Role::Bot => "bot",
        Role::Error => "!!",
    };
    let pending = if message.is_optimistic() && message.role == Role::User {
        " (sending)"
    } else {
        ""
    };
    format!("[{time}] {who}: {}{pending}", message.text)
}

/// Lines for `/list`; the active conversation is marked with `*`.
#[must_use]
pub fn format_conversations(
    conversations: &[Conversation],
    active: Option<&ConversationId>,
) -> Vec<String> {
    if conversations.is_empty() {
        return vec!["(no conversations)".to_string()];
    }
    conversations
        .iter()
        .map(|c| {
            let marker = if Some(&c.id) == active { '*' } else { ' ' };
            format!("{marker} {}  {}", c.id, c.title)
        })
        .collect()
}

/// Line for `/status`.
#[must_use]
pub fn format_status(
    status: &PollStatus,
    active: Option<&Conversation>,
    token_balance: Option<i64>,
) -> String {
    let conversation = active.map_or_else(|| "none".to_string(), |c| c.title.clone());
    let polling = match (status.phase, status.stop_reason) {
        (PollPhase::Idle, _) => "idle".to_string(),
        (PollPhase::Active, _) => format!(
            "every {}ms ({} empty, {} failed)",
            status.interval.as_millis(),
            status.consecutive_empty,
            status.hard_failures
        ),
        (PollPhase::Stopped, Some(StopReason::ConnectionLost { failures })) => {
            format!("connection lost after {failures} failures")
        }
        (PollPhase::Stopped, _) => "stopped".to_string(),
    };
    let tokens = token_balance.map_or_else(|| "unknown".to_string(), |b| b.to_string());
    format!("conversation: {conversation} | polling: {polling} | tokens: {tokens}")
}
