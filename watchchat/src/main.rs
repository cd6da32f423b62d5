//! watchchat - chat with a generative-language model from the terminal
//!
//! Every invocation is one navigation over the conversation buffer: it
//! restores (or resets) the in-progress conversation, connects the remote
//! archive, and applies one instruction.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Buffer: $XDG_DATA_HOME/watchchat/buffer.db (~/.local/share/watchchat/buffer.db)
//! - Logs: $XDG_STATE_HOME/watchchat/watchchat.log (~/.local/state/watchchat/watchchat.log)
//! - Config: $XDG_CONFIG_HOME/watchchat/config.toml (~/.config/watchchat/config.toml)

mod process_lock;
mod render;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use watchchat_core::archive::{CosConnector, HttpCredentialProvider};
use watchchat_core::intent::{edit_fragment, load_fragment, send_fragment};
use watchchat_core::reply::HttpModelService;
use watchchat_core::{
    BufferStore, ChatView, Config, Database, Navigation, RemoteArchive, ReplyAcquirer,
    ReplyPolicy, SendOutcome, SessionId, SessionManager, SessionSettings,
};

use crate::process_lock::acquire_flow_guard;
use crate::render::{print_history, print_transcript, TerminalView};

#[derive(Parser)]
#[command(name = "watchchat")]
#[command(about = "Chat with a language model; conversations are archived to object storage")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Request replies atomically instead of streaming
    #[arg(long, global = true)]
    no_stream: bool,

    /// Do not save to the archive after each reply
    #[arg(long, global = true)]
    no_auto_save: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message in the current conversation
    Send {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Apply a navigation fragment (#send=..., #load=..., #edit=N&send=..., #resume, #reset)
    Open { fragment: String },
    /// Stash a message and print the fragment that sends it
    Compose {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Replace the user message at INDEX and ask again
    Edit {
        index: usize,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Load a saved conversation
    Load { id: String },
    /// Print the current conversation (default)
    Show,
    /// Start a new conversation
    New,
    /// List saved conversations, newest first
    History,
    /// Delete a saved conversation
    Delete { id: String },
    /// Save the current conversation to the archive now
    Save,
    /// Interactive chat session
    Chat,
}

impl Command {
    /// Commands that may write the buffer hold the flow lock.
    fn mutates(&self) -> bool {
        !matches!(self, Command::Show | Command::History)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if args.no_stream {
        config.streaming.enabled = false;
    }
    if args.no_auto_save {
        config.archive.auto_save = false;
    }

    // Initialize logging (to file only; stdout carries the conversation)
    let _log_guard =
        watchchat_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let command = args.command.unwrap_or(Command::Show);
    tracing::info!("watchchat starting");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(command, &config));

    tracing::info!("watchchat finished");
    result
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let db_path = Config::database_path();
    let _flow_guard = if command.mutates() {
        Some(acquire_flow_guard(&db_path).context("failed to acquire process lock")?)
    } else {
        None
    };

    tracing::info!(path = %db_path.display(), "Opening buffer database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let buffer = BufferStore::new(db);

    match command {
        Command::Show => {
            let (transcript, session_id) = buffer.load();
            match session_id {
                Some(id) => println!("session: {}", id),
                None => println!("session: unsaved"),
            }
            print_transcript(&transcript);
            return Ok(());
        }
        Command::Compose { text } => {
            let text = non_blank(text)?;
            buffer.stash_pending_input(&text);
            println!("{}", send_fragment(&text));
            return Ok(());
        }
        _ => {}
    }

    let mut manager = build_manager(buffer, config)?;

    match command {
        Command::Send { text } => {
            let text = non_blank(text)?;
            let mut view = TerminalView::new(false);
            navigate(&mut manager, send_fragment(&text), &mut view).await
        }
        Command::Open { fragment } => {
            let mut view = TerminalView::new(true);
            navigate(&mut manager, fragment, &mut view).await
        }
        Command::Edit { index, text } => {
            let text = non_blank(text)?;
            let mut view = TerminalView::new(true);
            navigate(&mut manager, edit_fragment(index, &text), &mut view).await
        }
        Command::Load { id } => {
            let mut view = TerminalView::new(true);
            navigate(&mut manager, load_fragment(&SessionId::new(id)), &mut view).await
        }
        Command::New => {
            let mut view = TerminalView::new(true);
            navigate(&mut manager, String::new(), &mut view).await
        }
        Command::History => {
            let mut view = TerminalView::new(false);
            manager.init_archive(&mut view).await;
            let entries = manager.list_sessions(&mut view).await;
            print_history(&entries);
            Ok(())
        }
        Command::Delete { id } => {
            let mut view = TerminalView::new(false);
            navigate(&mut manager, "#resume".to_string(), &mut view).await?;
            if manager.delete(&SessionId::new(id.clone()), &mut view).await? {
                println!("Deleted {}", id);
            }
            Ok(())
        }
        Command::Save => {
            let mut view = TerminalView::new(false);
            navigate(&mut manager, "#resume".to_string(), &mut view).await?;
            match manager.save(&mut view).await? {
                Some(id) => println!("Saved as {}", id),
                None => println!("Nothing saved."),
            }
            Ok(())
        }
        Command::Chat => {
            let mut view = TerminalView::new(true);
            navigate(&mut manager, "#resume".to_string(), &mut view).await?;
            chat_loop(&mut manager, &mut view).await
        }
        Command::Show | Command::Compose { .. } => Ok(()),
    }
}

/// Join the words of a message, refusing one with no visible text.
fn non_blank(words: Vec<String>) -> Result<String> {
    let text = words.join(" ");
    if text.trim().is_empty() {
        anyhow::bail!("message is empty");
    }
    Ok(text)
}

fn build_manager(buffer: BufferStore, config: &Config) -> Result<SessionManager> {
    let timeout = config.request_timeout();

    let credentials = HttpCredentialProvider::new(config.services.credential_url.clone(), timeout)
        .context("failed to create credential client")?;
    let connector = CosConnector::new(Arc::new(credentials), config.archive.clone(), timeout)
        .context("failed to create archive client")?;
    let archive = RemoteArchive::new(
        config.archive.clone(),
        config.chat.placeholder_title.clone(),
        Box::new(connector),
    );

    let model = HttpModelService::new(&config.services).context("failed to create model client")?;
    let replies = ReplyAcquirer::new(Arc::new(model), ReplyPolicy::from_config(&config.streaming));

    Ok(SessionManager::new(
        buffer,
        archive,
        replies,
        SessionSettings::from_config(config),
    ))
}

async fn navigate(
    manager: &mut SessionManager,
    fragment: String,
    view: &mut TerminalView,
) -> Result<()> {
    let mut navigation = Navigation::new(fragment);
    let outcome = manager.boot(&mut navigation, view).await?;
    report(outcome.as_ref());
    Ok(())
}

fn report(outcome: Option<&SendOutcome>) {
    if let Some(SendOutcome::Replied {
        saved: Some(id), ..
    }) = outcome
    {
        println!("(saved as {})", id);
    }
}

const CHAT_HELP: &str = "Commands: /new, /edit N TEXT, /load ID, /history, /delete ID, /save, /show, /quit";

/// Read lines from stdin until `/quit` or end of input.
async fn chat_loop(manager: &mut SessionManager, view: &mut TerminalView) -> Result<()> {
    println!("{}", CHAT_HELP);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("you> ");
        io::stdout().flush().context("failed to flush stdout")?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line.context("failed to read input")?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let result = match parse_chat_command(input) {
            ChatCommand::Quit => break,
            ChatCommand::Help => {
                println!("{}", CHAT_HELP);
                Ok(())
            }
            ChatCommand::Show => {
                print_transcript(manager.transcript());
                Ok(())
            }
            ChatCommand::New => manager.new_session(view),
            ChatCommand::Save => manager.save(view).await.map(|saved| {
                if let Some(id) = saved {
                    println!("(saved as {})", id);
                }
            }),
            ChatCommand::History => {
                let entries = manager.list_sessions(view).await;
                print_history(&entries);
                Ok(())
            }
            ChatCommand::Load(id) => manager.load(&id, view).await.map(|_| ()),
            ChatCommand::Delete(id) => manager.delete(&id, view).await.map(|_| ()),
            ChatCommand::Edit(index, text) => manager
                .edit_and_resend(index, &text, view)
                .await
                .map(|outcome| report(Some(&outcome))),
            ChatCommand::Send(text) => manager
                .send(&text, view)
                .await
                .map(|outcome| report(Some(&outcome))),
            ChatCommand::Invalid(message) => {
                view.notice(&format!("**Error:** {}", message));
                Ok(())
            }
        };

        if let Err(e) = result {
            if !e.is_recoverable() {
                return Err(e.into());
            }
            view.notice(&format!("**Error:** {}", e));
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand {
    Send(String),
    Edit(usize, String),
    Load(SessionId),
    Delete(SessionId),
    New,
    Save,
    History,
    Show,
    Help,
    Quit,
    Invalid(String),
}

fn parse_chat_command(input: &str) -> ChatCommand {
    let Some(rest) = input.strip_prefix('/') else {
        return ChatCommand::Send(input.to_string());
    };
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();

    match name {
        "quit" | "exit" => ChatCommand::Quit,
        "help" => ChatCommand::Help,
        "new" => ChatCommand::New,
        "save" => ChatCommand::Save,
        "show" => ChatCommand::Show,
        "history" => ChatCommand::History,
        "load" | "delete" if args.is_empty() => {
            ChatCommand::Invalid(format!("/{} needs a conversation id", name))
        }
        "load" => ChatCommand::Load(SessionId::new(args)),
        "delete" => ChatCommand::Delete(SessionId::new(args)),
        "edit" => {
            let (index, text) = args.split_once(' ').unwrap_or((args, ""));
            match index.parse::<usize>() {
                Ok(index) if !text.trim().is_empty() => {
                    ChatCommand::Edit(index, text.trim().to_string())
                }
                _ => ChatCommand::Invalid("usage: /edit N TEXT".to_string()),
            }
        }
        other => ChatCommand::Invalid(format!("unknown command /{}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_commands() {
        assert_eq!(
            parse_chat_command("hello there"),
            ChatCommand::Send("hello there".to_string())
        );
        assert_eq!(
            parse_chat_command("/edit 2 better question"),
            ChatCommand::Edit(2, "better question".to_string())
        );
        assert_eq!(
            parse_chat_command("/load 1700000000000.json"),
            ChatCommand::Load(SessionId::new("1700000000000.json"))
        );
        assert_eq!(parse_chat_command("/quit"), ChatCommand::Quit);
    }

    #[test]
    fn test_parse_chat_command_errors() {
        assert!(matches!(parse_chat_command("/edit x"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat_command("/edit 1"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat_command("/load"), ChatCommand::Invalid(_)));
        assert!(matches!(parse_chat_command("/frobnicate"), ChatCommand::Invalid(_)));
    }

    #[test]
    fn test_read_only_commands_skip_lock() {
        assert!(!Command::Show.mutates());
        assert!(!Command::History.mutates());
        assert!(Command::Compose {
            text: vec!["hi".to_string()]
        }
        .mutates());
        assert!(Command::New.mutates());
        assert!(Command::Send {
            text: vec!["hi".to_string()]
        }
        .mutates());
    }
}
