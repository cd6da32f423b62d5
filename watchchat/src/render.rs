//! Terminal rendering of a conversation.
//!
//! Messages go to stdout as `you>` / `model>` lines. While a reply is
//! pending a spinner runs on stderr; streamed text is printed as it grows and
//! the final model message is not printed a second time.

use std::io::{self, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use watchchat_core::format::{format_relative_time, session_created_at};
use watchchat_core::session::SessionEntry;
use watchchat_core::{ChatView, Message, Role, Transcript};

/// Prefix shown before a message of `role`.
pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Model => "model",
        Role::System => "system",
    }
}

pub fn print_message(message: &Message) {
    println!("{}> {}", role_label(message.role), message.text());
}

pub fn print_transcript(transcript: &Transcript) {
    for (index, message) in transcript.messages().iter().enumerate() {
        println!("[{}] {}> {}", index, role_label(message.role), message.text());
    }
}

pub fn print_history(entries: &[SessionEntry]) {
    if entries.is_empty() {
        println!("No saved conversations.");
        return;
    }
    for entry in entries {
        let age = session_created_at(&entry.id)
            .map(format_relative_time)
            .unwrap_or_default();
        println!("{:<20} {:<26} {}", entry.id.as_str(), entry.label, age);
    }
}

/// [`ChatView`] drawing to the terminal.
pub struct TerminalView {
    /// Print the whole transcript when it is replaced (boot, load, new, edit).
    echo_replaced: bool,
    spinner: Option<ProgressBar>,
    /// Streamed text already on screen.
    streamed: Option<String>,
}

impl TerminalView {
    pub fn new(echo_replaced: bool) -> Self {
        Self {
            echo_replaced,
            spinner: None,
            streamed: None,
        }
    }

    fn start_spinner(&mut self, message: &'static str) {
        let spinner = self.spinner.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        spinner.set_message(message);
    }

    fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl ChatView for TerminalView {
    fn message_appended(&mut self, message: &Message) {
        self.stop_spinner();
        match self.streamed.take() {
            Some(streamed) if message.role == Role::Model && streamed == message.text() => {
                println!();
            }
            _ => print_message(message),
        }
    }

    fn transcript_replaced(&mut self, transcript: &Transcript) {
        if self.echo_replaced {
            print_transcript(transcript);
        }
    }

    fn reply_pending(&mut self) {
        self.start_spinner("waiting for reply");
    }

    fn stream_started(&mut self) {
        self.start_spinner("receiving");
    }

    fn stream_progress(&mut self, accumulated: &str) {
        self.stop_spinner();
        let mut stdout = io::stdout();
        match &self.streamed {
            None => {
                let _ = write!(stdout, "{}> {}", role_label(Role::Model), accumulated);
            }
            // Accumulated text only ever extends what was shown.
            Some(shown) => {
                let _ = write!(stdout, "{}", accumulated.get(shown.len()..).unwrap_or(""));
            }
        }
        let _ = stdout.flush();
        self.streamed = Some(accumulated.to_string());
    }

    fn stream_discarded(&mut self, reason: &str) {
        if self.streamed.take().is_some() {
            println!();
            println!("[partial reply discarded: {}]", reason);
        }
        tracing::debug!(reason, "Stream discarded");
        self.start_spinner("retrying without streaming");
    }

    fn notice(&mut self, text: &str) {
        self.stop_spinner();
        if self.streamed.take().is_some() {
            println!();
        }
        println!("system> {}", text);
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        self.stop_spinner();
    }
}
