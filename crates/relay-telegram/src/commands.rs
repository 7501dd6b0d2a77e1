//! Chat commands that control the relay.
//!
//! Replies are Telegram HTML.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use relay_core::{CaptionFormatter, ConnectionState, MuteWindow, RelayMetrics};

use crate::bot::{MUTE_CALLBACK, UNMUTE_CALLBACK};

/// Longest window `/mute <minutes>` accepts: one week.
const MAX_MUTE_MINUTES: u64 = 7 * 24 * 60;

/// A recognised bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/mute [minutes]`
    Mute(Option<u64>),
    Unmute,
    Status,
    Help,
    /// A known command with an unusable argument; carries the usage line.
    Usage(&'static str),
}

/// Check if a message is a bot command (starts with `/`).
pub fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Parse a message into a [`Command`], or `None` if it is not one of ours.
pub fn parse_command(text: &str) -> Option<Command> {
    if !is_command(text) {
        return None;
    }
    let (name, args) = split_command(text.trim());
    match name {
        "/mute" => Some(parse_mute_args(args)),
        "/unmute" => Some(Command::Unmute),
        "/status" => Some(Command::Status),
        "/help" | "/start" => Some(Command::Help),
        _ => None,
    }
}

fn parse_mute_args(args: &str) -> Command {
    if args.is_empty() {
        return Command::Mute(None);
    }
    match args.parse::<u64>() {
        Ok(minutes) if (1..=MAX_MUTE_MINUTES).contains(&minutes) => Command::Mute(Some(minutes)),
        _ => Command::Usage("/mute [minutes], 1 to 10080"),
    }
}

/// Split a command string into the command name and optional arguments.
fn split_command(text: &str) -> (&str, &str) {
    // Handle @bot suffix: /status@relay_bot -> /status
    if let Some((first, rest)) = text.split_once(char::is_whitespace) {
        let cmd = first.split('@').next().unwrap_or(first);
        (cmd, rest.trim())
    } else {
        let cmd = text.split('@').next().unwrap_or(text);
        (cmd, "")
    }
}

/// Executes commands against the shared relay state.
#[derive(Clone)]
pub struct CommandHandler {
    mute: Arc<MuteWindow>,
    metrics: Arc<RelayMetrics>,
    broker: watch::Receiver<ConnectionState>,
    captions: CaptionFormatter,
}

impl CommandHandler {
    pub fn new(
        mute: Arc<MuteWindow>,
        metrics: Arc<RelayMetrics>,
        broker: watch::Receiver<ConnectionState>,
        captions: CaptionFormatter,
    ) -> Self {
        Self {
            mute,
            metrics,
            broker,
            captions,
        }
    }

    /// Handle a text message. Returns `None` for anything that is not a
    /// recognised command.
    pub fn handle_text(&self, text: &str) -> Option<String> {
        parse_command(text).map(|command| self.execute(&command))
    }

    /// Handle an inline button press. Returns `None` for unknown data.
    pub fn handle_callback(&self, data: &str) -> Option<String> {
        match data {
            MUTE_CALLBACK => Some(self.execute(&Command::Mute(None))),
            UNMUTE_CALLBACK => Some(self.execute(&Command::Unmute)),
            _ => None,
        }
    }

    pub fn execute(&self, command: &Command) -> String {
        match command {
            Command::Mute(minutes) => self.cmd_mute(*minutes),
            Command::Unmute => {
                self.mute.unmute();
                "Alerts resumed".to_string()
            }
            Command::Status => self.cmd_status(),
            Command::Help => cmd_help(),
            Command::Usage(usage) => format!("Usage: <code>{usage}</code>"),
        }
    }

    fn cmd_mute(&self, minutes: Option<u64>) -> String {
        let window = minutes.map_or_else(|| self.mute.window(), |m| Duration::from_secs(m * 60));
        let expiry = self.mute.mute_for(window);
        format!(
            "Alerts muted for {} until {}. Clips are still delivered.",
            format_remaining(window),
            self.captions.format_time(expiry)
        )
    }

    fn cmd_status(&self) -> String {
        let mute_line = match self.mute.remaining() {
            Some(left) => format!("muted, {} left", format_remaining(left)),
            None => "active".to_string(),
        };
        let m = self.metrics.snapshot();

        [
            "<b>Relay Status</b>".to_string(),
            String::new(),
            format!("Alerts: <code>{mute_line}</code>"),
            format!("Broker: <code>{}</code>", *self.broker.borrow()),
            String::new(),
            format!("Events received: <code>{}</code>", m.events_received),
            format!("Alerts sent: <code>{}</code>", m.alerts_sent),
            format!("Alerts suppressed: <code>{}</code>", m.alerts_suppressed),
            format!(
                "Clips delivered: <code>{}</code> of <code>{}</code> queued",
                m.clips_delivered, m.clips_queued
            ),
            format!("Queue overflows: <code>{}</code>", m.queue_overflows),
            format!(
                "Failures: <code>{}</code> fetch, <code>{}</code> delivery, <code>{}</code> parse",
                m.fetch_failures, m.delivery_failures, m.parse_failures
            ),
        ]
        .join("\n")
    }
}

/// `/help`: list available commands.
fn cmd_help() -> String {
    [
        "<b>Frigate Relay Commands</b>",
        "",
        "/mute [minutes]: silence snapshot alerts",
        "/unmute: resume snapshot alerts",
        "/status: mute state, broker link and counters",
        "/help: this message",
    ]
    .join("\n")
}

fn format_remaining(left: Duration) -> String {
    let secs = left.as_secs();
    let (mins, secs) = (secs / 60, secs % 60);
    if mins > 0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
