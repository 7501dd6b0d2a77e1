//! # relay-telegram
//!
//! Telegram side of Frigate Relay.
//!
//! - [`TelegramBot`] implements [`relay_proto::ChatApi`] on top of teloxide:
//!   snapshot alerts with a mute keyboard, silent clip posts, deletions
//! - [`CommandListener`] long-polls for `/mute`, `/unmute`, `/status` and
//!   `/help`, plus presses of the alert's inline buttons
//! - [`CommandHandler`] applies those commands to the shared relay state

mod bot;
pub mod commands;
mod error;
mod listener;

pub use bot::{MUTE_CALLBACK, TelegramBot, UNMUTE_CALLBACK, is_transient, mute_keyboard};
pub use commands::{Command, CommandHandler, parse_command};
pub use error::{TelegramError, TelegramResult};
pub use listener::{Action, CommandListener, Inbound};
