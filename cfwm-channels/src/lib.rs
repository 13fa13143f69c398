//! Chat platform integrations for cfwm
//!
//! Turns Telegram updates into bus events and delivers outbound replies.

pub mod base;
pub mod manager;
pub mod telegram;

pub use base::{ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
pub use manager::ChannelManager;
pub use telegram::TelegramHandler;
