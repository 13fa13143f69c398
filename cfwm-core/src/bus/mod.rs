//! Message bus for decoupled communication
//!
//! The message bus provides a dual-queue system for inbound events and
//! outbound replies, decoupling chat channels from the conversation engine.

pub mod events;
pub mod queue;

pub use events::{
    InboundKind, InboundMessage, InlineButton, InlineKeyboard, MessageFormat, OutboundMessage,
};
pub use queue::MessageBus;
