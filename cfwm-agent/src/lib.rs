//! Conversation engine for cfwm
//!
//! Maps chat events onto per-user step transitions and the replies they
//! produce, and drives that engine from the message bus.

pub mod bot_loop;
pub mod engine;
pub mod replies;

pub use bot_loop::BotLoop;
pub use engine::{ConversationEngine, EngineSettings};
