//! Event types for the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the user did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    /// Slash command, e.g. `/start` (name without slash or bot mention)
    Command { name: String, args: String },
    /// Inline button press
    Callback { data: String },
    /// Free-text message
    Text { text: String },
}

impl InboundKind {
    /// Variant name, safe to log (text may carry credentials)
    pub fn label(&self) -> &'static str {
        match self {
            InboundKind::Command { .. } => "command",
            InboundKind::Callback { .. } => "callback",
            InboundKind::Text { .. } => "text",
        }
    }
}

/// Event received from a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel identifier (e.g., "telegram")
    pub channel: String,
    /// User identifier, used as the session key
    pub sender_id: String,
    /// Chat identifier replies go to
    pub chat_id: String,
    /// Event payload
    pub kind: InboundKind,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Create a new inbound event
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        kind: InboundKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            kind,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Command event
    pub fn command(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        name: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self::new(
            channel,
            sender_id,
            chat_id,
            InboundKind::Command {
                name: name.into(),
                args: args.into(),
            },
        )
    }

    /// Button press event
    pub fn callback(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self::new(
            channel,
            sender_id,
            chat_id,
            InboundKind::Callback { data: data.into() },
        )
    }

    /// Free-text event
    pub fn text(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            channel,
            sender_id,
            chat_id,
            InboundKind::Text { text: text.into() },
        )
    }

    /// Add metadata to the event
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Text rendering requested for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    Plain,
    /// Telegram-style markdown: `*bold*`, `_italic_`, `` `code` ``
    Markdown,
}

/// A single inline button
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    /// Text shown on the button
    pub label: String,
    /// Data delivered back as a callback event
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Ordered rows of inline buttons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Create an empty keyboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row of buttons
    pub fn row(mut self, buttons: impl IntoIterator<Item = InlineButton>) -> Self {
        self.rows.push(buttons.into_iter().collect());
        self
    }

    /// Iterate over every button, row by row
    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Message to send to a chat channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel identifier
    pub channel: String,
    /// Target chat identifier
    pub chat_id: String,
    /// Message text content
    pub content: String,
    /// Rendering of `content`
    pub format: MessageFormat,
    /// Inline buttons attached to the message
    pub keyboard: Option<InlineKeyboard>,
    /// Channel-specific metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new plain-text outbound message
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            format: MessageFormat::Plain,
            keyboard: None,
            metadata: HashMap::new(),
        }
    }

    /// Render the content as markdown
    pub fn markdown(mut self) -> Self {
        self.format = MessageFormat::Markdown;
        self
    }

    /// Attach an inline keyboard
    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Add metadata to the message
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
