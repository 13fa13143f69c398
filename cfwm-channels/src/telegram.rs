//! Telegram channel integration

use crate::base::{sender_allowed, ChannelError, ChannelHandler, Result};
use async_trait::async_trait;
use cfwm_core::bus::{InboundMessage, InlineKeyboard, MessageFormat, OutboundMessage};
use cfwm_core::config::schema::{TelegramConfig, WebhookConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, User};
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Commands advertised in the Telegram menu
#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Cloudflare Worker Manager commands:")]
enum Command {
    #[command(description = "Open the bot or the main menu")]
    Start,
    #[command(description = "Enter your Cloudflare credentials")]
    Cloudflare,
}

static CODE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[\w]*\n?([\s\S]*?)```").expect("code block regex"));
static ESCAPED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\([\\`*_\[\]~])").expect("escape regex"));
static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("inline code regex"));
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link regex"));
static DOUBLE_BOLD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex"));
static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").expect("bold regex"));
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([^_\n]+)_").expect("italic regex"));
static STRIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").expect("strike regex"));
static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[-*]\s+").expect("bullet regex"));

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert Telegram-style markdown (`*bold*`, `_italic_`, `` `code` ``) to
/// the HTML subset Telegram accepts.
///
/// Everything outside the recognized markup is HTML-escaped, so user-supplied
/// names embedded in a reply cannot inject tags. A backslash before a markup
/// character keeps it literal (`my\_worker` renders as `my_worker`).
pub fn markdown_to_telegram_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Protect backslash-escaped markup characters
    let mut escaped: Vec<String> = Vec::new();
    let mut result = ESCAPED_RE
        .replace_all(text, |caps: &regex::Captures| {
            let idx = escaped.len();
            escaped.push(caps[1].to_string());
            format!("\x00ES{idx}\x00")
        })
        .to_string();

    // Protect code blocks
    let mut code_blocks: Vec<String> = Vec::new();
    result = CODE_BLOCK_RE
        .replace_all(&result, |caps: &regex::Captures| {
            let idx = code_blocks.len();
            code_blocks.push(caps[1].to_string());
            format!("\x00CB{idx}\x00")
        })
        .to_string();

    // Protect inline code
    let mut inline_codes: Vec<String> = Vec::new();
    result = INLINE_CODE_RE
        .replace_all(&result, |caps: &regex::Captures| {
            let idx = inline_codes.len();
            inline_codes.push(caps[1].to_string());
            format!("\x00IC{idx}\x00")
        })
        .to_string();

    result = escape_html(&result);

    result = LINK_RE
        .replace_all(&result, r#"<a href="$2">$1</a>"#)
        .to_string();

    // Bullets first so a leading "* " is not read as bold
    result = BULLET_RE.replace_all(&result, "• ").to_string();
    result = DOUBLE_BOLD_RE.replace_all(&result, "<b>$1</b>").to_string();
    result = BOLD_RE.replace_all(&result, "<b>$1</b>").to_string();
    result = ITALIC_RE.replace_all(&result, "<i>$1</i>").to_string();
    result = STRIKE_RE.replace_all(&result, "<s>$1</s>").to_string();

    for (i, code) in inline_codes.iter().enumerate() {
        result = result.replace(
            &format!("\x00IC{i}\x00"),
            &format!("<code>{}</code>", escape_html(code)),
        );
    }

    for (i, code) in code_blocks.iter().enumerate() {
        result = result.replace(
            &format!("\x00CB{i}\x00"),
            &format!("<pre><code>{}</code></pre>", escape_html(code)),
        );
    }

    // Last, so escapes inside restored code become literal too
    for (i, ch) in escaped.iter().enumerate() {
        result = result.replace(&format!("\x00ES{i}\x00"), ch);
    }

    result
}

/// Split `/name@bot args` into `(name, args)`.
///
/// Returns `None` for plain text, a bare `/`, or a command addressed to a
/// different bot.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<(String, String)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };

    let name = match head.split_once('@') {
        Some((name, mention)) => {
            if let Some(me) = bot_username {
                if !mention.eq_ignore_ascii_case(me) {
                    return None;
                }
            }
            name
        }
        None => head,
    };

    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), args.to_string()))
}

/// Build the bus event for a text message: a command event for `/...`,
/// a text event otherwise.
pub fn text_to_inbound(
    channel: &str,
    user_id: u64,
    chat_id: i64,
    text: &str,
    bot_username: Option<&str>,
) -> InboundMessage {
    let sender = user_id.to_string();
    let chat = chat_id.to_string();
    match parse_command(text, bot_username) {
        Some((name, args)) => InboundMessage::command(channel, sender, chat, name, args),
        None => InboundMessage::text(channel, sender, chat, text),
    }
}

/// Build the bus event for a button press. Replies go to the chat holding
/// the pressed message; the presser's private chat when that message is
/// unknown.
pub fn callback_to_inbound(
    channel: &str,
    user_id: u64,
    chat_id: Option<i64>,
    data: String,
) -> InboundMessage {
    let chat = chat_id.map_or_else(|| user_id.to_string(), |id| id.to_string());
    InboundMessage::callback(channel, user_id.to_string(), chat, data)
}

/// Map the bus keyboard onto Telegram callback buttons
pub fn to_inline_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| {
                InlineKeyboardButton::callback(button.label.clone(), button.callback_data.clone())
            })
            .collect::<Vec<_>>()
    }))
}

/// Sender ID in `"id|username"` form for allow-list checks
fn compound_sender_id(user: &User) -> String {
    match &user.username {
        Some(username) => format!("{}|{}", user.id.0, username),
        None => user.id.0.to_string(),
    }
}

fn webhook_options(webhook: &WebhookConfig) -> Result<webhooks::Options> {
    let ip: IpAddr = webhook.listen_addr.parse().map_err(|_| {
        ChannelError::InvalidConfig(format!("Invalid listen_addr: {}", webhook.listen_addr))
    })?;
    let url = reqwest::Url::parse(&webhook.url)
        .map_err(|e| ChannelError::InvalidConfig(format!("Invalid webhook url: {}", e)))?;
    Ok(webhooks::Options::new(SocketAddr::new(ip, webhook.port), url))
}

/// State shared with the update handlers
struct UpdateForwarder {
    channel: String,
    allow_from: Vec<String>,
    bot_username: Option<String>,
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
}

impl UpdateForwarder {
    async fn on_message(&self, msg: Message) {
        let Some(user) = msg.from.as_ref() else {
            tracing::debug!("Ignoring message without sender");
            return;
        };

        let Some(text) = msg.text().or_else(|| msg.caption()) else {
            tracing::debug!("Ignoring non-text message from {}", user.id.0);
            return;
        };

        if !self.allowed(user) {
            return;
        }

        let mut inbound = text_to_inbound(
            &self.channel,
            user.id.0,
            msg.chat.id.0,
            text,
            self.bot_username.as_deref(),
        )
        .with_metadata("message_id", msg.id.0)
        .with_metadata("first_name", user.first_name.clone())
        .with_metadata("is_group", msg.chat.id.0 < 0);
        if let Some(username) = &user.username {
            inbound = inbound.with_metadata("username", username.clone());
        }

        self.forward(inbound).await;
    }

    async fn on_callback(&self, query: &CallbackQuery) {
        let Some(data) = query.data.clone() else {
            return;
        };

        if !self.allowed(&query.from) {
            return;
        }

        let chat_id = query.message.as_ref().map(|m| m.chat().id.0);
        let inbound = callback_to_inbound(&self.channel, query.from.id.0, chat_id, data);

        self.forward(inbound).await;
    }

    fn allowed(&self, user: &User) -> bool {
        let sender_id = compound_sender_id(user);
        if sender_allowed(&self.allow_from, &sender_id) {
            return true;
        }
        tracing::warn!(
            "Access denied for sender {} on channel {}",
            sender_id,
            self.channel
        );
        false
    }

    async fn forward(&self, inbound: InboundMessage) {
        match &self.inbound_tx {
            Some(tx) => {
                if let Err(e) = tx.send(inbound).await {
                    tracing::error!("Failed to send inbound message: {}", e);
                }
            }
            None => tracing::warn!("No inbound sender set, dropping update"),
        }
    }
}

/// Telegram channel handler
pub struct TelegramHandler {
    /// Channel name
    name: String,
    /// Bot token
    token: String,
    /// Allowed senders
    allow_from: Vec<String>,
    /// Proxy URL (optional)
    proxy: Option<String>,
    /// Webhook settings; long polling when disabled
    webhook: WebhookConfig,
    /// Bot instance
    bot: Option<Bot>,
    /// Running state
    running: bool,
    /// Inbound message sender
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
    /// Dispatcher handle
    dispatcher_handle: Option<JoinHandle<()>>,
}

impl TelegramHandler {
    /// Create a new Telegram handler from config
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            name: "telegram".to_string(),
            token: config.token.clone(),
            allow_from: config.allow_from.clone(),
            proxy: config.proxy.clone(),
            webhook: config.webhook.clone(),
            bot: None,
            running: false,
            inbound_tx: None,
            dispatcher_handle: None,
        }
    }

    fn build_bot(&self) -> Result<Bot> {
        let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(Bot::new(&self.token));
        };

        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| ChannelError::InvalidConfig(format!("Invalid proxy: {}", e)))?;
        let client = teloxide::net::default_reqwest_settings()
            .proxy(proxy)
            .build()
            .map_err(|e| ChannelError::Error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Bot::with_client(&self.token, client))
    }

    async fn send_with(
        bot: &Bot,
        chat_id: ChatId,
        text: String,
        parse_mode: Option<ParseMode>,
        keyboard: Option<&InlineKeyboard>,
    ) -> std::result::Result<(), teloxide::RequestError> {
        let mut request = bot.send_message(chat_id, text);
        if let Some(mode) = parse_mode {
            request = request.parse_mode(mode);
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_inline_markup(keyboard));
        }
        request.await.map(|_| ())
    }
}

#[async_trait]
impl ChannelHandler for TelegramHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn start(&mut self) -> Result<()> {
        if self.token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "Telegram token not configured".to_string(),
            ));
        }

        if self.running {
            return Ok(());
        }

        let bot = self.build_bot()?;

        if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
            tracing::warn!("Failed to set bot commands: {}", e);
        }

        let me = bot
            .get_me()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Failed to get bot info: {}", e)))?;
        let bot_username = me.username.clone();
        tracing::info!(
            "Telegram bot @{} connected",
            bot_username.as_deref().unwrap_or("unknown")
        );

        let forwarder = Arc::new(UpdateForwarder {
            channel: self.name.clone(),
            allow_from: self.allow_from.clone(),
            bot_username,
            inbound_tx: self.inbound_tx.clone(),
        });
        let on_message = forwarder.clone();
        let on_callback = forwarder;

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(move |msg: Message| {
                let forwarder = on_message.clone();
                async move {
                    forwarder.on_message(msg).await;
                    Ok::<(), teloxide::RequestError>(())
                }
            }))
            .branch(
                Update::filter_callback_query().endpoint(move |bot: Bot, query: CallbackQuery| {
                    let forwarder = on_callback.clone();
                    async move {
                        // Stop the client-side spinner whatever happens next
                        if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
                            tracing::warn!("Failed to answer callback query: {}", e);
                        }
                        forwarder.on_callback(&query).await;
                        Ok::<(), teloxide::RequestError>(())
                    }
                }),
            );

        let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
            .default_handler(|update| async move {
                tracing::trace!("Unhandled update: {:?}", update.id);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the Telegram dispatcher",
            ))
            .build();

        let dispatcher_handle = if self.webhook.enabled {
            let options = webhook_options(&self.webhook)?;
            tracing::info!(
                "Starting Telegram bot (webhook mode on {}:{})...",
                self.webhook.listen_addr,
                self.webhook.port
            );
            let listener = webhooks::axum(bot.clone(), options)
                .await
                .map_err(|e| ChannelError::ApiError(format!("Failed to set webhook: {}", e)))?;
            tokio::spawn(async move {
                dispatcher
                    .dispatch_with_listener(
                        listener,
                        LoggingErrorHandler::with_custom_text("An error from the webhook listener"),
                    )
                    .await;
            })
        } else {
            tracing::info!("Starting Telegram bot (polling mode)...");
            tokio::spawn(async move {
                dispatcher.dispatch().await;
            })
        };

        self.bot = Some(bot);
        self.dispatcher_handle = Some(dispatcher_handle);
        self.running = true;

        tracing::info!("Telegram bot started successfully");

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }

        tracing::info!("Stopping Telegram bot...");

        if let Some(handle) = self.dispatcher_handle.take() {
            handle.abort();
        }

        self.bot = None;
        self.running = false;

        tracing::info!("Telegram bot stopped");

        Ok(())
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let bot = self
            .bot
            .as_ref()
            .ok_or_else(|| ChannelError::NotRunning("Telegram bot not running".to_string()))?;

        let chat_id: i64 = message
            .chat_id
            .parse()
            .map_err(|_| ChannelError::Error(format!("Invalid chat_id: {}", message.chat_id)))?;
        let chat_id = ChatId(chat_id);
        let keyboard = message.keyboard.as_ref();

        if message.format == MessageFormat::Plain {
            return Self::send_with(bot, chat_id, message.content.clone(), None, keyboard)
                .await
                .map_err(|e| ChannelError::ApiError(format!("Failed to send message: {}", e)));
        }

        let html_content = markdown_to_telegram_html(&message.content);
        match Self::send_with(bot, chat_id, html_content, Some(ParseMode::Html), keyboard).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("HTML parse failed, falling back to plain text: {}", e);
                Self::send_with(bot, chat_id, message.content.clone(), None, keyboard)
                    .await
                    .map_err(|e2| {
                        ChannelError::ApiError(format!("Failed to send message: {}", e2))
                    })
            }
        }
    }

    fn set_inbound_sender(&mut self, tx: mpsc::Sender<InboundMessage>) {
        self.inbound_tx = Some(tx);
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        sender_allowed(&self.allow_from, sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfwm_core::bus::{InboundKind, InlineButton};
    use teloxide::types::InlineKeyboardButtonKind;

    fn config(allow_from: Vec<String>) -> TelegramConfig {
        TelegramConfig {
            token: "test_token".to_string(),
            allow_from,
            ..TelegramConfig::default()
        }
    }

    #[test]
    fn test_markdown_single_asterisk_bold() {
        let output = markdown_to_telegram_html("Worker *demo* deployed");
        assert_eq!(output, "Worker <b>demo</b> deployed");
    }

    #[test]
    fn test_markdown_escaped_user_value_renders_verbatim() {
        let output = markdown_to_telegram_html(r"✅ KV Namespace set to: *MY\_KV\_NS*");
        assert_eq!(output, "✅ KV Namespace set to: <b>MY_KV_NS</b>");

        let output = markdown_to_telegram_html(r"Worker name: *my\_cool\_worker*");
        assert_eq!(output, "Worker name: <b>my_cool_worker</b>");

        let output = markdown_to_telegram_html(r"*a\*b* \`x\` \\");
        assert_eq!(output, r"<b>a*b</b> `x` \");
    }

    #[test]
    fn test_markdown_double_asterisk_bold() {
        let output = markdown_to_telegram_html("Hello **world**");
        assert!(output.contains("<b>world</b>"));
    }

    #[test]
    fn test_markdown_italic_and_code() {
        let output = markdown_to_telegram_html("Use _this_ with `a<b`");
        assert!(output.contains("<i>this</i>"));
        assert!(output.contains("<code>a&lt;b</code>"));
    }

    #[test]
    fn test_markdown_code_block() {
        let output = markdown_to_telegram_html("```js\nexport default {}\n```");
        assert!(output.contains("<pre><code>"));
        assert!(output.contains("export default {}"));
    }

    #[test]
    fn test_markdown_link() {
        let output = markdown_to_telegram_html("[dash](https://dash.cloudflare.com)");
        assert!(output.contains(r#"<a href="https://dash.cloudflare.com">dash</a>"#));
    }

    #[test]
    fn test_markdown_bullets_on_every_line() {
        let output = markdown_to_telegram_html("Steps:\n- one\n- two");
        assert_eq!(output, "Steps:\n• one\n• two");
    }

    #[test]
    fn test_markdown_escapes_user_text() {
        let output = markdown_to_telegram_html("Name: *<script>*");
        assert!(!output.contains("<script>"));
        assert!(output.contains("<b>&lt;script&gt;</b>"));
    }

    #[test]
    fn test_parse_command_variants() {
        assert_eq!(
            parse_command("/start", None),
            Some(("start".to_string(), String::new()))
        );
        assert_eq!(
            parse_command("/cloudflare  now please ", None),
            Some(("cloudflare".to_string(), "now please".to_string()))
        );
        assert_eq!(
            parse_command("/start@cfwm_bot", Some("cfwm_bot")),
            Some(("start".to_string(), String::new()))
        );
        assert_eq!(parse_command("/start@other_bot", Some("cfwm_bot")), None);
        assert_eq!(parse_command("/", None), None);
        assert_eq!(parse_command("hello /start", None), None);
    }

    #[test]
    fn test_text_to_inbound() {
        let msg = text_to_inbound("telegram", 42, -100, "/cloudflare", None);
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "-100");
        assert_eq!(
            msg.kind,
            InboundKind::Command {
                name: "cloudflare".to_string(),
                args: String::new()
            }
        );

        let msg = text_to_inbound("telegram", 42, 42, " my-token ", None);
        assert_eq!(
            msg.kind,
            InboundKind::Text {
                text: " my-token ".to_string()
            }
        );
    }

    #[test]
    fn test_callback_replies_to_message_chat() {
        let msg = callback_to_inbound("telegram", 42, Some(-100), "list_worker".to_string());
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "-100");
        assert_eq!(
            msg.kind,
            InboundKind::Callback {
                data: "list_worker".to_string()
            }
        );
    }

    #[test]
    fn test_callback_without_message_falls_back_to_user_chat() {
        let msg = callback_to_inbound("telegram", 42, None, "help".to_string());
        assert_eq!(msg.sender_id, "42");
        assert_eq!(msg.chat_id, "42");
    }

    #[test]
    fn test_to_inline_markup() {
        let keyboard = InlineKeyboard::new()
            .row([
                InlineButton::new("Deploy", "deploy_worker"),
                InlineButton::new("List", "list_worker"),
            ])
            .row([InlineButton::new("Guide", "help")]);

        let markup = to_inline_markup(&keyboard);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);

        let button = &markup.inline_keyboard[1][0];
        assert_eq!(button.text, "Guide");
        match &button.kind {
            InlineKeyboardButtonKind::CallbackData(data) => assert_eq!(data, "help"),
            other => panic!("unexpected button kind: {:?}", other),
        }
    }

    #[test]
    fn test_webhook_options_validation() {
        let mut webhook = WebhookConfig {
            enabled: true,
            url: "https://bot.example.com/hook".to_string(),
            ..WebhookConfig::default()
        };
        assert!(webhook_options(&webhook).is_ok());

        webhook.listen_addr = "not-an-ip".to_string();
        assert!(matches!(
            webhook_options(&webhook),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_telegram_handler_new() {
        let handler = TelegramHandler::new(&config(vec!["user1".to_string()]));
        assert_eq!(handler.name(), "telegram");
        assert_eq!(handler.token, "test_token");
        assert!(!handler.webhook.enabled);
        assert!(!handler.is_running());
    }

    #[test]
    fn test_build_bot_through_proxy() {
        let mut cfg = config(vec![]);
        cfg.proxy = Some("http://127.0.0.1:3128".to_string());
        let handler = TelegramHandler::new(&cfg);

        let bot = handler.build_bot().unwrap();
        assert_eq!(bot.token(), "test_token");
    }

    #[test]
    fn test_telegram_handler_is_allowed() {
        let handler =
            TelegramHandler::new(&config(vec!["user1".to_string(), "12345".to_string()]));
        assert!(handler.is_allowed("user1"));
        assert!(handler.is_allowed("12345"));
        assert!(handler.is_allowed("12345|user1"));
        assert!(!handler.is_allowed("unknown"));

        let open = TelegramHandler::new(&config(vec![]));
        assert!(open.is_allowed("anyone"));
    }

    #[tokio::test]
    async fn test_start_without_token_fails() {
        let mut handler = TelegramHandler::new(&TelegramConfig::default());
        assert!(matches!(
            handler.start().await,
            Err(ChannelError::NotConfigured(_))
        ));
        assert!(!handler.is_running());
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let handler = TelegramHandler::new(&config(vec![]));
        let result = handler
            .send(OutboundMessage::new("telegram", "42", "hi"))
            .await;
        assert!(matches!(result, Err(ChannelError::NotRunning(_))));
    }
}
