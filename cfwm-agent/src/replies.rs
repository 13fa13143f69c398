//! Reply catalogue: every fixed text and keyboard the bot sends

use cfwm_core::bus::{InlineButton, InlineKeyboard, MessageFormat};
use cfwm_core::session::WorkerRecord;

/// Callback data carried by inline buttons
pub mod callback {
    pub const REGISTER_START: &str = "register_start";
    /// Followed by the user id to approve
    pub const APPROVE_USER_PREFIX: &str = "approve_user:";
    pub const DEPLOY_WORKER: &str = "deploy_worker";
    pub const LIST_WORKER: &str = "list_worker";
    pub const SET_KV: &str = "set_kv";
    pub const SET_KV_KEY: &str = "set_kv_key";
    pub const HELP: &str = "help";
}

/// Reply content before it is addressed to a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub format: MessageFormat,
    pub keyboard: Option<InlineKeyboard>,
}

impl Reply {
    fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            format: MessageFormat::Plain,
            keyboard: None,
        }
    }

    fn markdown(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            format: MessageFormat::Markdown,
            keyboard: None,
        }
    }

    fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Backslash-escape markdown markup in a user-supplied value so it renders
/// exactly as stored
pub fn escape_markdown(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '*' | '_' | '`' | '[' | ']' | '~') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub const NO_WORKERS: &str = "🚫 You have not deployed any Worker yet.";
pub const WORKER_NAME_MISSING: &str = "⚠️ Worker name not found. Please restart the deploy.";

const HELP_TEXT: &str = "📚 *Guide*\n\n\
- Register and wait for admin approval\n\
- Enter your Cloudflare data (/cloudflare)\n\
- Deploy Worker: enter a name, then the code\n\
- List Worker: see the Workers you deployed\n\
- Set KV: set your Cloudflare KV namespace/key\n\n\
Contact the admin if you need more help.";

/// Five-option main menu, rows of 2/2/1
pub fn menu_keyboard() -> InlineKeyboard {
    InlineKeyboard::new()
        .row([
            InlineButton::new("🚀 Deploy Worker", callback::DEPLOY_WORKER),
            InlineButton::new("📦 List Worker", callback::LIST_WORKER),
        ])
        .row([
            InlineButton::new("💾 Set KV Namespace", callback::SET_KV),
            InlineButton::new("🔑 Set KV Key", callback::SET_KV_KEY),
        ])
        .row([InlineButton::new("📚 Guide", callback::HELP)])
}

pub fn welcome() -> Reply {
    Reply::markdown(
        "Welcome to *Cloudflare Worker Manager!*\n\nPlease register first to use the bot.",
    )
    .with_keyboard(InlineKeyboard::new().row([InlineButton::new(
        "📝 Register",
        callback::REGISTER_START,
    )]))
}

pub fn complete_setup() -> Reply {
    Reply::plain(
        "🛡️ Complete your Cloudflare data\n\n\
         Before using the bot, please enter your Cloudflare data.\n\
         Type /cloudflare to begin.",
    )
}

pub fn main_menu() -> Reply {
    Reply::markdown("🔧 *Cloudflare Worker Manager*\n\nPlease choose a feature:")
        .with_keyboard(menu_keyboard())
}

pub fn ask_name() -> Reply {
    Reply::plain("Please enter your full name:")
}

pub fn awaiting_approval() -> Reply {
    Reply::plain("Your registration is waiting for admin approval.")
}

/// Sent to the admin when someone registers
pub fn approval_request(name: &str, user_id: &str) -> Reply {
    Reply::markdown(format!(
        "🆕 *New User Registered*\nName: {}\nID: {}",
        escape_markdown(name),
        user_id
    ))
    .with_keyboard(InlineKeyboard::new().row([InlineButton::new(
        "✅ Approve",
        format!("{}{}", callback::APPROVE_USER_PREFIX, user_id),
    )]))
}

pub fn registration_approved() -> Reply {
    Reply::plain(
        "✅ Your registration has been approved by the admin!\n\
         Please complete your Cloudflare data with /cloudflare.",
    )
}

/// Sent to the admin after an approval
pub fn approval_confirmed(user_id: &str) -> Reply {
    Reply::plain(format!("User (ID: {}) has been approved.", user_id))
}

pub fn ask_api_token() -> Reply {
    Reply::markdown("Enter your Cloudflare *API Token*:")
}

pub fn ask_account_id() -> Reply {
    Reply::markdown("Enter your Cloudflare *Account ID*:")
}

pub fn ask_zone_id() -> Reply {
    Reply::markdown("Enter your Cloudflare *Zone ID*:")
}

pub fn ask_kv_namespace_id() -> Reply {
    Reply::markdown("Enter your *KV Namespace ID* (Cloudflare KV, e.g. 1234abcd...):")
}

pub fn cloudflare_saved() -> Reply {
    Reply::plain(
        "✅ All Cloudflare data has been saved!\nOpen the main menu with /start.",
    )
}

pub fn ask_worker_name() -> Reply {
    Reply::plain("Enter the name of the Worker you want to deploy:")
}

pub fn ask_worker_code(name: &str) -> Reply {
    Reply::markdown(format!(
        "Worker name: *{}*\nNow send the Worker code (paste JS):",
        escape_markdown(name)
    ))
}

pub fn worker_deployed(name: &str) -> Reply {
    Reply::markdown(format!(
        "✅ Worker *{}* deployed successfully!",
        escape_markdown(name)
    ))
}

pub fn worker_name_missing() -> Reply {
    Reply::plain(WORKER_NAME_MISSING)
}

/// Numbered worker list, or the fixed "no workers" text
pub fn worker_list(workers: &[WorkerRecord]) -> Reply {
    if workers.is_empty() {
        return Reply::plain(NO_WORKERS);
    }

    let mut content = String::from("📦 *Your Workers:*\n\n");
    for (i, worker) in workers.iter().enumerate() {
        content.push_str(&format!("{}. {}\n", i + 1, escape_markdown(&worker.name)));
    }
    Reply::markdown(content)
}

pub fn ask_kv_namespace() -> Reply {
    Reply::plain("Enter the KV Namespace name:")
}

pub fn kv_namespace_set(namespace: &str) -> Reply {
    Reply::markdown(format!(
        "✅ KV Namespace set to: *{}*",
        escape_markdown(namespace)
    ))
}

pub fn ask_kv_key() -> Reply {
    Reply::plain("Enter the KV Key name:")
}

pub fn kv_key_set(key: &str) -> Reply {
    Reply::markdown(format!("✅ KV Key set to: *{}*", escape_markdown(key)))
}

pub fn help() -> Reply {
    Reply::markdown(HELP_TEXT)
}
