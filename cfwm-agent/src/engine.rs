//! Conversation engine: the per-user step transition table

use crate::replies::{self, callback, Reply};
use cfwm_core::bus::{InboundKind, InboundMessage, OutboundMessage};
use cfwm_core::config::BotConfig;
use cfwm_core::session::{Session, SessionStore, Step, WorkerRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Command that opens the Cloudflare setup flow. Matched as a prefix.
const CLOUDFLARE_COMMAND: &str = "cloudflare";
const START_COMMAND: &str = "start";

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Channel replies are addressed to
    pub channel: String,
    /// Chat that receives registration requests
    pub admin_id: String,
    /// Drop `approve_user` callbacks not sent by the admin
    pub enforce_admin_approval: bool,
}

impl EngineSettings {
    pub fn new(channel: impl Into<String>, admin_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            admin_id: admin_id.into(),
            enforce_admin_approval: true,
        }
    }

    /// Settings for `channel` from the bot config
    pub fn from_config(channel: impl Into<String>, config: &BotConfig) -> Self {
        Self {
            channel: channel.into(),
            admin_id: config.admin_id.trim().to_string(),
            enforce_admin_approval: config.enforce_admin_approval,
        }
    }
}

/// Replies collected while handling one event
struct Outbox<'a> {
    settings: &'a EngineSettings,
    chat_id: &'a str,
    messages: Vec<OutboundMessage>,
}

impl<'a> Outbox<'a> {
    fn new(settings: &'a EngineSettings, chat_id: &'a str) -> Self {
        Self {
            settings,
            chat_id,
            messages: Vec::new(),
        }
    }

    /// Reply to the chat the event came from
    fn reply(&mut self, reply: Reply) {
        self.send_to(self.chat_id, reply);
    }

    fn send_to(&mut self, chat_id: &str, reply: Reply) {
        let mut msg = OutboundMessage::new(&self.settings.channel, chat_id, reply.content);
        msg.format = reply.format;
        msg.keyboard = reply.keyboard;
        self.messages.push(msg);
    }

    fn notify_admin(&mut self, reply: Reply) {
        if self.settings.admin_id.is_empty() {
            warn!("No admin configured, dropping admin notification");
            return;
        }
        let admin_id = self.settings.admin_id.clone();
        self.send_to(&admin_id, reply);
    }
}

/// Decides, for each inbound event, the step transition and the replies.
///
/// Handling never fails: events that match no transition are dropped
/// without a reply.
pub struct ConversationEngine {
    store: Arc<dyn SessionStore>,
    settings: EngineSettings,
}

impl ConversationEngine {
    /// Create an engine over an injected session store
    pub fn new(store: Arc<dyn SessionStore>, settings: EngineSettings) -> Self {
        if settings.admin_id.is_empty() {
            warn!("Admin id is empty: registrations cannot be approved");
        }
        Self { store, settings }
    }

    /// The session store backing this engine
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Handle one event and return the messages to send
    pub fn handle(&self, msg: &InboundMessage) -> Vec<OutboundMessage> {
        let mut out = Outbox::new(&self.settings, &msg.chat_id);
        let user_id = msg.sender_id.as_str();

        match &msg.kind {
            InboundKind::Command { name, .. } => self.on_command(user_id, name, &mut out),
            InboundKind::Callback { data } => self.on_callback(user_id, data, &mut out),
            InboundKind::Text { text } => self.on_text(user_id, text, &mut out),
        }

        out.messages
    }

    fn on_command(&self, user_id: &str, name: &str, out: &mut Outbox<'_>) {
        if name == START_COMMAND {
            let session = self.store.get_or_create(user_id);
            let reply = if !session.approved {
                replies::welcome()
            } else if !session.is_configured() {
                replies::complete_setup()
            } else {
                replies::main_menu()
            };
            out.reply(reply);
        } else if name.starts_with(CLOUDFLARE_COMMAND) {
            let mut session = self.store.get_or_create(user_id);
            self.transition(&mut session, Step::InputApiToken);
            out.reply(replies::ask_api_token());
        } else {
            debug!(user_id, command = name, "Ignoring unknown command");
        }
    }

    fn on_callback(&self, user_id: &str, data: &str, out: &mut Outbox<'_>) {
        if data == callback::REGISTER_START {
            let mut session = self.store.get_or_create(user_id);
            let from = session.step;
            session.reset_for_registration();
            self.save(session, from);
            out.reply(replies::ask_name());
            return;
        }

        if let Some(target) = data.strip_prefix(callback::APPROVE_USER_PREFIX) {
            self.approve(user_id, target, out);
            return;
        }

        // Menu features: silently ignored unless approved and configured
        let Some(mut session) = self
            .store
            .get(user_id)
            .filter(Session::can_use_menu)
        else {
            debug!(user_id, data, "Menu callback rejected by guard");
            return;
        };

        match data {
            callback::DEPLOY_WORKER => {
                self.transition(&mut session, Step::InputWorkerName);
                out.reply(replies::ask_worker_name());
            }
            callback::LIST_WORKER => out.reply(replies::worker_list(session.workers())),
            callback::SET_KV => {
                self.transition(&mut session, Step::InputKvNamespace);
                out.reply(replies::ask_kv_namespace());
            }
            callback::SET_KV_KEY => {
                self.transition(&mut session, Step::InputKvKey);
                out.reply(replies::ask_kv_key());
            }
            callback::HELP => out.reply(replies::help()),
            _ => debug!(user_id, data, "Ignoring unknown callback"),
        }
    }

    fn approve(&self, sender_id: &str, data: &str, out: &mut Outbox<'_>) {
        let target = data.split(':').next().unwrap_or_default().trim();
        if target.is_empty() {
            debug!(sender_id, "Approval callback without a user id");
            return;
        }
        if self.settings.enforce_admin_approval && sender_id != self.settings.admin_id {
            warn!(sender_id, target, "Approval attempted by a non-admin sender");
            return;
        }

        let mut session = self.store.get_or_create(target);
        let from = session.step;
        session.approve();
        self.save(session, from);
        info!(target, "User approved");

        out.send_to(target, replies::registration_approved());
        out.notify_admin(replies::approval_confirmed(target));
    }

    fn on_text(&self, user_id: &str, text: &str, out: &mut Outbox<'_>) {
        let mut session = self.store.get_or_create(user_id);
        let input = text.trim();

        match session.step {
            Step::InputName => {
                session.name = Some(input.to_string());
                self.transition(&mut session, Step::WaitingApproval);
                info!(user_id, "Registration submitted");
                out.notify_admin(replies::approval_request(input, user_id));
                out.reply(replies::awaiting_approval());
            }
            Step::InputApiToken => {
                session.cloudflare.api_token = Some(input.to_string());
                self.transition(&mut session, Step::InputAccountId);
                out.reply(replies::ask_account_id());
            }
            Step::InputAccountId => {
                session.cloudflare.account_id = Some(input.to_string());
                self.transition(&mut session, Step::InputZoneId);
                out.reply(replies::ask_zone_id());
            }
            Step::InputZoneId => {
                session.cloudflare.zone_id = Some(input.to_string());
                self.transition(&mut session, Step::InputKvNamespaceId);
                out.reply(replies::ask_kv_namespace_id());
            }
            Step::InputKvNamespaceId => {
                session.cloudflare.kv_namespace_id = Some(input.to_string());
                self.transition(&mut session, Step::None);
                out.reply(replies::cloudflare_saved());
            }
            Step::InputWorkerName if session.can_use_menu() => {
                session.pending_worker_name = Some(input.to_string());
                self.transition(&mut session, Step::InputWorkerCode);
                out.reply(replies::ask_worker_code(input));
            }
            Step::InputWorkerCode if session.can_use_menu() => {
                match session.pending_worker_name.take() {
                    Some(name) => {
                        // Code is kept verbatim, indentation matters
                        session.push_worker(WorkerRecord::new(name.clone(), text));
                        self.transition(&mut session, Step::None);
                        info!(user_id, worker = %name, "Worker recorded");
                        out.reply(replies::worker_deployed(&name));
                    }
                    None => {
                        self.transition(&mut session, Step::None);
                        out.reply(replies::worker_name_missing());
                    }
                }
            }
            Step::InputKvNamespace if session.can_use_menu() => {
                session.cloudflare.kv_namespace = Some(input.to_string());
                self.transition(&mut session, Step::None);
                out.reply(replies::kv_namespace_set(input));
            }
            Step::InputKvKey if session.can_use_menu() => {
                session.cloudflare.kv_key = Some(input.to_string());
                self.transition(&mut session, Step::None);
                out.reply(replies::kv_key_set(input));
            }
            step => debug!(user_id, %step, "No transition for text input"),
        }
    }

    /// Enter `to` and store the session
    fn transition(&self, session: &mut Session, to: Step) {
        let from = session.step;
        session.enter(to);
        self.save(session.clone(), from);
    }

    fn save(&self, session: Session, from: Step) {
        debug!(
            user_id = %session.user_id,
            from = %from,
            to = %session.step,
            "Step transition"
        );
        self.store.set(session);
    }
}
