use cfwm_agent::{BotLoop, ConversationEngine, EngineSettings};
use cfwm_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use cfwm_core::session::{InMemorySessionStore, SessionStore, Step};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::assert_ok;

const ADMIN: &str = "1000";
const CHANNEL: &str = "telegram";
const MARKER: &str = "settle-marker";

struct Harness {
    bus: MessageBus,
    store: Arc<InMemorySessionStore>,
    outbound: UnboundedReceiver<OutboundMessage>,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let bus = MessageBus::new();
        let store = Arc::new(InMemorySessionStore::new());
        let engine = ConversationEngine::new(
            store.clone() as Arc<dyn SessionStore>,
            EngineSettings::new(CHANNEL, ADMIN),
        );
        let outbound = bus.take_outbound_receiver().await.unwrap();

        let bot = BotLoop::new(bus.clone(), engine);
        let handle = tokio::spawn(async move {
            let _ = bot.run().await;
        });

        Self {
            bus,
            store,
            outbound,
            handle,
        }
    }

    fn send(&self, msg: InboundMessage) {
        assert_ok!(self.bus.publish_inbound(msg));
    }

    fn text(&self, user: &str, text: &str) {
        self.send(InboundMessage::text(CHANNEL, user, user, text));
    }

    fn press(&self, user: &str, data: &str) {
        self.send(InboundMessage::callback(CHANNEL, user, user, data));
    }

    fn command(&self, user: &str, name: &str) {
        self.send(InboundMessage::command(CHANNEL, user, user, name, ""));
    }

    async fn next(&mut self) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.recv())
            .await
            .expect("reply within timeout")
            .expect("outbound queue open")
    }

    /// Wait until every queued inbound event has been processed and return
    /// the replies produced before that point
    async fn settle(&mut self) -> Vec<OutboundMessage> {
        // /start always answers exactly once
        self.command(MARKER, "start");
        let mut earlier = Vec::new();
        loop {
            let msg = self.next().await;
            if msg.chat_id == MARKER {
                return earlier;
            }
            earlier.push(msg);
        }
    }

    async fn assert_silent(&mut self) {
        let replies = self.settle().await;
        assert!(replies.is_empty(), "unexpected replies: {:?}", replies);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn test_full_registration_and_deploy_through_bus() {
    let mut h = Harness::start().await;

    h.command("42", "start");
    let welcome = h.next().await;
    assert_eq!(welcome.channel, CHANNEL);
    assert!(welcome.keyboard.is_some());

    h.press("42", "register_start");
    assert_eq!(h.next().await.chat_id, "42");

    h.text("42", "Alice");
    let admin_note = h.next().await;
    assert_eq!(admin_note.chat_id, ADMIN);
    assert!(admin_note.content.contains("Alice"));
    assert!(admin_note.content.contains("42"));
    assert_eq!(h.next().await.chat_id, "42");

    h.press(ADMIN, "approve_user:42");
    assert_eq!(h.next().await.chat_id, "42");
    assert_eq!(h.next().await.chat_id, ADMIN);

    h.command("42", "cloudflare");
    h.next().await;
    for value in ["token", "account", "zone", "kv"] {
        h.text("42", value);
        h.next().await;
    }

    h.press("42", "deploy_worker");
    h.next().await;
    h.text("42", "demo");
    h.next().await;
    h.text("42", "console.log(1)");
    let deployed = h.next().await;
    assert!(deployed.content.contains("demo"));

    h.press("42", "list_worker");
    let listing = h.next().await;
    assert!(listing.content.contains("1. demo"));

    let session = h.store.get("42").unwrap();
    assert_eq!(session.step, Step::None);
    assert_eq!(session.workers().len(), 1);
}

#[tokio::test]
async fn test_unready_user_menu_presses_are_silent() {
    let mut h = Harness::start().await;

    for data in ["deploy_worker", "list_worker", "set_kv", "set_kv_key", "help"] {
        h.press("7", data);
    }
    h.assert_silent().await;
    assert!(h.store.get("7").is_none());
}

#[tokio::test]
async fn test_events_for_one_user_keep_arrival_order() {
    let mut h = Harness::start().await;

    h.command("9", "cloudflare");
    h.text("9", "token");
    h.text("9", "account");
    h.text("9", "zone");
    h.text("9", "kv");

    let mut replies = Vec::new();
    for _ in 0..5 {
        replies.push(h.next().await.content);
    }
    assert!(replies[0].contains("API Token"));
    assert!(replies[1].contains("Account ID"));
    assert!(replies[2].contains("Zone ID"));
    assert!(replies[3].contains("KV Namespace ID"));
    assert!(replies[4].contains("saved"));

    let session = h.store.get("9").unwrap();
    assert!(session.is_configured());
    assert_eq!(session.cloudflare.api_token.as_deref(), Some("token"));
}

#[tokio::test]
async fn test_bot_loop_runs_once_per_bus() {
    let bus = MessageBus::new();
    let _rx = bus.take_inbound_receiver().await.unwrap();

    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let bot = BotLoop::new(bus, ConversationEngine::new(store, EngineSettings::new(CHANNEL, ADMIN)));
    assert!(bot.run().await.is_err());
}
