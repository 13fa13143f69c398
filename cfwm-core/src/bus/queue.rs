//! Async message queue implementation

use super::events::{InboundMessage, OutboundMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

type OutboundCallback = Arc<
    dyn Fn(OutboundMessage) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Async message bus between chat channels and the conversation engine
///
/// Channels push events to the inbound queue. The bot loop consumes them
/// and pushes replies to the outbound queue, which the dispatcher hands to
/// the subscribed channel without waiting for delivery.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<InboundMessage>>>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<OutboundMessage>>>>,
    /// Outbound subscribers by channel
    subscribers: Arc<RwLock<HashMap<String, Vec<OutboundCallback>>>>,
    running: Arc<watch::Sender<bool>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);

        Self {
            inbound_tx,
            inbound_rx: Arc::new(RwLock::new(Some(inbound_rx))),
            outbound_tx,
            outbound_rx: Arc::new(RwLock::new(Some(outbound_rx))),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(running),
        }
    }

    /// Take the inbound receiver (can only be called once)
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.write().await.take()
    }

    /// Take the outbound receiver (can only be called once)
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundMessage>> {
        self.outbound_rx.write().await.take()
    }

    /// Publish an event from a channel to the engine
    pub fn publish_inbound(&self, msg: InboundMessage) -> crate::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Inbound channel closed".to_string()))
    }

    /// Queue a reply for delivery. Never waits for the channel.
    pub fn publish_outbound(&self, msg: OutboundMessage) -> crate::Result<()> {
        self.outbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Outbound channel closed".to_string()))
    }

    /// Subscribe to outbound messages for a specific channel with a callback
    pub async fn subscribe_outbound<F, Fut>(&self, channel: impl Into<String>, callback: F)
    where
        F: Fn(OutboundMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let channel = channel.into();
        let wrapped: OutboundCallback = Arc::new(move |msg| Box::pin(callback(msg)));

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(channel).or_default().push(wrapped);
    }

    /// Dispatch outbound messages to subscribed channels until [`stop`](Self::stop)
    /// is called. Run this as a background task.
    pub async fn dispatch_outbound_loop(&self) {
        let mut outbound_rx = match self.take_outbound_receiver().await {
            Some(rx) => rx,
            None => {
                debug!("Outbound receiver already taken");
                return;
            }
        };

        let mut running = self.running.subscribe();
        self.running.send_replace(true);
        debug!("Starting outbound dispatcher");

        loop {
            tokio::select! {
                maybe_msg = outbound_rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    let subscribers = self.subscribers.read().await;

                    match subscribers.get(&msg.channel) {
                        Some(callbacks) => {
                            for callback in callbacks {
                                // Fire and forget: delivery never blocks the queue
                                tokio::spawn(callback(msg.clone()));
                            }
                        }
                        None => warn!("No subscribers for channel: {}", msg.channel),
                    }
                }
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.send_replace(false);
        debug!("Outbound dispatcher stopped");
    }

    /// Stop the dispatcher loop
    pub async fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Check if the dispatcher is running
    pub async fn is_running(&self) -> bool {
        *self.running.borrow()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_message_bus_creation() {
        let bus = MessageBus::new();
        assert!(!bus.is_running().await);
    }

    #[tokio::test]
    async fn test_publish_inbound() {
        let bus = MessageBus::new();
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();

        let msg = InboundMessage::text("test", "user1", "chat1", "Hello");
        assert!(bus.publish_inbound(msg).is_ok());

        let received = inbound_rx.try_recv().unwrap();
        assert_eq!(received.sender_id, "user1");
        assert!(bus.take_inbound_receiver().await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_channel_subscriber() {
        let bus = MessageBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        bus.subscribe_outbound("telegram", move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg.content);
            }
        })
        .await;

        let dispatcher = bus.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch_outbound_loop().await });

        bus.publish_outbound(OutboundMessage::new("telegram", "1", "hello"))
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "1", "dropped"))
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(delivered.as_deref(), Some("hello"));

        bus.stop().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!bus.is_running().await);
    }
}
