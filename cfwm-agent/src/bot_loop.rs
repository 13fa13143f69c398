//! Bot loop: feeds bus events through the conversation engine

use crate::engine::ConversationEngine;
use cfwm_core::bus::{InboundMessage, MessageBus};
use tracing::{debug, error, info, Instrument};

/// Drives the engine from the message bus.
///
/// Events are handled strictly one at a time in arrival order, so no two
/// mutations of the same session are ever in flight.
pub struct BotLoop {
    bus: MessageBus,
    engine: ConversationEngine,
}

impl BotLoop {
    /// Create a new bot loop
    pub fn new(bus: MessageBus, engine: ConversationEngine) -> Self {
        Self { bus, engine }
    }

    /// Run until the inbound queue closes or the task is aborted
    pub async fn run(&self) -> cfwm_core::Result<()> {
        let Some(mut inbound_rx) = self.bus.take_inbound_receiver().await else {
            error!("Failed to take inbound receiver");
            return Err(cfwm_core::Error::Internal(
                "Inbound receiver already taken".to_string(),
            ));
        };

        info!("Bot loop started");

        while let Some(msg) = inbound_rx.recv().await {
            let span = tracing::info_span!(
                "event",
                channel = %msg.channel,
                user_id = %msg.sender_id,
            );
            async { self.process(msg) }.instrument(span).await;
        }

        info!("Message bus closed, bot loop stopped");
        Ok(())
    }

    /// Handle one event and queue its replies. Returns the number queued.
    pub fn process(&self, msg: InboundMessage) -> usize {
        debug!(kind = msg.kind.label(), "Processing event");

        let replies = self.engine.handle(&msg);
        let mut queued = 0;
        for reply in replies {
            // Delivery is not awaited; the dispatcher owns it from here
            match self.bus.publish_outbound(reply) {
                Ok(()) => queued += 1,
                Err(e) => error!("Failed to publish reply: {}", e),
            }
        }

        if queued == 0 {
            debug!("No reply needed");
        }
        queued
    }
}
