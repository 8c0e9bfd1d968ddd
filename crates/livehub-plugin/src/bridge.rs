//! The secure message bridge.
//!
//! The bridge is the only path from host to plugin. Each loaded plugin owns a
//! [`Mailbox`]: a single ordered queue drained by one delivery task, so
//! envelopes for one plugin arrive in the order the host posted them.
//! Different plugins have independent mailboxes and no mutual ordering.
//!
//! Delivery rules:
//!
//! - **data** envelopes go to `handle_message` (when the plugin is `Ready`
//!   and not passive), then to every attached popup;
//! - **lifecycle** envelopes go to popups only.
//!
//! Payloads are owned `serde_json::Value`s. Each recipient gets its own clone,
//! so nothing a plugin does to a payload can reach host state or a sibling.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use livehub_core::{Envelope, EnvelopeKind, LifecycleState};

use crate::instance::PluginInstance;

/// Ordered delivery queue for one plugin.
pub struct Mailbox {
    plugin_id: String,
    tx: mpsc::UnboundedSender<Envelope>,
    task: JoinHandle<()>,
}

impl Mailbox {
    /// Opens a mailbox and spawns its delivery task.
    pub fn open(instance: Arc<PluginInstance>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let plugin_id = instance.id().to_string();
        let task = tokio::spawn(deliver(instance, rx));
        Self {
            plugin_id,
            tx,
            task,
        }
    }

    /// Queues an envelope. Returns false if the mailbox is closed.
    pub fn post(&self, envelope: Envelope) -> bool {
        debug_assert_eq!(envelope.plugin_id, self.plugin_id);
        self.tx.send(envelope).is_ok()
    }

    /// Stops accepting envelopes; already-queued ones are still delivered.
    pub fn close(self) {
        drop(self.tx);
        debug!(plugin = %self.plugin_id, "Mailbox closed");
    }

    /// Stops delivery immediately.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn deliver(instance: Arc<PluginInstance>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        trace!(
            plugin = %instance.id(),
            event = %envelope.event,
            kind = ?envelope.event_type,
            "Delivering envelope"
        );
        if envelope.event_type == EnvelopeKind::Data
            && instance.state() == LifecycleState::Ready
            && !instance.is_passive()
        {
            // Handler failures are logged by `handle`; NotReady means an unload won the race.
            if let Err(e) = instance
                .handle(&envelope.event, envelope.payload.clone())
                .await
            {
                debug!(
                    plugin = %instance.id(),
                    event = %envelope.event,
                    error = %e,
                    "Envelope skipped by handler"
                );
            }
        }
        instance.fan_out(&envelope);
    }
}
