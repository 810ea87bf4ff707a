//! Notification sinks.

use std::io::Write;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::domain::{Notification, OutboundMessage};

/// Publishes messages on a named channel. Must not block for long: it is
/// called from the thread draining a manager's work queue.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, channel: &str, message: &OutboundMessage) -> Result<()>;
}

/// Keeps every delivered message in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<(String, OutboundMessage)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages delivered so far, with their channel
    pub fn messages(&self) -> Vec<(String, OutboundMessage)> {
        self.messages.lock().clone()
    }

    /// Notifications only, in delivery order
    pub fn notifications(&self) -> Vec<Notification> {
        self.messages
            .lock()
            .iter()
            .filter_map(|(_, m)| m.as_notification().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl NotificationSink for CollectingSink {
    fn deliver(&self, channel: &str, message: &OutboundMessage) -> Result<()> {
        self.messages
            .lock()
            .push((channel.to_string(), message.clone()));
        Ok(())
    }
}

/// Writes one JSON object per line to stdout
#[derive(Debug, Default)]
pub struct JsonLinesSink;

impl NotificationSink for JsonLinesSink {
    fn deliver(&self, channel: &str, message: &OutboundMessage) -> Result<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "channel": channel,
            "message": message,
        }))
        .context("Failed to encode message")?;

        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", line).context("Failed to write message")?;
        Ok(())
    }
}
