//! Outbound UI notification channel.
//!
//! Engines report progress, metadata changes and failures here; the host UI
//! layer decides how to show them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use layersync_core::types::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    ClientAdd,
    ClientLog,
    ClientError,
    ClientMetadataUpdate,
    ClientIsLoading,
    ClientDoneLoading,
    ClientProgressMessage,
    ClientExpired,
    ClientChildren,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ClientAdd => "client-add",
            NotificationKind::ClientLog => "client-log",
            NotificationKind::ClientError => "client-error",
            NotificationKind::ClientMetadataUpdate => "client-metadata-update",
            NotificationKind::ClientIsLoading => "client-is-loading",
            NotificationKind::ClientDoneLoading => "client-done-loading",
            NotificationKind::ClientProgressMessage => "client-progress-message",
            NotificationKind::ClientExpired => "client-expired",
            NotificationKind::ClientChildren => "client-children",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub stream_id: StreamId,
    #[serde(default)]
    pub payload: Value,
}

impl Notification {
    pub fn new(kind: NotificationKind, stream_id: StreamId, payload: Value) -> Self {
        Self {
            kind,
            stream_id,
            payload,
        }
    }

    /// The `message` field of log, error and progress payloads.
    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::debug!("notification dropped, receiver gone: {}", e.0.kind);
        }
    }
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::ClientError => {
                tracing::warn!("[{}] {}: {}", notification.stream_id, notification.kind, notification.payload)
            }
            _ => tracing::info!("[{}] {}: {}", notification.stream_id, notification.kind, notification.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_serialize_as_their_wire_names() {
        let all = [
            NotificationKind::ClientAdd,
            NotificationKind::ClientLog,
            NotificationKind::ClientError,
            NotificationKind::ClientMetadataUpdate,
            NotificationKind::ClientIsLoading,
            NotificationKind::ClientDoneLoading,
            NotificationKind::ClientProgressMessage,
            NotificationKind::ClientExpired,
            NotificationKind::ClientChildren,
        ];
        for kind in all {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }

    #[test]
    fn channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let stream = StreamId::from("s1");
        notifier.notify(Notification::new(NotificationKind::ClientIsLoading, stream.clone(), json!({})));
        notifier.notify(Notification::new(
            NotificationKind::ClientLog,
            stream,
            json!({ "message": "Update Sent." }),
        ));
        assert_eq!(rx.try_recv().unwrap().kind, NotificationKind::ClientIsLoading);
        assert_eq!(rx.try_recv().unwrap().message(), Some("Update Sent."));
    }

    #[test]
    fn channel_notifier_survives_a_dropped_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notification::new(NotificationKind::ClientExpired, StreamId::from("s"), Value::Null));
    }
}
