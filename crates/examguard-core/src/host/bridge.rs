use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::channel::{is_invoke_channel, is_send_channel, HostNotice};

/// What travels from the bridge to the host task.
#[derive(Debug)]
pub enum HostMessage {
    Invoke {
        channel: String,
        payload: Value,
        reply: oneshot::Sender<Value>,
    },
    Send {
        channel: String,
        payload: Value,
    },
}

/// UI-side handle to the host process.
///
/// Channel names are checked against the allow-lists before anything is
/// sent; the host checks again on receipt. Nothing here returns an error:
/// a refused or undeliverable message is `None` (invoke) or dropped (send).
#[derive(Clone)]
pub struct HostBridge {
    tx: mpsc::Sender<HostMessage>,
}

impl HostBridge {
    pub fn new(tx: mpsc::Sender<HostMessage>) -> Self {
        Self { tx }
    }

    pub async fn invoke(&self, channel: &str, payload: Value) -> Option<Value> {
        if !is_invoke_channel(channel) {
            debug!(channel = channel, "Dropping invoke on unlisted channel");
            return None;
        }

        let (reply, rx) = oneshot::channel();
        let message = HostMessage::Invoke {
            channel: channel.to_string(),
            payload,
            reply,
        };
        if self.tx.send(message).await.is_err() {
            warn!(channel = channel, "Host channel closed");
            return None;
        }
        match rx.await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(channel = channel, "Host dropped the reply");
                None
            }
        }
    }

    pub fn send(&self, channel: &str, payload: Value) {
        if !is_send_channel(channel) {
            debug!(channel = channel, "Dropping send on unlisted channel");
            return;
        }
        let message = HostMessage::Send {
            channel: channel.to_string(),
            payload,
        };
        if let Err(e) = self.tx.try_send(message) {
            warn!(channel = channel, error = %e, "Host notice not delivered");
        }
    }

    pub fn notify(&self, notice: &HostNotice) {
        self.send(notice.channel(), notice.payload());
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn tx_for_tests(&self) -> &mpsc::Sender<HostMessage> {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unlisted_channels_never_leave() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = HostBridge::new(tx);

        assert!(bridge.invoke("shell:exec", json!({})).await.is_none());
        bridge.send("auth:login", json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = HostBridge::new(tx);

        tokio::spawn(async move {
            if let Some(HostMessage::Invoke { channel, reply, .. }) = rx.recv().await {
                let _ = reply.send(json!({ "channel": channel }));
            }
        });

        let reply = bridge.invoke("get-guard-status", json!({})).await.unwrap();
        assert_eq!(reply["channel"], "get-guard-status");
    }

    #[tokio::test]
    async fn test_closed_host_gives_none() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let bridge = HostBridge::new(tx);
        assert!(bridge.is_closed());
        assert!(bridge.invoke("get-guard-status", json!({})).await.is_none());
        bridge.notify(&HostNotice::UserActivity);
    }
}
