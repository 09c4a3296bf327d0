//! Typed realtime bus.
//!
//! The application shell owns the socket; whatever transport it uses, frames
//! are decoded into [`PushMessage`]s and published on a broadcast channel
//! that each battle session subscribes to. Frames are triggers only: no state
//! ever travels this way, so a lossy channel degrades to staleness, not
//! corruption.

use tokio::sync::broadcast;
use tracing::warn;

use warhall_protocol::wire::{deserialize_push, WireError};
use warhall_protocol::PushMessage;

/// Something a session can subscribe to for push frames.
pub trait RealtimeBridge: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<PushMessage>;
}

/// In-process broadcast implementation.
pub struct ChannelBridge {
    tx: broadcast::Sender<PushMessage>,
}

impl ChannelBridge {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an already-typed message. Having no subscriber is fine.
    pub fn publish(&self, msg: PushMessage) {
        let _ = self.tx.send(msg);
    }

    /// Decode a raw socket frame and publish it. Undecodable frames are
    /// logged and dropped; the session recovers via explicit fetches.
    pub fn publish_frame(&self, frame: &[u8]) -> Result<(), WireError> {
        match deserialize_push(frame) {
            Ok(msg) => {
                self.publish(msg);
                Ok(())
            }
            Err(err) => {
                warn!(%err, len = frame.len(), "dropping undecodable push frame");
                Err(err)
            }
        }
    }
}

impl Default for ChannelBridge {
    fn default() -> Self {
        Self::new(64)
    }
}

impl RealtimeBridge for ChannelBridge {
    fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warhall_protocol::wire::serialize_push;
    use warhall_protocol::BattleId;

    #[tokio::test]
    async fn frames_reach_every_subscriber() {
        let bridge = ChannelBridge::new(8);
        let mut a = bridge.subscribe();
        let mut b = bridge.subscribe();

        let msg = PushMessage::BattleStateChanged {
            battle: BattleId(3),
        };
        let frame = serialize_push(&msg).unwrap();
        bridge.publish_frame(&frame).unwrap();

        assert_eq!(a.recv().await.unwrap(), msg);
        assert_eq!(b.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn garbage_frames_are_dropped_without_publishing() {
        let bridge = ChannelBridge::new(8);
        let mut rx = bridge.subscribe();
        assert!(bridge.publish_frame(&[0xc1, 0xff]).is_err());
        bridge.publish(PushMessage::BattleStateChanged {
            battle: BattleId(1),
        });
        // Only the typed message arrives.
        assert!(matches!(
            rx.recv().await.unwrap(),
            PushMessage::BattleStateChanged { .. }
        ));
    }
}
