use serde::{Deserialize, Serialize};

use crate::ids::{BattleId, EventId, UnitKey, UserId};

/// One entry in a battle's append-only event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BattleEvent {
    pub id: EventId,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads, wire shape `{type, payload}`.
///
/// Decoding is tolerant: unrecognized event types collapse to `Unknown`
/// instead of failing the whole snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    /// A single-use item was consumed. Remaining uses are always derived by
    /// replaying these events, never stored as a counter.
    ItemUsed { unit_key: UnitKey, item_id: i64 },
    /// Free-text note attached to the battle log.
    Note { text: String },
    #[serde(other)]
    Unknown,
}

/// Realtime push frame delivered on the per-battle / per-user channel.
///
/// Payloads are never trusted as state; a frame only signals that a re-fetch
/// is due (and, for invites, carries enough to show a transient notice).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    BattlePrebattleOpened {
        battle: BattleId,
    },
    BattleStateChanged {
        battle: BattleId,
    },
    BattleInvite {
        battle: BattleId,
        #[serde(default)]
        from: Option<UserId>,
    },
    #[serde(other)]
    Unknown,
}

impl PushMessage {
    /// The battle this frame concerns, if it names one.
    pub fn battle(&self) -> Option<BattleId> {
        match self {
            PushMessage::BattlePrebattleOpened { battle }
            | PushMessage::BattleStateChanged { battle }
            | PushMessage::BattleInvite { battle, .. } => Some(*battle),
            PushMessage::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_used_event_wire_shape() {
        let event = BattleEvent {
            id: EventId(7),
            kind: EventKind::ItemUsed {
                unit_key: UnitKey::hero(1),
                item_id: 12,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "item_used");
        assert_eq!(json["payload"]["unit_key"], "hero:1");
        assert_eq!(json["payload"]["item_id"], 12);
    }

    #[test]
    fn unrecognized_event_type_decodes_to_unknown() {
        let json = r#"{"id": 3, "type": "warband_rated", "payload": {"x": 1}}"#;
        let event: BattleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
    }

    #[test]
    fn unrecognized_push_frame_decodes_to_unknown() {
        let json = r#"{"type": "campaign_renamed"}"#;
        let msg: PushMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg, PushMessage::Unknown);
        assert_eq!(msg.battle(), None);
    }
}
