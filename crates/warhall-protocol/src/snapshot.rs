use serde::{Deserialize, Serialize};

use crate::event::BattleEvent;
use crate::ids::{BattleId, CampaignId, UnitKey, UserId, WarbandId};
use crate::types::{BattleStatus, ParticipantStatus};

/// Full battle state for sync. The client holds a read-only cached copy,
/// replaced wholesale on each successful fetch; there is no field-level merge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub battle: BattleSummary,
    pub participants: Vec<ParticipantSnapshot>,
    #[serde(default)]
    pub events: Vec<BattleEvent>,
}

impl BattleSnapshot {
    pub fn participant(&self, user: UserId) -> Option<&ParticipantSnapshot> {
        self.participants.iter().find(|p| p.user == user)
    }

    pub fn is_creator(&self, user: UserId) -> bool {
        self.battle.creator == user
    }
}

/// Server-authoritative battle aggregate header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BattleSummary {
    pub id: BattleId,
    pub campaign: CampaignId,
    pub status: BattleStatus,
    pub creator: UserId,
    #[serde(default)]
    pub scenario: Option<String>,
}

/// One combat side's persisted state as the server last saw it.
///
/// `stat_overrides` and `custom_units` arrive as raw JSON and are decoded
/// tolerantly via [`crate::codec`]; the server is allowed to hold slightly
/// different shapes across versions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub user: UserId,
    pub warband: WarbandId,
    #[serde(default)]
    pub warband_name: String,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub declared_rating: Option<i64>,
    #[serde(default)]
    pub selected_unit_keys: Vec<UnitKey>,
    #[serde(default)]
    pub stat_overrides: serde_json::Value,
    #[serde(default)]
    pub custom_units: serde_json::Value,
}

impl ParticipantSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == ParticipantStatus::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_fields_tolerate_absence() {
        let json = r#"{
            "battle": {"id": 1, "campaign": 2, "status": "prebattle", "creator": 10},
            "participants": [
                {"user": 10, "warband": 5, "status": "joined_prebattle"}
            ]
        }"#;
        let snapshot: BattleSnapshot = serde_json::from_str(json).unwrap();
        let p = snapshot.participant(UserId(10)).unwrap();
        assert!(p.selected_unit_keys.is_empty());
        assert!(p.stat_overrides.is_null());
        assert!(p.custom_units.is_null());
        assert!(snapshot.is_creator(UserId(10)));
        assert!(snapshot.events.is_empty());
    }
}
