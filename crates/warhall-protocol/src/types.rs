use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::UnitKey;

/// Lifecycle of a battle session, owned exclusively by the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Inviting,
    Prebattle,
    Active,
    Postbattle,
    Ended,
    Canceled,
}

impl BattleStatus {
    /// Whether participants may still edit configuration and readiness.
    pub fn is_prebattle(self) -> bool {
        self == BattleStatus::Prebattle
    }
}

/// Lifecycle of one combat side within a battle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Invited,
    Accepted,
    JoinedPrebattle,
    Ready,
    CanceledPrebattle,
    Fighting,
    AwaitingConfirm,
    Done,
}

/// Kind of a prebattle unit. Ad-hoc `Custom` units are created client-side
/// and have no server identity until committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Hero,
    HiredSword,
    Henchman,
    Custom,
}

impl UnitKind {
    pub fn prefix(self) -> &'static str {
        match self {
            UnitKind::Hero => "hero",
            UnitKind::HiredSword => "hired_sword",
            UnitKind::Henchman => "henchman",
            UnitKind::Custom => "custom",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "hero" => Some(UnitKind::Hero),
            "hired_sword" => Some(UnitKind::HiredSword),
            "henchman" => Some(UnitKind::Henchman),
            "custom" => Some(UnitKind::Custom),
            _ => None,
        }
    }
}

/// The nine integer stat fields, in display order. Override patches may only
/// carry keys from this set (plus the armour save).
pub const STAT_FIELDS: [&str; 9] = [
    "movement",
    "weapon_skill",
    "ballistic_skill",
    "strength",
    "toughness",
    "wounds",
    "initiative",
    "attacks",
    "leadership",
];

/// Free-text armour save, overridable like a stat but not numeric.
pub const ARMOUR_SAVE_FIELD: &str = "armour_save";

pub const STAT_MIN: i64 = 0;
pub const STAT_MAX: i64 = 10;
pub const ARMOUR_SAVE_MAX_LEN: usize = 20;

/// Full stat block for a unit. All nine attributes are clamped to
/// [`STAT_MIN`, `STAT_MAX`] at decode time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStats {
    #[serde(default)]
    pub movement: i64,
    #[serde(default)]
    pub weapon_skill: i64,
    #[serde(default)]
    pub ballistic_skill: i64,
    #[serde(default)]
    pub strength: i64,
    #[serde(default)]
    pub toughness: i64,
    #[serde(default)]
    pub wounds: i64,
    #[serde(default)]
    pub initiative: i64,
    #[serde(default)]
    pub attacks: i64,
    #[serde(default)]
    pub leadership: i64,
    #[serde(default)]
    pub armour_save: String,
}

impl UnitStats {
    pub fn get(&self, field: &str) -> Option<i64> {
        match field {
            "movement" => Some(self.movement),
            "weapon_skill" => Some(self.weapon_skill),
            "ballistic_skill" => Some(self.ballistic_skill),
            "strength" => Some(self.strength),
            "toughness" => Some(self.toughness),
            "wounds" => Some(self.wounds),
            "initiative" => Some(self.initiative),
            "attacks" => Some(self.attacks),
            "leadership" => Some(self.leadership),
            _ => None,
        }
    }
}

/// Sparse patch over [`UnitStats`]. Absent fields mean "no change"; the
/// patch is a delta, never an echo of base values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weapon_skill: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballistic_skill: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toughness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wounds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attacks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leadership: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armour_save: Option<String>,
}

impl StatPatch {
    pub fn is_empty(&self) -> bool {
        self.movement.is_none()
            && self.weapon_skill.is_none()
            && self.ballistic_skill.is_none()
            && self.strength.is_none()
            && self.toughness.is_none()
            && self.wounds.is_none()
            && self.initiative.is_none()
            && self.attacks.is_none()
            && self.leadership.is_none()
            && self.armour_save.is_none()
    }

    pub fn get(&self, field: &str) -> Option<i64> {
        match field {
            "movement" => self.movement,
            "weapon_skill" => self.weapon_skill,
            "ballistic_skill" => self.ballistic_skill,
            "strength" => self.strength,
            "toughness" => self.toughness,
            "wounds" => self.wounds,
            "initiative" => self.initiative,
            "attacks" => self.attacks,
            "leadership" => self.leadership,
            _ => None,
        }
    }

    /// Set a numeric field by name. Returns false for unknown fields.
    pub fn set(&mut self, field: &str, value: Option<i64>) -> bool {
        let slot = match field {
            "movement" => &mut self.movement,
            "weapon_skill" => &mut self.weapon_skill,
            "ballistic_skill" => &mut self.ballistic_skill,
            "strength" => &mut self.strength,
            "toughness" => &mut self.toughness,
            "wounds" => &mut self.wounds,
            "initiative" => &mut self.initiative,
            "attacks" => &mut self.attacks,
            "leadership" => &mut self.leadership,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Base stats with this patch applied, for display.
    pub fn apply_to(&self, base: &UnitStats) -> UnitStats {
        UnitStats {
            movement: self.movement.unwrap_or(base.movement),
            weapon_skill: self.weapon_skill.unwrap_or(base.weapon_skill),
            ballistic_skill: self.ballistic_skill.unwrap_or(base.ballistic_skill),
            strength: self.strength.unwrap_or(base.strength),
            toughness: self.toughness.unwrap_or(base.toughness),
            wounds: self.wounds.unwrap_or(base.wounds),
            initiative: self.initiative.unwrap_or(base.initiative),
            attacks: self.attacks.unwrap_or(base.attacks),
            leadership: self.leadership.unwrap_or(base.leadership),
            armour_save: self
                .armour_save
                .clone()
                .unwrap_or_else(|| base.armour_save.clone()),
        }
    }
}

/// A reasoned, temporary stat delta for one unit in one battle.
///
/// Invariant: an override with a blank reason and an empty patch is
/// equivalent to absence and must be pruned, never persisted empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOverride {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub stats: StatPatch,
}

impl UnitOverride {
    pub fn is_empty(&self) -> bool {
        self.reason.trim().is_empty() && self.stats.is_empty()
    }

    pub fn has_stat_changes(&self) -> bool {
        !self.stats.is_empty()
    }
}

/// A consumable whose remaining uses are derived from event-log replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleUseItem {
    pub id: i64,
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub description: String,
}

/// A unit eligible for battle, in the uniform shape the prebattle screen
/// works with regardless of the unit's origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrebattleUnit {
    pub key: UnitKey,
    pub kind: UnitKind,
    pub name: String,
    pub unit_type: String,
    pub stats: UnitStats,
    #[serde(default)]
    pub items: Vec<SingleUseItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_reason: Option<String>,
}

/// Wire projection of an ad-hoc unit inside the config commit payload.
/// [`crate::codec::serialize_custom_units`] produces this shape and
/// [`crate::codec::normalize_custom_units`] accepts it back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomUnitPayload {
    pub key: UnitKey,
    pub name: String,
    pub unit_type: String,
    pub stats: UnitStats,
    #[serde(default)]
    pub items: Vec<SingleUseItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i64>,
    pub reason: String,
}

/// Canonical "replace whole config" commit payload.
///
/// Field order and collection ordering are deterministic (sorted keys) so
/// the stable hash in [`crate::wire::config_hash`] can guard redundant
/// commits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPayload {
    pub selected_unit_keys: Vec<UnitKey>,
    pub stat_overrides: BTreeMap<UnitKey, UnitOverride>,
    pub custom_units: Vec<CustomUnitPayload>,
}

impl ConfigPayload {
    /// Build a payload with deterministic ordering.
    pub fn new(
        mut selected_unit_keys: Vec<UnitKey>,
        stat_overrides: BTreeMap<UnitKey, UnitOverride>,
        mut custom_units: Vec<CustomUnitPayload>,
    ) -> Self {
        selected_unit_keys.sort();
        selected_unit_keys.dedup();
        custom_units.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            selected_unit_keys,
            stat_overrides,
            custom_units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_patch_set_and_get_by_field_name() {
        let mut patch = StatPatch::default();
        assert!(patch.is_empty());
        for field in STAT_FIELDS {
            assert!(patch.set(field, Some(4)), "field {field} should be known");
            assert_eq!(patch.get(field), Some(4));
        }
        assert!(!patch.set("bravery", Some(1)));
        assert!(!patch.is_empty());
    }

    #[test]
    fn patch_applies_over_base() {
        let base = UnitStats {
            movement: 4,
            weapon_skill: 3,
            armour_save: "5+".to_string(),
            ..UnitStats::default()
        };
        let patch = StatPatch {
            movement: Some(6),
            armour_save: Some("4+".to_string()),
            ..StatPatch::default()
        };
        let applied = patch.apply_to(&base);
        assert_eq!(applied.movement, 6);
        assert_eq!(applied.weapon_skill, 3);
        assert_eq!(applied.armour_save, "4+");
    }

    #[test]
    fn empty_override_is_equivalent_to_absence() {
        let over = UnitOverride {
            reason: "   ".to_string(),
            stats: StatPatch::default(),
        };
        assert!(over.is_empty());
        assert!(!over.has_stat_changes());
    }

    #[test]
    fn config_payload_orders_deterministically() {
        let payload = ConfigPayload::new(
            vec![UnitKey::hero(2), UnitKey::hero(1), UnitKey::hero(2)],
            BTreeMap::new(),
            vec![],
        );
        assert_eq!(
            payload.selected_unit_keys,
            vec![UnitKey::hero(1), UnitKey::hero(2)]
        );
    }
}
