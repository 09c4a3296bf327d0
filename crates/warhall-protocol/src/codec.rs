//! Tolerant codec for persisted override maps and ad-hoc unit lists.
//!
//! The server is the source of truth and is allowed to hold slightly
//! different shapes across versions, so decoding never fails: malformed
//! entries are silently dropped and numeric fields are clamped into range.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ids::UnitKey;
use crate::types::{
    CustomUnitPayload, PrebattleUnit, SingleUseItem, StatPatch, UnitKind, UnitOverride, UnitStats,
    ARMOUR_SAVE_FIELD, ARMOUR_SAVE_MAX_LEN, STAT_FIELDS, STAT_MAX, STAT_MIN,
};

fn coerce_i64(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)
            }
        }
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64),
        _ => None,
    }
}

/// Coerce a raw value to an integer stat, clamped to [0, 10].
/// Non-finite and non-numeric input becomes 0.
pub fn to_numeric_stat(raw: &Value) -> i64 {
    coerce_i64(raw).unwrap_or(0).clamp(STAT_MIN, STAT_MAX)
}

/// Coerce a raw value to a trimmed armour-save string, capped at 20 chars.
pub fn to_armour_save(raw: &Value) -> String {
    raw.as_str()
        .map(|s| s.trim().chars().take(ARMOUR_SAVE_MAX_LEN).collect())
        .unwrap_or_default()
}

/// Coerce a raw value to a unit rating, clamped to [0, 9999].
pub fn to_unit_rating(raw: &Value) -> i64 {
    coerce_i64(raw).unwrap_or(0).clamp(0, 9999)
}

fn stats_source(entry: &Value) -> &Value {
    // Current servers nest the patch under "stats"; older ones kept the
    // stat keys flat on the entry.
    match entry.get("stats") {
        Some(nested) if nested.is_object() => nested,
        _ => entry,
    }
}

/// Decode a persisted per-unit override map. Only known stat fields are
/// kept; entries that yield no stats and a blank reason are dropped.
pub fn normalize_overrides(raw: &Value) -> BTreeMap<UnitKey, UnitOverride> {
    let mut out = BTreeMap::new();
    let Some(map) = raw.as_object() else {
        return out;
    };

    for (key, entry) in map {
        if key.trim().is_empty() || !entry.is_object() {
            continue;
        }
        let reason = entry
            .get("reason")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let mut patch = StatPatch::default();
        let source = stats_source(entry);
        for field in STAT_FIELDS {
            if let Some(value) = source.get(field) {
                patch.set(field, Some(to_numeric_stat(value)));
            }
        }
        if let Some(value) = source.get(ARMOUR_SAVE_FIELD) {
            let save = to_armour_save(value);
            if !save.is_empty() {
                patch.armour_save = Some(save);
            }
        }

        let over = UnitOverride {
            reason,
            stats: patch,
        };
        if !over.is_empty() {
            out.insert(UnitKey::new(key.clone()), over);
        }
    }
    out
}

/// Decode a full stat block, clamping every field into range. Missing or
/// non-object input yields all zeroes.
pub fn normalize_stats(raw: &Value) -> UnitStats {
    let mut stats = UnitStats::default();
    if !raw.is_object() {
        return stats;
    }
    let obj = raw;
    stats.movement = obj.get("movement").map(to_numeric_stat).unwrap_or(0);
    stats.weapon_skill = obj.get("weapon_skill").map(to_numeric_stat).unwrap_or(0);
    stats.ballistic_skill = obj.get("ballistic_skill").map(to_numeric_stat).unwrap_or(0);
    stats.strength = obj.get("strength").map(to_numeric_stat).unwrap_or(0);
    stats.toughness = obj.get("toughness").map(to_numeric_stat).unwrap_or(0);
    stats.wounds = obj.get("wounds").map(to_numeric_stat).unwrap_or(0);
    stats.initiative = obj.get("initiative").map(to_numeric_stat).unwrap_or(0);
    stats.attacks = obj.get("attacks").map(to_numeric_stat).unwrap_or(0);
    stats.leadership = obj.get("leadership").map(to_numeric_stat).unwrap_or(0);
    stats.armour_save = obj.get(ARMOUR_SAVE_FIELD).map(to_armour_save).unwrap_or_default();
    stats
}

fn normalize_items(raw: Option<&Value>) -> Vec<SingleUseItem> {
    let Some(list) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| {
            let id = coerce_i64(entry.get("id")?)?;
            let name = entry.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let quantity = entry
                .get("quantity")
                .and_then(Value::as_u64)
                .map(|q| q as u32)
                .filter(|&q| q >= 1)
                .unwrap_or(1);
            Some(SingleUseItem {
                id,
                name: name.to_string(),
                quantity,
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect()
}

/// Decode a persisted ad-hoc unit list. Only entries whose key carries the
/// `custom:` prefix and that have a non-empty name and unit type survive;
/// all other shape errors cause silent exclusion.
pub fn normalize_custom_units(raw: &Value) -> Vec<PrebattleUnit> {
    let Some(list) = raw.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| {
            let key = entry.get("key")?.as_str()?;
            let key = UnitKey::new(key);
            if key.kind() != Some(UnitKind::Custom) {
                return None;
            }
            let name = entry.get("name")?.as_str()?.trim();
            let unit_type = entry.get("unit_type")?.as_str()?.trim();
            if name.is_empty() || unit_type.is_empty() {
                return None;
            }
            let reason = entry
                .get("reason")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string);
            Some(PrebattleUnit {
                key,
                kind: UnitKind::Custom,
                name: name.to_string(),
                unit_type: unit_type.to_string(),
                stats: normalize_stats(entry.get("stats").unwrap_or(&Value::Null)),
                items: normalize_items(entry.get("items")),
                rating: entry.get("rating").map(to_unit_rating),
                custom_reason: reason,
            })
        })
        .collect()
}

/// Project ad-hoc units into the commit payload shape. Exact inverse of
/// [`normalize_custom_units`] for any value it itself produced.
pub fn serialize_custom_units(units: &[PrebattleUnit]) -> Vec<CustomUnitPayload> {
    units
        .iter()
        .filter(|u| u.kind == UnitKind::Custom)
        .map(|u| CustomUnitPayload {
            key: u.key.clone(),
            name: u.name.clone(),
            unit_type: u.unit_type.clone(),
            stats: u.stats.clone(),
            items: u.items.clone(),
            rating: u.rating,
            reason: u.custom_reason.clone().unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_stat_clamps_and_zeroes_garbage() {
        assert_eq!(to_numeric_stat(&json!(7)), 7);
        assert_eq!(to_numeric_stat(&json!(42)), 10);
        assert_eq!(to_numeric_stat(&json!(-3)), 0);
        assert_eq!(to_numeric_stat(&json!(4.9)), 4);
        assert_eq!(to_numeric_stat(&json!("6")), 6);
        assert_eq!(to_numeric_stat(&json!("bogus")), 0);
        assert_eq!(to_numeric_stat(&json!(null)), 0);
    }

    #[test]
    fn armour_save_trims_and_caps() {
        assert_eq!(to_armour_save(&json!("  5+ ")), "5+");
        assert_eq!(to_armour_save(&json!(6)), "");
        let long = "x".repeat(40);
        assert_eq!(to_armour_save(&json!(long)).len(), ARMOUR_SAVE_MAX_LEN);
    }

    #[test]
    fn unit_rating_clamps() {
        assert_eq!(to_unit_rating(&json!(150)), 150);
        assert_eq!(to_unit_rating(&json!(100000)), 9999);
        assert_eq!(to_unit_rating(&json!(-5)), 0);
    }

    #[test]
    fn overrides_keep_only_known_stat_fields() {
        let raw = json!({
            "hero:1": {
                "reason": "blessed",
                "stats": {"movement": 6, "luck": 99, "weapon_skill": "4"}
            }
        });
        let decoded = normalize_overrides(&raw);
        let over = decoded.get(&UnitKey::hero(1)).unwrap();
        assert_eq!(over.stats.movement, Some(6));
        assert_eq!(over.stats.weapon_skill, Some(4));
        assert_eq!(over.reason, "blessed");
    }

    #[test]
    fn overrides_drop_entries_with_nothing_in_them() {
        let raw = json!({
            "hero:1": {"reason": "   ", "stats": {}},
            "hero:2": {"reason": "wounded"},
            "hero:3": 12
        });
        let decoded = normalize_overrides(&raw);
        assert!(!decoded.contains_key(&UnitKey::hero(1)));
        assert!(decoded.contains_key(&UnitKey::hero(2)));
        assert!(!decoded.contains_key(&UnitKey::hero(3)));
    }

    #[test]
    fn overrides_accept_flat_legacy_shape() {
        let raw = json!({"henchman:2:1": {"reason": "injured", "toughness": 2}});
        let decoded = normalize_overrides(&raw);
        let over = decoded.get(&UnitKey::henchman(2, 1)).unwrap();
        assert_eq!(over.stats.toughness, Some(2));
    }

    #[test]
    fn custom_units_require_prefix_name_and_type() {
        let raw = json!([
            {"key": "custom:ab", "name": "Ogre", "unit_type": "Mercenary"},
            {"key": "hero:1", "name": "Not custom", "unit_type": "Hero"},
            {"key": "custom:cd", "name": "  ", "unit_type": "Mercenary"},
            {"key": "custom:ef", "name": "Ghoul"},
            "garbage"
        ]);
        let decoded = normalize_custom_units(&raw);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "Ogre");
        assert_eq!(decoded[0].kind, UnitKind::Custom);
    }

    #[test]
    fn custom_units_round_trip_through_serialization() {
        let unit = PrebattleUnit {
            key: UnitKey::custom("a1b2"),
            kind: UnitKind::Custom,
            name: "Pit Fighter".to_string(),
            unit_type: "Hired Sword".to_string(),
            stats: UnitStats {
                movement: 4,
                weapon_skill: 4,
                strength: 4,
                toughness: 4,
                wounds: 2,
                initiative: 4,
                attacks: 2,
                leadership: 8,
                armour_save: "5+".to_string(),
                ..UnitStats::default()
            },
            items: vec![SingleUseItem {
                id: 3,
                name: "Dark Venom".to_string(),
                quantity: 1,
                description: String::new(),
            }],
            rating: Some(25),
            custom_reason: Some("guest fighter".to_string()),
        };

        let wire = serialize_custom_units(std::slice::from_ref(&unit));
        let raw = serde_json::to_value(&wire).unwrap();
        let decoded = normalize_custom_units(&raw);
        assert_eq!(decoded, vec![unit]);
    }

    #[test]
    fn malformed_items_are_dropped_silently() {
        let raw = json!([{
            "key": "custom:zz",
            "name": "Bearer",
            "unit_type": "Porter",
            "items": [
                {"id": 1, "name": "Firebomb"},
                {"id": 1, "name": ""},
                {"name": "No id"},
                {"id": 2, "name": "Net", "quantity": 3}
            ]
        }]);
        let decoded = normalize_custom_units(&raw);
        let items = &decoded[0].items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].quantity, 1);
        assert_eq!(items[1].quantity, 3);
    }
}
