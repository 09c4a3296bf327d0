//! Roster normalization: the campaign server's warband payload flattened
//! into the uniform unit list the prebattle screen works with.

use serde::Deserialize;
use serde_json::Value;

use warhall_protocol::codec::{normalize_stats, to_unit_rating};
use warhall_protocol::{PrebattleUnit, SingleUseItem, UnitKey, UnitKind};

/// Warband payload as the campaign server returns it. Every collection is
/// optional; an empty warband is a valid (if useless) roster.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawWarband {
    #[serde(default)]
    pub heroes: Vec<RawHero>,
    #[serde(default)]
    pub hired_swords: Vec<RawHiredSword>,
    #[serde(default)]
    pub henchman_groups: Vec<RawHenchmanGroup>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawHero {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_type: String,
    #[serde(default)]
    pub stats: Value,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub rating: Value,
    #[serde(default = "default_available")]
    pub available: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawHiredSword {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_type: String,
    #[serde(default)]
    pub stats: Value,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub rating: Value,
    #[serde(default = "default_available")]
    pub available: bool,
}

/// Henchmen share a stat line per group; members are the individual models.
#[derive(Clone, Debug, Deserialize)]
pub struct RawHenchmanGroup {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_type: String,
    #[serde(default)]
    pub stats: Value,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub rating: Value,
    #[serde(default)]
    pub members: Vec<RawHenchmanMember>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawHenchmanMember {
    pub id: i64,
    #[serde(default = "default_available")]
    pub available: bool,
}

/// Inventory entry. Only `single_use` items survive normalization; everything
/// else is permanent equipment the engine has no business tracking.
#[derive(Clone, Debug, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub single_use: bool,
    #[serde(default)]
    pub description: String,
}

fn default_available() -> bool {
    true
}

fn default_quantity() -> u32 {
    1
}

/// Uniform view over one participant's fieldable units.
#[derive(Clone, Debug, Default)]
pub struct ParticipantRoster {
    units: Vec<PrebattleUnit>,
    unavailable: Vec<UnitKey>,
}

impl ParticipantRoster {
    pub fn units(&self) -> &[PrebattleUnit] {
        &self.units
    }

    pub fn unit(&self, key: &UnitKey) -> Option<&PrebattleUnit> {
        self.units.iter().find(|u| &u.key == key)
    }

    pub fn contains(&self, key: &UnitKey) -> bool {
        self.unit(key).is_some()
    }

    /// Keys of every available unit, in roster order. This is the default
    /// selection for a participant who has not edited anything yet.
    pub fn available_keys(&self) -> Vec<UnitKey> {
        self.units
            .iter()
            .map(|u| u.key.clone())
            .filter(|k| !self.unavailable.contains(k))
            .collect()
    }

    pub fn is_available(&self, key: &UnitKey) -> bool {
        self.contains(key) && !self.unavailable.contains(key)
    }
}

/// Flatten a raw warband into the uniform roster. Heroes first, then hired
/// swords, then henchmen group by group, matching the screen's display order.
pub fn normalize_warband(raw: &RawWarband) -> ParticipantRoster {
    let mut units = Vec::new();
    let mut unavailable = Vec::new();

    for hero in &raw.heroes {
        let key = UnitKey::hero(hero.id);
        if !hero.available {
            unavailable.push(key.clone());
        }
        units.push(PrebattleUnit {
            key,
            kind: UnitKind::Hero,
            name: hero.name.trim().to_string(),
            unit_type: hero.unit_type.trim().to_string(),
            stats: normalize_stats(&hero.stats),
            items: normalize_item_list(&hero.items),
            rating: optional_rating(&hero.rating),
            custom_reason: None,
        });
    }

    for sword in &raw.hired_swords {
        let key = UnitKey::hired_sword(sword.id);
        if !sword.available {
            unavailable.push(key.clone());
        }
        units.push(PrebattleUnit {
            key,
            kind: UnitKind::HiredSword,
            name: sword.name.trim().to_string(),
            unit_type: sword.unit_type.trim().to_string(),
            stats: normalize_stats(&sword.stats),
            items: normalize_item_list(&sword.items),
            rating: optional_rating(&sword.rating),
            custom_reason: None,
        });
    }

    for group in &raw.henchman_groups {
        let stats = normalize_stats(&group.stats);
        let items = normalize_item_list(&group.items);
        let rating = optional_rating(&group.rating);
        for (ordinal, member) in group.members.iter().enumerate() {
            let key = UnitKey::henchman(group.id, member.id);
            if !member.available {
                unavailable.push(key.clone());
            }
            units.push(PrebattleUnit {
                key,
                kind: UnitKind::Henchman,
                name: format!("{} {}", group.name.trim(), ordinal + 1),
                unit_type: group.unit_type.trim().to_string(),
                stats: stats.clone(),
                items: items.clone(),
                rating,
                custom_reason: None,
            });
        }
    }

    ParticipantRoster { units, unavailable }
}

/// Keep single-use items only, merge duplicates by (id, name) summing their
/// quantities, and sort by name so the list is stable across fetches.
fn normalize_item_list(raw: &[RawItem]) -> Vec<SingleUseItem> {
    let mut merged: Vec<SingleUseItem> = Vec::new();

    for item in raw {
        if !item.single_use {
            continue;
        }
        let name = item.name.trim();
        if name.is_empty() {
            continue;
        }
        let Some(id) = item.id.as_i64().or_else(|| {
            item.id
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        }) else {
            continue;
        };
        let quantity = item.quantity.max(1);

        if let Some(existing) = merged.iter_mut().find(|m| m.id == id && m.name == name) {
            existing.quantity += quantity;
        } else {
            merged.push(SingleUseItem {
                id,
                name: name.to_string(),
                quantity,
                description: item.description.clone(),
            });
        }
    }

    merged.sort_by(|a, b| a.name.cmp(&b.name));
    merged
}

fn optional_rating(raw: &Value) -> Option<i64> {
    if raw.is_null() {
        None
    } else {
        Some(to_unit_rating(raw))
    }
}
