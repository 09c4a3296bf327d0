//! Local edit store: the participant's uncommitted prebattle configuration.
//!
//! Holds selection, overrides and ad-hoc units between commits. The store is
//! seeded from the server snapshot once the roster is known, and `needs_commit`
//! compares stable hashes so a config that drifted back to its committed shape
//! costs no network write.

use rand::Rng;
use thiserror::Error;

use std::collections::BTreeMap;

use warhall_protocol::codec::{
    normalize_custom_units, normalize_overrides, serialize_custom_units, to_numeric_stat,
    to_unit_rating,
};
use warhall_protocol::wire::config_hash;
use warhall_protocol::{
    ConfigPayload, ParticipantSnapshot, PrebattleUnit, SingleUseItem, UnitKey, UnitKind,
    UnitOverride, UnitStats, ARMOUR_SAVE_MAX_LEN,
};

use crate::roster::ParticipantRoster;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("unknown unit: {0}")]
    UnknownUnit(UnitKey),
    #[error("unknown stat field: {0}")]
    UnknownField(String),
    #[error("a custom unit needs a name")]
    MissingName,
    #[error("a custom unit needs a unit type")]
    MissingUnitType,
    #[error("a custom unit needs a reason")]
    MissingReason,
    #[error("{0} is not a custom unit")]
    NotCustom(UnitKey),
}

#[derive(Clone, Debug)]
pub struct LocalEditStore {
    roster: ParticipantRoster,
    selected: Vec<UnitKey>,
    overrides: BTreeMap<UnitKey, UnitOverride>,
    custom_units: Vec<PrebattleUnit>,
    committed_hash: Option<u64>,
}

impl LocalEditStore {
    /// Seed the store from the roster and the participant's persisted state.
    ///
    /// A participant who never committed anything starts with every available
    /// unit selected; a persisted selection is kept but filtered down to keys
    /// that are still available (roster units flagged unavailable since the
    /// last commit are dropped, persisted ad-hoc units always count).
    pub fn initialize_from(roster: ParticipantRoster, persisted: &ParticipantSnapshot) -> Self {
        let custom_units = normalize_custom_units(&persisted.custom_units);
        let overrides = normalize_overrides(&persisted.stat_overrides);

        let selected = if persisted.selected_unit_keys.is_empty() {
            roster.available_keys()
        } else {
            persisted
                .selected_unit_keys
                .iter()
                .filter(|k| roster.is_available(k) || custom_units.iter().any(|u| u.key == **k))
                .cloned()
                .collect()
        };

        let mut store = Self {
            roster,
            selected,
            overrides,
            custom_units,
            committed_hash: None,
        };
        store.committed_hash = store.payload_hash();
        store
    }

    pub fn roster(&self) -> &ParticipantRoster {
        &self.roster
    }

    pub fn selected(&self) -> &[UnitKey] {
        &self.selected
    }

    pub fn is_selected(&self, key: &UnitKey) -> bool {
        self.selected.contains(key)
    }

    pub fn overrides(&self) -> &BTreeMap<UnitKey, UnitOverride> {
        &self.overrides
    }

    pub fn custom_units(&self) -> &[PrebattleUnit] {
        &self.custom_units
    }

    /// Keys the participant may actually field right now: available roster
    /// units plus their ad-hoc ones.
    pub fn available_keys(&self) -> Vec<UnitKey> {
        let mut keys = self.roster.available_keys();
        keys.extend(self.custom_units.iter().map(|u| u.key.clone()));
        keys
    }

    /// Every unit the participant can field: roster units plus ad-hoc ones.
    pub fn unit(&self, key: &UnitKey) -> Option<&PrebattleUnit> {
        self.roster
            .unit(key)
            .or_else(|| self.custom_units.iter().find(|u| &u.key == key))
    }

    /// Base stats with the unit's override applied, for display.
    pub fn effective_stats(&self, key: &UnitKey) -> Option<UnitStats> {
        let unit = self.unit(key)?;
        Some(match self.overrides.get(key) {
            Some(over) => over.stats.apply_to(&unit.stats),
            None => unit.stats.clone(),
        })
    }

    /// Flip a unit in or out of the selection. Returns the new state.
    pub fn toggle_unit_selection(&mut self, key: &UnitKey) -> Result<bool, EditError> {
        if self.unit(key).is_none() {
            return Err(EditError::UnknownUnit(key.clone()));
        }
        if let Some(pos) = self.selected.iter().position(|k| k == key) {
            self.selected.remove(pos);
            Ok(false)
        } else {
            self.selected.push(key.clone());
            Ok(true)
        }
    }

    /// Set (or clear, with `None`) one numeric stat in a unit's override.
    ///
    /// A value equal to the unit's base stat is stored as "no change", so
    /// overrides stay deltas instead of echoing the base line. An override
    /// reduced to nothing is pruned from the map.
    pub fn update_override_stat(
        &mut self,
        key: &UnitKey,
        field: &str,
        value: Option<i64>,
    ) -> Result<(), EditError> {
        let unit = self
            .unit(key)
            .ok_or_else(|| EditError::UnknownUnit(key.clone()))?;
        let base = unit
            .stats
            .get(field)
            .ok_or_else(|| EditError::UnknownField(field.to_string()))?;

        let value = value
            .map(|v| to_numeric_stat(&serde_json::json!(v)))
            .filter(|&v| v != base);

        let over = self.overrides.entry(key.clone()).or_default();
        over.stats.set(field, value);
        self.prune(key);
        Ok(())
    }

    /// Set (or clear) the armour-save text in a unit's override.
    pub fn update_override_armour_save(
        &mut self,
        key: &UnitKey,
        save: Option<&str>,
    ) -> Result<(), EditError> {
        let unit = self
            .unit(key)
            .ok_or_else(|| EditError::UnknownUnit(key.clone()))?;
        let base = unit.stats.armour_save.clone();

        let value = save
            .map(|s| s.trim().chars().take(ARMOUR_SAVE_MAX_LEN).collect::<String>())
            .filter(|s| !s.is_empty() && *s != base);

        let over = self.overrides.entry(key.clone()).or_default();
        over.stats.armour_save = value;
        self.prune(key);
        Ok(())
    }

    pub fn update_override_reason(&mut self, key: &UnitKey, reason: &str) -> Result<(), EditError> {
        if self.unit(key).is_none() {
            return Err(EditError::UnknownUnit(key.clone()));
        }
        let over = self.overrides.entry(key.clone()).or_default();
        over.reason = reason.trim().to_string();
        self.prune(key);
        Ok(())
    }

    pub fn clear_override(&mut self, key: &UnitKey) {
        self.overrides.remove(key);
    }

    fn prune(&mut self, key: &UnitKey) {
        if self.overrides.get(key).is_some_and(UnitOverride::is_empty) {
            self.overrides.remove(key);
        }
    }

    /// Create an ad-hoc unit. Name, type and reason are mandatory; the key
    /// gets a random suffix so two clients can never mint the same one, and
    /// the new unit joins the selection immediately.
    pub fn add_custom_unit(
        &mut self,
        name: &str,
        unit_type: &str,
        stats: UnitStats,
        items: Vec<SingleUseItem>,
        rating: Option<i64>,
        reason: &str,
    ) -> Result<UnitKey, EditError> {
        let name = name.trim();
        let unit_type = unit_type.trim();
        let reason = reason.trim();
        if name.is_empty() {
            return Err(EditError::MissingName);
        }
        if unit_type.is_empty() {
            return Err(EditError::MissingUnitType);
        }
        if reason.is_empty() {
            return Err(EditError::MissingReason);
        }

        let key = UnitKey::custom(&generate_key_suffix());
        self.custom_units.push(PrebattleUnit {
            key: key.clone(),
            kind: UnitKind::Custom,
            name: name.to_string(),
            unit_type: unit_type.to_string(),
            stats,
            items,
            rating: rating.map(|r| to_unit_rating(&serde_json::json!(r))),
            custom_reason: Some(reason.to_string()),
        });
        self.selected.push(key.clone());
        Ok(key)
    }

    /// Remove an ad-hoc unit along with its selection entry and override.
    pub fn remove_custom_unit(&mut self, key: &UnitKey) -> Result<(), EditError> {
        if !key.is_custom() {
            return Err(EditError::NotCustom(key.clone()));
        }
        let pos = self
            .custom_units
            .iter()
            .position(|u| &u.key == key)
            .ok_or_else(|| EditError::UnknownUnit(key.clone()))?;
        self.custom_units.remove(pos);
        self.selected.retain(|k| k != key);
        self.overrides.remove(key);
        Ok(())
    }

    /// The canonical commit payload for the current edits.
    pub fn config_payload(&self) -> ConfigPayload {
        ConfigPayload::new(
            self.selected.clone(),
            self.overrides.clone(),
            serialize_custom_units(&self.custom_units),
        )
    }

    /// Stable hash of the current payload. Captured alongside an outgoing
    /// commit so the acknowledgement can pin exactly what the server took.
    pub fn payload_hash(&self) -> Option<u64> {
        config_hash(&self.config_payload()).ok()
    }

    /// Whether a commit would change anything server-side. Hash comparison,
    /// so edit-and-undo sequences land back at "nothing to commit".
    pub fn needs_commit(&self) -> bool {
        match (self.payload_hash(), self.committed_hash) {
            (Some(current), Some(committed)) => current != committed,
            _ => true,
        }
    }

    /// Record what the server now holds. `hash` is the payload hash captured
    /// when the commit was sent, not the current one; edits made while the
    /// commit was in flight stay dirty.
    pub fn mark_committed(&mut self, hash: u64) {
        self.committed_hash = Some(hash);
    }
}

fn generate_key_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..36);
            if idx < 10 {
                (b'0' + idx) as char
            } else {
                (b'a' + idx - 10) as char
            }
        })
        .collect()
}
