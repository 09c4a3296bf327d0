//! Used-item tally, derived by replaying the battle event log.
//!
//! There is no stored counter anywhere: every answer is recomputed from the
//! log, so two clients holding the same snapshot always agree.

use warhall_protocol::{BattleEvent, EventKind, SingleUseItem, UnitKey};

/// Number of times `item_id` has been consumed by `unit_key` in this battle.
pub fn used_item_count(events: &[BattleEvent], unit_key: &UnitKey, item_id: i64) -> u32 {
    events
        .iter()
        .filter(|e| {
            matches!(
                &e.kind,
                EventKind::ItemUsed { unit_key: k, item_id: i }
                    if k == unit_key && *i == item_id
            )
        })
        .count() as u32
}

/// Remaining uses, floored at zero. The log may over-count when two clients
/// race an append; the display never goes negative.
pub fn remaining_uses(item: &SingleUseItem, used: u32) -> u32 {
    item.quantity.saturating_sub(used)
}

/// Whether `unit_key` can consume `item` given the current log.
pub fn can_use(events: &[BattleEvent], unit_key: &UnitKey, item: &SingleUseItem) -> bool {
    remaining_uses(item, used_item_count(events, unit_key, item.id)) > 0
}
