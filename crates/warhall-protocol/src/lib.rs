//! Shared protocol types for the Warhall prebattle synchronization engine.
//!
//! Everything the server and the client agree on lives here: typed ids, the
//! battle/participant data model, the full-state snapshot shape, commands,
//! the append-only event log, realtime push frames, the tolerant override
//! codec and stable wire hashing.

pub mod codec;
pub mod command;
pub mod event;
pub mod ids;
pub mod snapshot;
pub mod types;
pub mod wire;

pub use codec::{
    normalize_custom_units, normalize_overrides, normalize_stats, serialize_custom_units,
    to_armour_save, to_numeric_stat, to_unit_rating,
};
pub use command::Command;
pub use event::{BattleEvent, EventKind, PushMessage};
pub use ids::{BattleId, CampaignId, EventId, UnitKey, UserId, WarbandId};
pub use snapshot::{BattleSnapshot, BattleSummary, ParticipantSnapshot};
pub use types::{
    BattleStatus, ConfigPayload, CustomUnitPayload, ParticipantStatus, PrebattleUnit,
    SingleUseItem, StatPatch, UnitKind, UnitOverride, UnitStats, ARMOUR_SAVE_FIELD,
    ARMOUR_SAVE_MAX_LEN, STAT_FIELDS, STAT_MAX, STAT_MIN,
};
pub use wire::WireError;
