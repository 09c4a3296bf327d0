//! Readiness and transition gate.
//!
//! Pure predicates over the config payload and the last known snapshot; the
//! session state machine consults these before it lets a command out.

use thiserror::Error;

use warhall_protocol::{
    BattleSnapshot, BattleStatus, ConfigPayload, ParticipantStatus, UnitKey, UserId,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("no units selected")]
    NoUnitsSelected,
    #[error("none of the selected units is currently available")]
    NoAvailableUnitsSelected,
    #[error("override for {unit} changes stats but gives no reason")]
    OverrideMissingReason { unit: UnitKey },
    #[error("only the battle creator may do this")]
    NotCreator,
    #[error("not all participants are ready")]
    NotAllReady,
    #[error("invalid battle transition: {from:?} -> {to:?}")]
    InvalidTransition { from: BattleStatus, to: BattleStatus },
}

/// A participant may only declare ready with at least one currently
/// available unit selected and a reason on every override that actually
/// changes stats. Units that went unavailable after being selected do not
/// count towards the selection.
pub fn validate_ready(config: &ConfigPayload, available: &[UnitKey]) -> Result<(), GateError> {
    if config.selected_unit_keys.is_empty() {
        return Err(GateError::NoUnitsSelected);
    }
    if !config
        .selected_unit_keys
        .iter()
        .any(|k| available.contains(k))
    {
        return Err(GateError::NoAvailableUnitsSelected);
    }
    for (key, over) in &config.stat_overrides {
        if over.has_stat_changes() && over.reason.trim().is_empty() {
            return Err(GateError::OverrideMissingReason { unit: key.clone() });
        }
    }
    Ok(())
}

/// Participants who withdrew do not block the start; everyone else must have
/// declared ready.
pub fn all_ready(snapshot: &BattleSnapshot) -> bool {
    snapshot
        .participants
        .iter()
        .filter(|p| p.status != ParticipantStatus::CanceledPrebattle)
        .all(|p| p.status == ParticipantStatus::Ready)
}

/// Starting the battle is the creator's call, and only once the whole table
/// is ready.
pub fn validate_start(snapshot: &BattleSnapshot, user: UserId) -> Result<(), GateError> {
    if !snapshot.is_creator(user) {
        return Err(GateError::NotCreator);
    }
    can_transition(snapshot.battle.status, BattleStatus::Active, true)?;
    if !all_ready(snapshot) {
        return Err(GateError::NotAllReady);
    }
    Ok(())
}

/// The battle lifecycle table. One place, consulted by every dispatch path.
pub fn can_transition(
    from: BattleStatus,
    to: BattleStatus,
    is_creator: bool,
) -> Result<(), GateError> {
    use BattleStatus::*;
    let allowed = match (from, to) {
        (Inviting, Prebattle) => true,
        (Prebattle, Active) => is_creator,
        (Active, Postbattle) => true,
        (Postbattle, Ended) => true,
        (Inviting, Canceled) | (Prebattle, Canceled) => is_creator,
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(GateError::InvalidTransition { from, to })
    }
}
