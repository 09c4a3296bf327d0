//! Pure synchronization engine for the prebattle screen.
//!
//! No I/O lives here: the roster normalizer, the local edit store, the
//! readiness gate, the item tally and the session state machine all operate
//! on plain data. The client crate owns the transport and feeds results back
//! in as [`session::SessionInput`]s.

mod edit_store;
mod gate;
mod roster;
pub mod session;
mod tally;

pub use crate::edit_store::{EditError, LocalEditStore};
pub use crate::gate::{all_ready, can_transition, validate_ready, validate_start, GateError};
pub use crate::roster::{
    normalize_warband, ParticipantRoster, RawHenchmanGroup, RawHenchmanMember, RawHero,
    RawHiredSword, RawItem, RawWarband,
};
pub use crate::session::{
    ParticipantConfig, PrebattleSession, SessionEffect, SessionError, SessionInput, SessionNotice,
};
pub use crate::tally::{can_use, remaining_uses, used_item_count};
