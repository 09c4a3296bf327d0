//! Prebattle session state machine.
//!
//! Every user action and every transport result enters through
//! [`PrebattleSession::dispatch`], which mutates the session and returns the
//! I/O effects the caller must perform. The machine itself never touches the
//! network, which is what makes the whole flow testable as plain data.
//!
//! Fetches and commands carry monotonic sequence tokens; a response whose
//! token is not newer than the last applied one is stale and is dropped
//! instead of rolling the cached state backwards.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use warhall_protocol::codec::{normalize_custom_units, normalize_overrides};
use warhall_protocol::{
    BattleId, BattleSnapshot, BattleStatus, CampaignId, Command, EventKind, ParticipantSnapshot,
    ParticipantStatus, PrebattleUnit, PushMessage, SingleUseItem, UnitKey, UnitOverride,
    UnitStats, UserId, WarbandId,
};

use crate::edit_store::{EditError, LocalEditStore};
use crate::gate::{can_transition, validate_ready, validate_start, GateError};
use crate::roster::ParticipantRoster;
use crate::tally::can_use;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("battle state not loaded yet")]
    NoSnapshot,
    #[error("own roster not loaded yet")]
    RosterNotLoaded,
    #[error("user is not a participant of this battle")]
    NotParticipant,
    #[error("battle is not editable in status {0:?}")]
    NotEditable(BattleStatus),
    #[error("no uses left of item {item_id} on {unit}")]
    ItemExhausted { unit: UnitKey, item_id: i64 },
    #[error("session is closing")]
    Closed,
}

/// Everything that can happen to a session: user intents and transport
/// results alike.
#[derive(Clone, Debug)]
pub enum SessionInput {
    /// Ask for a state re-fetch (initial load, pull-to-refresh).
    Refresh,
    /// A realtime frame arrived on the push channel.
    PushReceived(PushMessage),
    /// A state fetch finished.
    SnapshotFetched { seq: u64, snapshot: BattleSnapshot },
    /// A state fetch failed.
    FetchFailed { seq: u64, message: String },
    /// A sent command was acknowledged with the new full state.
    CommandCompleted { seq: u64, snapshot: BattleSnapshot },
    /// A sent command was rejected or lost.
    CommandFailed { seq: u64, message: String },
    /// A roster load finished.
    RosterLoaded { user: UserId, roster: ParticipantRoster },
    /// A roster load failed.
    RosterFailed { user: UserId, message: String },
    /// The user opened another participant's detail pane.
    ViewParticipant(UserId),

    ToggleUnit(UnitKey),
    SetOverrideStat {
        key: UnitKey,
        field: String,
        value: Option<i64>,
    },
    SetOverrideArmourSave {
        key: UnitKey,
        save: Option<String>,
    },
    SetOverrideReason {
        key: UnitKey,
        reason: String,
    },
    ClearOverride(UnitKey),
    AddCustomUnit {
        name: String,
        unit_type: String,
        stats: UnitStats,
        items: Vec<SingleUseItem>,
        rating: Option<i64>,
        reason: String,
    },
    RemoveCustomUnit(UnitKey),

    CommitRequested,
    ReadyRequested(bool),
    AcceptRequested,
    StartRequested,
    CancelRequested,
    CancelBattleRequested,
    UseItemRequested { unit: UnitKey, item_id: i64 },
    DeclareWinnerRequested(WarbandId),
    ConfirmResultRequested,
    FinishRequested,

    /// The owner is tearing the session down.
    Closing,
}

/// I/O the caller must perform after a dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEffect {
    /// Fetch the full battle state; feed the result back as
    /// [`SessionInput::SnapshotFetched`] with the same token.
    FetchState { seq: u64 },
    /// Load a participant's warband roster.
    LoadRoster { user: UserId, warband: WarbandId },
    /// Send a command; feed the result back as
    /// [`SessionInput::CommandCompleted`] with the same token.
    Send { seq: u64, command: Command },
    /// Surface something to the user.
    Notify(SessionNotice),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionNotice {
    StatusChanged {
        from: BattleStatus,
        to: BattleStatus,
    },
    RosterLoadFailed {
        user: UserId,
        message: String,
    },
    SyncFailed {
        message: String,
    },
    InviteReceived {
        battle: BattleId,
        from: Option<UserId>,
    },
}

/// A commit on the wire: its sequence token and the hash of the payload it
/// carried, so acknowledgement marks exactly that payload as committed.
#[derive(Clone, Copy, Debug)]
struct PendingCommit {
    seq: u64,
    hash: Option<u64>,
}

/// A participant's configuration as the server last persisted it.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantConfig {
    pub selected_unit_keys: Vec<UnitKey>,
    pub overrides: BTreeMap<UnitKey, UnitOverride>,
    pub custom_units: Vec<PrebattleUnit>,
}

pub struct PrebattleSession {
    campaign: CampaignId,
    battle: BattleId,
    self_user: UserId,
    snapshot: Option<BattleSnapshot>,
    edit: Option<LocalEditStore>,
    rosters: HashMap<UserId, ParticipantRoster>,
    rosters_in_flight: HashSet<UserId>,
    viewed: Option<UserId>,
    next_seq: u64,
    applied_seq: u64,
    pending_commit: Option<PendingCommit>,
    auto_accept_sent: bool,
    exit_suppressed: bool,
    closed: bool,
}

impl PrebattleSession {
    pub fn new(campaign: CampaignId, battle: BattleId, self_user: UserId) -> Self {
        Self {
            campaign,
            battle,
            self_user,
            snapshot: None,
            edit: None,
            rosters: HashMap::new(),
            rosters_in_flight: HashSet::new(),
            viewed: None,
            next_seq: 0,
            applied_seq: 0,
            pending_commit: None,
            auto_accept_sent: false,
            exit_suppressed: false,
            closed: false,
        }
    }

    pub fn campaign(&self) -> CampaignId {
        self.campaign
    }

    pub fn battle(&self) -> BattleId {
        self.battle
    }

    pub fn snapshot(&self) -> Option<&BattleSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn store(&self) -> Option<&LocalEditStore> {
        self.edit.as_ref()
    }

    pub fn roster_of(&self, user: UserId) -> Option<&ParticipantRoster> {
        self.rosters.get(&user)
    }

    pub fn viewed(&self) -> Option<UserId> {
        self.viewed
    }

    /// The participant whose details are on screen: the explicitly viewed
    /// one if still present, else self, else the first participant.
    pub fn viewed_participant(&self) -> Option<&ParticipantSnapshot> {
        let snap = self.snapshot.as_ref()?;
        self.viewed
            .and_then(|user| snap.participant(user))
            .or_else(|| snap.participant(self.self_user))
            .or_else(|| snap.participants.first())
    }

    /// Read-only view of a participant's committed configuration, decoded
    /// from the latest snapshot's persisted fields. Never reflects local
    /// edits, not even for self; the edit store is the editable surface.
    pub fn persisted_config(&self, user: UserId) -> Option<ParticipantConfig> {
        let p = self.snapshot.as_ref()?.participant(user)?;
        Some(ParticipantConfig {
            selected_unit_keys: p.selected_unit_keys.clone(),
            overrides: normalize_overrides(&p.stat_overrides),
            custom_units: normalize_custom_units(&p.custom_units),
        })
    }

    /// Whether the teardown un-ready should be skipped: the battle already
    /// left prebattle, or we initiated the exit ourselves.
    pub fn exit_suppressed(&self) -> bool {
        self.exit_suppressed
    }

    /// Single dispatch point for the whole session.
    pub fn dispatch(
        &mut self,
        input: SessionInput,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        if self.closed && !matches!(input, SessionInput::Closing) {
            return Err(SessionError::Closed);
        }

        match input {
            SessionInput::Refresh => Ok(vec![self.fetch_effect()]),
            SessionInput::PushReceived(msg) => Ok(self.on_push(msg)),
            SessionInput::SnapshotFetched { seq, snapshot }
            | SessionInput::CommandCompleted { seq, snapshot } => {
                Ok(self.apply_snapshot(seq, snapshot))
            }
            SessionInput::FetchFailed { seq, message }
            | SessionInput::CommandFailed { seq, message } => {
                if self.pending_commit.is_some_and(|p| p.seq == seq) {
                    self.pending_commit = None;
                }
                Ok(vec![SessionEffect::Notify(SessionNotice::SyncFailed {
                    message,
                })])
            }
            SessionInput::RosterLoaded { user, roster } => Ok(self.on_roster(user, roster)),
            SessionInput::RosterFailed { user, message } => {
                self.rosters_in_flight.remove(&user);
                Ok(vec![SessionEffect::Notify(
                    SessionNotice::RosterLoadFailed { user, message },
                )])
            }
            SessionInput::ViewParticipant(user) => self.on_view(user),

            SessionInput::ToggleUnit(key) => {
                self.editable_store()?.toggle_unit_selection(&key)?;
                Ok(Vec::new())
            }
            SessionInput::SetOverrideStat { key, field, value } => {
                self.editable_store()?
                    .update_override_stat(&key, &field, value)?;
                Ok(Vec::new())
            }
            SessionInput::SetOverrideArmourSave { key, save } => {
                self.editable_store()?
                    .update_override_armour_save(&key, save.as_deref())?;
                Ok(Vec::new())
            }
            SessionInput::SetOverrideReason { key, reason } => {
                self.editable_store()?
                    .update_override_reason(&key, &reason)?;
                Ok(Vec::new())
            }
            SessionInput::ClearOverride(key) => {
                self.editable_store()?.clear_override(&key);
                Ok(Vec::new())
            }
            SessionInput::AddCustomUnit {
                name,
                unit_type,
                stats,
                items,
                rating,
                reason,
            } => {
                self.editable_store()?
                    .add_custom_unit(&name, &unit_type, stats, items, rating, &reason)?;
                Ok(Vec::new())
            }
            SessionInput::RemoveCustomUnit(key) => {
                self.editable_store()?.remove_custom_unit(&key)?;
                Ok(Vec::new())
            }

            SessionInput::CommitRequested => Ok(self.commit_effects()?),
            SessionInput::ReadyRequested(ready) => self.on_ready(ready),
            SessionInput::AcceptRequested => Ok(vec![self.send(Command::Join)]),
            SessionInput::StartRequested => self.on_start(),
            SessionInput::CancelRequested => {
                self.exit_suppressed = true;
                Ok(vec![self.send(Command::CancelParticipation)])
            }
            SessionInput::CancelBattleRequested => self.on_cancel_battle(),
            SessionInput::UseItemRequested { unit, item_id } => self.on_use_item(unit, item_id),
            SessionInput::DeclareWinnerRequested(warband) => {
                self.require_status(&[BattleStatus::Active, BattleStatus::Postbattle])?;
                Ok(vec![self.send(Command::DeclareWinner { warband })])
            }
            SessionInput::ConfirmResultRequested => {
                self.require_status(&[BattleStatus::Postbattle])?;
                Ok(vec![self.send(Command::ConfirmResult)])
            }
            SessionInput::FinishRequested => {
                self.require_status(&[BattleStatus::Postbattle])?;
                Ok(vec![self.send(Command::Finish)])
            }

            SessionInput::Closing => Ok(self.on_closing()),
        }
    }

    fn fetch_effect(&mut self) -> SessionEffect {
        self.next_seq += 1;
        SessionEffect::FetchState { seq: self.next_seq }
    }

    fn send(&mut self, command: Command) -> SessionEffect {
        self.next_seq += 1;
        SessionEffect::Send {
            seq: self.next_seq,
            command,
        }
    }

    fn on_push(&mut self, msg: PushMessage) -> Vec<SessionEffect> {
        match msg {
            PushMessage::BattleInvite { battle, from } if battle != self.battle => {
                vec![SessionEffect::Notify(SessionNotice::InviteReceived {
                    battle,
                    from,
                })]
            }
            _ if msg.battle() == Some(self.battle) => vec![self.fetch_effect()],
            // Frames for other battles and unknown frame types are not ours.
            _ => Vec::new(),
        }
    }

    /// Replace the cached state wholesale; stale tokens are dropped.
    fn apply_snapshot(&mut self, seq: u64, snapshot: BattleSnapshot) -> Vec<SessionEffect> {
        if seq <= self.applied_seq {
            debug!(seq, applied = self.applied_seq, "discarding stale state");
            return Vec::new();
        }
        self.applied_seq = seq;
        if self.pending_commit.is_some_and(|p| p.seq == seq) {
            let sent = self.pending_commit.take().and_then(|p| p.hash);
            if let (Some(edit), Some(hash)) = (self.edit.as_mut(), sent) {
                edit.mark_committed(hash);
            }
        }

        let old_status = self.snapshot.as_ref().map(|s| s.battle.status);
        let new_status = snapshot.battle.status;
        self.snapshot = Some(snapshot);

        let mut effects = Vec::new();

        if let Some(from) = old_status.filter(|&s| s != new_status) {
            if !new_status.is_prebattle() && new_status != BattleStatus::Inviting {
                // The battle moved on without us asking; leaving the screen
                // now must not knock anyone's readiness over.
                self.exit_suppressed = true;
            }
            effects.push(SessionEffect::Notify(SessionNotice::StatusChanged {
                from,
                to: new_status,
            }));
        }

        let me = self
            .snapshot
            .as_ref()
            .and_then(|s| s.participant(self.self_user))
            .map(|p| (p.status, p.warband));
        if let Some((status, warband)) = me {
            // Accepting an invite is the user's explicit call; only a
            // participant already persisted as "accepted" is moved into the
            // prebattle room automatically, and only once.
            let needs_join = status == ParticipantStatus::Accepted
                && new_status == BattleStatus::Prebattle;
            if needs_join && !self.auto_accept_sent {
                self.auto_accept_sent = true;
                effects.push(self.send(Command::Join));
            }
            // The own roster is needed in every phase; mid-battle item use
            // resolves against it too.
            if self.edit.is_none() && !self.rosters_in_flight.contains(&self.self_user) {
                self.rosters_in_flight.insert(self.self_user);
                effects.push(SessionEffect::LoadRoster {
                    user: self.self_user,
                    warband,
                });
            }
        }

        effects
    }

    fn on_roster(&mut self, user: UserId, roster: ParticipantRoster) -> Vec<SessionEffect> {
        self.rosters_in_flight.remove(&user);
        self.rosters.insert(user, roster.clone());
        if user == self.self_user && self.edit.is_none() {
            if let Some(me) = self
                .snapshot
                .as_ref()
                .and_then(|s| s.participant(self.self_user))
            {
                self.edit = Some(LocalEditStore::initialize_from(roster, me));
            }
        }
        Vec::new()
    }

    fn on_view(&mut self, user: UserId) -> Result<Vec<SessionEffect>, SessionError> {
        let snap = self.snapshot.as_ref().ok_or(SessionError::NoSnapshot)?;
        let participant = snap.participant(user).ok_or(SessionError::NotParticipant)?;
        let warband = participant.warband;
        self.viewed = Some(user);

        if !self.rosters.contains_key(&user) && !self.rosters_in_flight.contains(&user) {
            self.rosters_in_flight.insert(user);
            return Ok(vec![SessionEffect::LoadRoster { user, warband }]);
        }
        Ok(Vec::new())
    }

    fn editable_store(&mut self) -> Result<&mut LocalEditStore, SessionError> {
        let status = self
            .snapshot
            .as_ref()
            .ok_or(SessionError::NoSnapshot)?
            .battle
            .status;
        if !matches!(status, BattleStatus::Inviting | BattleStatus::Prebattle) {
            return Err(SessionError::NotEditable(status));
        }
        self.edit.as_mut().ok_or(SessionError::RosterNotLoaded)
    }

    /// A commit that would not change anything server-side sends nothing.
    fn commit_effects(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        let edit = self.edit.as_ref().ok_or(SessionError::RosterNotLoaded)?;
        if !edit.needs_commit() {
            return Ok(Vec::new());
        }
        let hash = edit.payload_hash();
        let config = edit.config_payload();
        let effect = self.send(Command::SubmitConfig { config });
        if let SessionEffect::Send { seq, .. } = effect {
            self.pending_commit = Some(PendingCommit { seq, hash });
        }
        Ok(vec![effect])
    }

    /// Readying up validates the config, commits any outstanding edits first
    /// and then flips the flag, in that order.
    fn on_ready(&mut self, ready: bool) -> Result<Vec<SessionEffect>, SessionError> {
        if !ready {
            return Ok(vec![self.send(Command::SetReady { ready: false })]);
        }
        let edit = self.edit.as_ref().ok_or(SessionError::RosterNotLoaded)?;
        validate_ready(&edit.config_payload(), &edit.available_keys())?;
        let mut effects = self.commit_effects()?;
        effects.push(self.send(Command::SetReady { ready: true }));
        Ok(effects)
    }

    fn on_start(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        let snap = self.snapshot.as_ref().ok_or(SessionError::NoSnapshot)?;
        validate_start(snap, self.self_user)?;
        // We are leaving prebattle on purpose; don't un-ready on teardown.
        self.exit_suppressed = true;
        Ok(vec![self.send(Command::Start)])
    }

    fn on_cancel_battle(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        let snap = self.snapshot.as_ref().ok_or(SessionError::NoSnapshot)?;
        if !snap.is_creator(self.self_user) {
            return Err(GateError::NotCreator.into());
        }
        can_transition(snap.battle.status, BattleStatus::Canceled, true)?;
        self.exit_suppressed = true;
        Ok(vec![self.send(Command::CancelBattle)])
    }

    fn on_use_item(
        &mut self,
        unit: UnitKey,
        item_id: i64,
    ) -> Result<Vec<SessionEffect>, SessionError> {
        let snap = self.snapshot.as_ref().ok_or(SessionError::NoSnapshot)?;
        let item = self
            .edit
            .as_ref()
            .and_then(|e| e.unit(&unit))
            .and_then(|u| u.items.iter().find(|i| i.id == item_id))
            .cloned()
            .ok_or_else(|| EditError::UnknownUnit(unit.clone()))?;

        if !can_use(&snap.events, &unit, &item) {
            return Err(SessionError::ItemExhausted { unit, item_id });
        }
        Ok(vec![self.send(Command::AppendEvent {
            event: EventKind::ItemUsed {
                unit_key: unit,
                item_id,
            },
        })])
    }

    fn require_status(&self, allowed: &[BattleStatus]) -> Result<(), SessionError> {
        let status = self
            .snapshot
            .as_ref()
            .ok_or(SessionError::NoSnapshot)?
            .battle
            .status;
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(SessionError::NotEditable(status))
        }
    }

    /// Teardown: best-effort un-ready, unless the exit latch says the battle
    /// already moved on (or we moved it on ourselves).
    fn on_closing(&mut self) -> Vec<SessionEffect> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;

        let should_unready = !self.exit_suppressed
            && self
                .snapshot
                .as_ref()
                .is_some_and(|s| {
                    s.battle.status.is_prebattle()
                        && s.participant(self.self_user).is_some_and(|p| p.is_ready())
                });
        if should_unready {
            vec![self.send(Command::SetReady { ready: false })]
        } else {
            Vec::new()
        }
    }
}
