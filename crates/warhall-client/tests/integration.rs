//! End-to-end session flows against an in-memory battle server double.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use warhall_client::api::{ApiError, BattleApi};
use warhall_client::bridge::ChannelBridge;
use warhall_client::driver::{spawn_session, SessionHandle, SessionView};
use warhall_core::session::SessionInput;
use warhall_core::RawWarband;
use warhall_protocol::{
    BattleEvent, BattleId, BattleSnapshot, BattleStatus, BattleSummary, CampaignId, ConfigPayload,
    EventId, EventKind, ParticipantSnapshot, ParticipantStatus, UnitKey, UserId, WarbandId,
};

const CAMPAIGN: CampaignId = CampaignId(1);
const BATTLE: BattleId = BattleId(7);
const CREATOR: UserId = UserId(10);
const GUEST: UserId = UserId(20);
const CREATOR_WARBAND: WarbandId = WarbandId(100);
const GUEST_WARBAND: WarbandId = WarbandId(200);

/// Shared server-side state, mutated by every client's api handle.
struct ServerState {
    snapshot: Mutex<BattleSnapshot>,
    warbands: Mutex<HashMap<WarbandId, RawWarband>>,
    /// Network writes per command name.
    writes: Mutex<HashMap<&'static str, u32>>,
    next_event: AtomicI64,
}

impl ServerState {
    fn new(status: BattleStatus, participants: Vec<ParticipantSnapshot>) -> Arc<Self> {
        let mut warbands = HashMap::new();
        warbands.insert(CREATOR_WARBAND, test_warband());
        warbands.insert(GUEST_WARBAND, test_warband());
        Arc::new(Self {
            snapshot: Mutex::new(BattleSnapshot {
                battle: BattleSummary {
                    id: BATTLE,
                    campaign: CAMPAIGN,
                    status,
                    creator: CREATOR,
                    scenario: None,
                },
                participants,
                events: Vec::new(),
            }),
            warbands: Mutex::new(warbands),
            writes: Mutex::new(HashMap::new()),
            next_event: AtomicI64::new(1),
        })
    }

    fn write_count(&self, name: &'static str) -> u32 {
        self.writes.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn count_write(&self, name: &'static str) {
        *self.writes.lock().unwrap().entry(name).or_insert(0) += 1;
    }

    fn current(&self) -> BattleSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    fn set_status(&self, status: BattleStatus) {
        self.snapshot.lock().unwrap().battle.status = status;
    }

    fn participant_status(&self, user: UserId) -> ParticipantStatus {
        self.snapshot
            .lock()
            .unwrap()
            .participants
            .iter()
            .find(|p| p.user == user)
            .map(|p| p.status)
            .expect("participant")
    }

    fn mutate_participant(&self, user: UserId, f: impl FnOnce(&mut ParticipantSnapshot)) {
        let mut snap = self.snapshot.lock().unwrap();
        if let Some(p) = snap.participants.iter_mut().find(|p| p.user == user) {
            f(p);
        }
    }
}

fn test_warband() -> RawWarband {
    serde_json::from_value(json!({
        "heroes": [
            {"id": 1, "name": "Ulrich", "unit_type": "Captain",
             "stats": {"movement": 4, "toughness": 3},
             "items": [{"id": 5, "name": "Firebomb", "single_use": true, "quantity": 1}]},
            {"id": 2, "name": "Grim", "unit_type": "Champion", "available": false}
        ]
    }))
    .unwrap()
}

fn participant(user: UserId, warband: WarbandId, status: ParticipantStatus) -> ParticipantSnapshot {
    ParticipantSnapshot {
        user,
        warband,
        warband_name: String::new(),
        status,
        declared_rating: None,
        selected_unit_keys: Vec::new(),
        stat_overrides: serde_json::Value::Null,
        custom_units: serde_json::Value::Null,
    }
}

/// One user's view of the fake server.
struct FakeApi {
    server: Arc<ServerState>,
    user: UserId,
}

#[async_trait]
impl BattleApi for FakeApi {
    async fn fetch_state(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
        _since_event_id: EventId,
    ) -> Result<BattleSnapshot, ApiError> {
        Ok(self.server.current())
    }

    async fn fetch_warband(
        &self,
        _campaign: CampaignId,
        warband: WarbandId,
    ) -> Result<RawWarband, ApiError> {
        self.server
            .warbands
            .lock()
            .unwrap()
            .get(&warband)
            .cloned()
            .ok_or(ApiError::Rejected {
                status: 404,
                message: "no such warband".to_string(),
            })
    }

    async fn join(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("join");
        self.server.mutate_participant(self.user, |p| {
            p.status = ParticipantStatus::JoinedPrebattle;
        });
        Ok(self.server.current())
    }

    async fn set_ready(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
        ready: bool,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("set_ready");
        self.server.mutate_participant(self.user, |p| {
            p.status = if ready {
                ParticipantStatus::Ready
            } else {
                ParticipantStatus::JoinedPrebattle
            };
        });
        Ok(self.server.current())
    }

    async fn cancel_participation(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("cancel_participation");
        self.server.mutate_participant(self.user, |p| {
            p.status = ParticipantStatus::CanceledPrebattle;
        });
        Ok(self.server.current())
    }

    async fn cancel_battle(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("cancel_battle");
        self.server.set_status(BattleStatus::Canceled);
        Ok(self.server.current())
    }

    async fn start(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("start");
        {
            let mut snap = self.server.snapshot.lock().unwrap();
            snap.battle.status = BattleStatus::Active;
            for p in &mut snap.participants {
                if p.status == ParticipantStatus::Ready {
                    p.status = ParticipantStatus::Fighting;
                }
            }
        }
        Ok(self.server.current())
    }

    async fn submit_config(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
        config: &ConfigPayload,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("submit_config");
        let selected = config.selected_unit_keys.clone();
        let overrides = serde_json::to_value(&config.stat_overrides).unwrap();
        let customs = serde_json::to_value(&config.custom_units).unwrap();
        self.server.mutate_participant(self.user, |p| {
            p.selected_unit_keys = selected;
            p.stat_overrides = overrides;
            p.custom_units = customs;
        });
        Ok(self.server.current())
    }

    async fn append_event(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
        event: &EventKind,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("append_event");
        let id = self.server.next_event.fetch_add(1, Ordering::SeqCst);
        self.server.snapshot.lock().unwrap().events.push(BattleEvent {
            id: EventId(id),
            kind: event.clone(),
        });
        Ok(self.server.current())
    }

    async fn declare_winner(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
        _warband: WarbandId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("declare_winner");
        self.server.set_status(BattleStatus::Postbattle);
        Ok(self.server.current())
    }

    async fn confirm_result(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("confirm_result");
        Ok(self.server.current())
    }

    async fn finish(
        &self,
        _campaign: CampaignId,
        _battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.server.count_write("finish");
        self.server.set_status(BattleStatus::Ended);
        Ok(self.server.current())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session_for(
    server: &Arc<ServerState>,
    bridge: &ChannelBridge,
    user: UserId,
) -> SessionHandle {
    init_tracing();
    let api: Arc<dyn BattleApi> = Arc::new(FakeApi {
        server: Arc::clone(server),
        user,
    });
    spawn_session(api, bridge, CAMPAIGN, BATTLE, user)
}

/// Wait until the view satisfies the predicate, failing after two seconds.
async fn wait_for(
    handle: &mut SessionHandle,
    what: &str,
    pred: impl Fn(&SessionView) -> bool,
) -> SessionView {
    let deadline = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let view = handle.view();
            if pred(&view) {
                return view;
            }
            if handle.changed().await.is_none() {
                panic!("session closed while waiting for {what}");
            }
        }
    });
    match deadline.await {
        Ok(view) => view,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

/// Wait for a server-side condition driven by a background teardown.
async fn wait_for_server(server: &Arc<ServerState>, what: &str, pred: impl Fn() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(2), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    if deadline.await.is_err() {
        panic!("timed out waiting for {what}");
    }
}

#[tokio::test]
async fn invited_guest_accepts_configures_and_readies_up() {
    let server = ServerState::new(
        BattleStatus::Prebattle,
        vec![
            participant(CREATOR, CREATOR_WARBAND, ParticipantStatus::JoinedPrebattle),
            participant(GUEST, GUEST_WARBAND, ParticipantStatus::Invited),
        ],
    );
    let bridge = ChannelBridge::default();
    let mut guest = session_for(&server, &bridge, GUEST);

    // The roster seeds the default selection while the invite is still
    // pending; nobody consents on the user's behalf.
    let view = wait_for(&mut guest, "roster seeded", |v| !v.selected.is_empty()).await;
    assert_eq!(view.selected, vec![UnitKey::hero(1)]);
    assert_eq!(server.write_count("join"), 0);
    assert_eq!(server.participant_status(GUEST), ParticipantStatus::Invited);

    // Accepting is the user's explicit step.
    guest.dispatch(SessionInput::AcceptRequested);
    wait_for(&mut guest, "guest joined", |v| {
        v.snapshot
            .as_ref()
            .and_then(|s| s.participant(GUEST))
            .is_some_and(|p| p.status == ParticipantStatus::JoinedPrebattle)
    })
    .await;
    assert_eq!(server.write_count("join"), 1);

    // A stat override without a reason blocks readying, with no network call.
    guest.dispatch(SessionInput::SetOverrideStat {
        key: UnitKey::hero(1),
        field: "movement".to_string(),
        value: Some(6),
    });
    guest.dispatch(SessionInput::ReadyRequested(true));
    let view = wait_for(&mut guest, "ready rejection", |v| {
        v.error_for("set_ready").is_some()
    })
    .await;
    assert!(view.error_for("set_ready").unwrap().contains("hero:1"));
    assert_eq!(server.write_count("set_ready"), 0);
    assert_eq!(server.write_count("submit_config"), 0);

    // With a reason, readying commits the config first and then flips ready.
    guest.dispatch(SessionInput::SetOverrideReason {
        key: UnitKey::hero(1),
        reason: "fleet of foot".to_string(),
    });
    guest.dispatch(SessionInput::ReadyRequested(true));
    wait_for(&mut guest, "guest ready", |v| {
        v.snapshot
            .as_ref()
            .and_then(|s| s.participant(GUEST))
            .is_some_and(|p| p.is_ready())
    })
    .await;
    assert_eq!(server.write_count("submit_config"), 1);
    assert_eq!(server.write_count("set_ready"), 1);
    assert_eq!(
        server.current().participant(GUEST).unwrap().selected_unit_keys,
        vec![UnitKey::hero(1)]
    );
}

#[tokio::test]
async fn redundant_commits_cost_no_network_writes() {
    let server = ServerState::new(
        BattleStatus::Prebattle,
        vec![participant(
            GUEST,
            GUEST_WARBAND,
            ParticipantStatus::JoinedPrebattle,
        )],
    );
    let bridge = ChannelBridge::default();
    let mut guest = session_for(&server, &bridge, GUEST);
    wait_for(&mut guest, "roster seeded", |v| !v.selected.is_empty()).await;

    // Untouched config: nothing to send.
    guest.dispatch(SessionInput::CommitRequested);
    // Edit and undo: hash lands back on the committed baseline.
    guest.dispatch(SessionInput::ToggleUnit(UnitKey::hero(1)));
    guest.dispatch(SessionInput::ToggleUnit(UnitKey::hero(1)));
    guest.dispatch(SessionInput::CommitRequested);
    wait_for(&mut guest, "clean config", |v| !v.needs_commit).await;
    assert_eq!(server.write_count("submit_config"), 0);

    // A real change commits exactly once.
    guest.dispatch(SessionInput::ToggleUnit(UnitKey::hero(1)));
    guest.dispatch(SessionInput::CommitRequested);
    wait_for(&mut guest, "commit applied", |v| !v.needs_commit && v.selected.is_empty()).await;
    guest.dispatch(SessionInput::CommitRequested);
    wait_for(&mut guest, "no re-commit", |v| !v.is_busy("submit_config")).await;
    assert_eq!(server.write_count("submit_config"), 1);
}

#[tokio::test]
async fn creator_starts_once_everyone_is_ready() {
    let server = ServerState::new(
        BattleStatus::Prebattle,
        vec![
            participant(CREATOR, CREATOR_WARBAND, ParticipantStatus::JoinedPrebattle),
            participant(GUEST, GUEST_WARBAND, ParticipantStatus::Ready),
        ],
    );
    let bridge = ChannelBridge::default();
    let mut creator = session_for(&server, &bridge, CREATOR);
    wait_for(&mut creator, "roster seeded", |v| !v.selected.is_empty()).await;

    // Not ready yet: the start gate names the problem, no network call.
    creator.dispatch(SessionInput::StartRequested);
    let view = wait_for(&mut creator, "start rejection", |v| {
        v.error_for("start").is_some()
    })
    .await;
    assert!(view.error_for("start").unwrap().contains("ready"));
    assert_eq!(server.write_count("start"), 0);

    creator.dispatch(SessionInput::ReadyRequested(true));
    wait_for(&mut creator, "creator ready", |v| {
        v.snapshot
            .as_ref()
            .and_then(|s| s.participant(CREATOR))
            .is_some_and(|p| p.is_ready())
    })
    .await;

    creator.dispatch(SessionInput::StartRequested);
    wait_for(&mut creator, "battle active", |v| {
        v.snapshot
            .as_ref()
            .is_some_and(|s| s.battle.status == BattleStatus::Active)
    })
    .await;
    assert_eq!(server.write_count("start"), 1);

    // The start was self-initiated: teardown must not un-ready anyone.
    let ready_writes = server.write_count("set_ready");
    drop(creator);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.write_count("set_ready"), ready_writes);
}

#[tokio::test]
async fn closing_a_ready_session_unreadies_best_effort() {
    let server = ServerState::new(
        BattleStatus::Prebattle,
        vec![participant(
            GUEST,
            GUEST_WARBAND,
            ParticipantStatus::JoinedPrebattle,
        )],
    );
    let bridge = ChannelBridge::default();
    let mut guest = session_for(&server, &bridge, GUEST);
    wait_for(&mut guest, "roster seeded", |v| !v.selected.is_empty()).await;

    guest.dispatch(SessionInput::ReadyRequested(true));
    wait_for(&mut guest, "guest ready", |v| {
        v.snapshot
            .as_ref()
            .and_then(|s| s.participant(GUEST))
            .is_some_and(|p| p.is_ready())
    })
    .await;

    drop(guest);
    wait_for_server(&server, "teardown un-ready", || {
        server.participant_status(GUEST) == ParticipantStatus::JoinedPrebattle
    })
    .await;
}

#[tokio::test]
async fn battle_starting_elsewhere_suppresses_the_teardown_unready() {
    let server = ServerState::new(
        BattleStatus::Prebattle,
        vec![
            participant(CREATOR, CREATOR_WARBAND, ParticipantStatus::Ready),
            participant(GUEST, GUEST_WARBAND, ParticipantStatus::JoinedPrebattle),
        ],
    );
    let bridge = ChannelBridge::default();
    let mut guest = session_for(&server, &bridge, GUEST);
    wait_for(&mut guest, "roster seeded", |v| !v.selected.is_empty()).await;

    guest.dispatch(SessionInput::ReadyRequested(true));
    wait_for(&mut guest, "guest ready", |v| {
        v.snapshot
            .as_ref()
            .and_then(|s| s.participant(GUEST))
            .is_some_and(|p| p.is_ready())
    })
    .await;

    // The creator starts the battle; the guest only hears about it by push.
    server.set_status(BattleStatus::Active);
    bridge.publish(warhall_protocol::PushMessage::BattleStateChanged { battle: BATTLE });
    wait_for(&mut guest, "battle active", |v| {
        v.snapshot
            .as_ref()
            .is_some_and(|s| s.battle.status == BattleStatus::Active)
    })
    .await;

    let ready_writes = server.write_count("set_ready");
    drop(guest);
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The latch held: nobody's readiness was knocked over after the start.
    assert_eq!(server.write_count("set_ready"), ready_writes);
    assert_eq!(server.participant_status(GUEST), ParticipantStatus::Ready);
}

#[tokio::test]
async fn item_consumption_appends_events_and_exhausts() {
    let server = ServerState::new(
        BattleStatus::Active,
        vec![participant(
            GUEST,
            GUEST_WARBAND,
            ParticipantStatus::Fighting,
        )],
    );
    let bridge = ChannelBridge::default();
    let mut guest = session_for(&server, &bridge, GUEST);
    // The roster loads even on a mid-battle mount, so the session knows the
    // unit's items.
    wait_for(&mut guest, "roster loaded", |v| !v.selected.is_empty()).await;

    let hero = UnitKey::hero(1);
    guest.dispatch(SessionInput::UseItemRequested {
        unit: hero.clone(),
        item_id: 5,
    });
    wait_for(&mut guest, "item used", |v| {
        v.snapshot.as_ref().is_some_and(|s| !s.events.is_empty())
    })
    .await;
    assert_eq!(server.write_count("append_event"), 1);

    // Quantity one: the second use is refused locally.
    guest.dispatch(SessionInput::UseItemRequested {
        unit: hero.clone(),
        item_id: 5,
    });
    let view = wait_for(&mut guest, "exhaustion error", |v| {
        v.error_for("append_event").is_some()
    })
    .await;
    assert!(view.error_for("append_event").unwrap().contains("no uses left"));
    assert_eq!(server.write_count("append_event"), 1);
}
