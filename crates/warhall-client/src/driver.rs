//! Session driver: owns the core state machine and a [`BattleApi`], turning
//! effects into network calls and results back into inputs.
//!
//! The loop is the only place the machine is touched, so there is exactly one
//! dispatch path. Network calls run in spawned tasks and report back through
//! an internal channel tagged with the effect's sequence token; the handle
//! dropping closes the user channel, which routes the loop into its teardown
//! path (best-effort un-ready unless the suppression latch is set).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use warhall_core::session::{
    PrebattleSession, SessionEffect, SessionInput, SessionNotice,
};
use warhall_core::{normalize_warband, LocalEditStore};
use warhall_protocol::{
    BattleId, BattleSnapshot, CampaignId, Command, EventId, PrebattleUnit, PushMessage, UnitKey,
    UnitOverride, UserId,
};

use crate::api::BattleApi;
use crate::bridge::RealtimeBridge;

/// Notices older than this are dropped from the view.
const MAX_NOTICES: usize = 8;

/// Read model pushed to the UI after every dispatch.
#[derive(Clone, Debug, Default)]
pub struct SessionView {
    pub snapshot: Option<BattleSnapshot>,
    pub selected: Vec<UnitKey>,
    pub overrides: BTreeMap<UnitKey, UnitOverride>,
    pub custom_units: Vec<PrebattleUnit>,
    pub needs_commit: bool,
    /// Command names currently in flight; each disables only its own control.
    pub busy: HashSet<&'static str>,
    /// Last error per command name. Cleared when the action is retried.
    pub errors: HashMap<&'static str, String>,
    pub notices: Vec<SessionNotice>,
    pub closed: bool,
}

impl SessionView {
    pub fn is_busy(&self, action: &str) -> bool {
        self.busy.contains(action)
    }

    pub fn error_for(&self, action: &str) -> Option<&str> {
        self.errors.get(action).map(String::as_str)
    }
}

/// Handle to a running session. Dropping it tears the session down.
pub struct SessionHandle {
    input_tx: mpsc::UnboundedSender<SessionInput>,
    view_rx: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Feed a user intent into the session. Inputs sent after teardown
    /// started are silently dropped.
    pub fn dispatch(&self, input: SessionInput) {
        let _ = self.input_tx.send(input);
    }

    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    /// Wait until the view changes again; returns the fresh view, or `None`
    /// once the driver loop has exited.
    pub async fn changed(&mut self) -> Option<SessionView> {
        self.view_rx.changed().await.ok()?;
        Some(self.view_rx.borrow().clone())
    }
}

/// Spawn a driver loop for one battle and hand back its handle.
pub fn spawn_session(
    api: Arc<dyn BattleApi>,
    bridge: &dyn RealtimeBridge,
    campaign: CampaignId,
    battle: BattleId,
    user: UserId,
) -> SessionHandle {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let push_rx = bridge.subscribe();

    // The session fetches as soon as the loop starts.
    let _ = input_tx.send(SessionInput::Refresh);

    tokio::spawn(run_loop(
        api, campaign, battle, user, input_rx, push_rx, view_tx,
    ));

    SessionHandle { input_tx, view_rx }
}

async fn run_loop(
    api: Arc<dyn BattleApi>,
    campaign: CampaignId,
    battle: BattleId,
    user: UserId,
    mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
    mut push_rx: broadcast::Receiver<PushMessage>,
    view_tx: watch::Sender<SessionView>,
) {
    let mut session = PrebattleSession::new(campaign, battle, user);
    // Internal channel for spawned network tasks reporting back.
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<SessionInput>();
    // seq -> command name, for busy-flag and error bookkeeping.
    let mut in_flight: HashMap<u64, &'static str> = HashMap::new();
    let mut view = SessionView::default();
    let mut push_warned = false;

    info!(%campaign, %battle, %user, "battle session started");

    loop {
        let input = tokio::select! {
            user_input = input_rx.recv() => match user_input {
                Some(input) => input,
                // Handle dropped: enter the teardown path.
                None => break,
            },
            result = result_rx.recv() => match result {
                Some(input) => input,
                None => continue,
            },
            frame = push_rx.recv() => match frame {
                Ok(msg) => SessionInput::PushReceived(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    if !push_warned {
                        warn!(skipped, "push channel lagging; relying on explicit fetches");
                        push_warned = true;
                    }
                    SessionInput::Refresh
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if !push_warned {
                        warn!("push channel closed; relying on explicit fetches");
                        push_warned = true;
                    }
                    continue;
                }
            },
        };

        settle_result(&input, &mut in_flight, &mut view);
        let action = action_of(&input);
        if let Some(name) = action {
            view.errors.remove(name);
        }

        match session.dispatch(input) {
            Ok(effects) => {
                for effect in effects {
                    execute_effect(
                        effect,
                        &api,
                        campaign,
                        battle,
                        &result_tx,
                        &mut in_flight,
                        &mut view,
                    );
                }
            }
            Err(err) => {
                debug!(%err, "dispatch rejected");
                if let Some(name) = action {
                    view.errors.insert(name, err.to_string());
                } else {
                    push_notice(
                        &mut view,
                        SessionNotice::SyncFailed {
                            message: err.to_string(),
                        },
                    );
                }
            }
        }

        refresh_view(&mut view, &session);
        let _ = view_tx.send(view.clone());
    }

    // Teardown always runs; the un-ready is best-effort and awaited inline.
    if let Ok(effects) = session.dispatch(SessionInput::Closing) {
        for effect in effects {
            if let SessionEffect::Send { command, .. } = effect {
                debug!(command = command.name(), "teardown command");
                if let Err(err) = perform(&api, campaign, battle, command).await {
                    warn!(%err, "teardown command failed");
                }
            }
        }
    }
    view.closed = true;
    refresh_view(&mut view, &session);
    let _ = view_tx.send(view);
    info!(%battle, "battle session closed");
}

/// Clear the busy flag (and record the error) for a finished command.
fn settle_result(
    input: &SessionInput,
    in_flight: &mut HashMap<u64, &'static str>,
    view: &mut SessionView,
) {
    match input {
        SessionInput::CommandCompleted { seq, .. } | SessionInput::FetchFailed { seq, .. } => {
            if let Some(name) = in_flight.remove(seq) {
                view.busy.remove(name);
            }
        }
        SessionInput::CommandFailed { seq, message } => {
            if let Some(name) = in_flight.remove(seq) {
                view.busy.remove(name);
                view.errors.insert(name, message.clone());
            }
        }
        _ => {}
    }
}

/// The command name a user intent maps to, for busy flags and inline errors.
fn action_of(input: &SessionInput) -> Option<&'static str> {
    match input {
        SessionInput::CommitRequested => Some("submit_config"),
        SessionInput::ReadyRequested(_) => Some("set_ready"),
        SessionInput::AcceptRequested => Some("join"),
        SessionInput::StartRequested => Some("start"),
        SessionInput::CancelRequested => Some("cancel_participation"),
        SessionInput::CancelBattleRequested => Some("cancel_battle"),
        SessionInput::UseItemRequested { .. } => Some("append_event"),
        SessionInput::DeclareWinnerRequested(_) => Some("declare_winner"),
        SessionInput::ConfirmResultRequested => Some("confirm_result"),
        SessionInput::FinishRequested => Some("finish"),
        _ => None,
    }
}

fn execute_effect(
    effect: SessionEffect,
    api: &Arc<dyn BattleApi>,
    campaign: CampaignId,
    battle: BattleId,
    result_tx: &mpsc::UnboundedSender<SessionInput>,
    in_flight: &mut HashMap<u64, &'static str>,
    view: &mut SessionView,
) {
    match effect {
        SessionEffect::FetchState { seq } => {
            let api = Arc::clone(api);
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let input = match api.fetch_state(campaign, battle, EventId(0)).await {
                    Ok(snapshot) => SessionInput::SnapshotFetched { seq, snapshot },
                    Err(err) => SessionInput::FetchFailed {
                        seq,
                        message: err.to_string(),
                    },
                };
                let _ = tx.send(input);
            });
        }
        SessionEffect::LoadRoster { user, warband } => {
            let api = Arc::clone(api);
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let input = match api.fetch_warband(campaign, warband).await {
                    Ok(raw) => SessionInput::RosterLoaded {
                        user,
                        roster: normalize_warband(&raw),
                    },
                    Err(err) => SessionInput::RosterFailed {
                        user,
                        message: err.to_string(),
                    },
                };
                let _ = tx.send(input);
            });
        }
        SessionEffect::Send { seq, command } => {
            let name = command.name();
            in_flight.insert(seq, name);
            view.busy.insert(name);
            let api = Arc::clone(api);
            let tx = result_tx.clone();
            tokio::spawn(async move {
                let input = match perform(&api, campaign, battle, command).await {
                    Ok(snapshot) => SessionInput::CommandCompleted { seq, snapshot },
                    Err(err) => SessionInput::CommandFailed {
                        seq,
                        message: err.to_string(),
                    },
                };
                let _ = tx.send(input);
            });
        }
        SessionEffect::Notify(notice) => push_notice(view, notice),
    }
}

async fn perform(
    api: &Arc<dyn BattleApi>,
    campaign: CampaignId,
    battle: BattleId,
    command: Command,
) -> Result<BattleSnapshot, crate::api::ApiError> {
    match command {
        Command::Join => api.join(campaign, battle).await,
        Command::SetReady { ready } => api.set_ready(campaign, battle, ready).await,
        Command::CancelParticipation => api.cancel_participation(campaign, battle).await,
        Command::CancelBattle => api.cancel_battle(campaign, battle).await,
        Command::Start => api.start(campaign, battle).await,
        Command::SubmitConfig { config } => api.submit_config(campaign, battle, &config).await,
        Command::AppendEvent { event } => api.append_event(campaign, battle, &event).await,
        Command::DeclareWinner { warband } => api.declare_winner(campaign, battle, warband).await,
        Command::ConfirmResult => api.confirm_result(campaign, battle).await,
        Command::Finish => api.finish(campaign, battle).await,
    }
}

fn push_notice(view: &mut SessionView, notice: SessionNotice) {
    view.notices.push(notice);
    if view.notices.len() > MAX_NOTICES {
        let overflow = view.notices.len() - MAX_NOTICES;
        view.notices.drain(..overflow);
    }
}

fn refresh_view(view: &mut SessionView, session: &PrebattleSession) {
    view.snapshot = session.snapshot().cloned();
    match session.store() {
        Some(store) => apply_store(view, store),
        None => {
            view.selected.clear();
            view.overrides.clear();
            view.custom_units.clear();
            view.needs_commit = false;
        }
    }
}

fn apply_store(view: &mut SessionView, store: &LocalEditStore) {
    view.selected = store.selected().to_vec();
    view.overrides = store.overrides().clone();
    view.custom_units = store.custom_units().to_vec();
    view.needs_commit = store.needs_commit();
}
