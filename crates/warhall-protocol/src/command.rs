use serde::{Deserialize, Serialize};

use crate::event::EventKind;
use crate::ids::WarbandId;
use crate::types::ConfigPayload;

/// All client→server mutations. Each maps to one REST endpoint and every
/// endpoint answers with the same full [`crate::BattleSnapshot`] shape,
/// which is what makes replace-wholesale reconciliation possible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Accept the invite / enter the prebattle phase.
    Join,
    /// Flip the readiness flag for the current prebattle session.
    SetReady { ready: bool },
    /// Withdraw this participant from the prebattle.
    CancelParticipation,
    /// Cancel the whole battle (creator only).
    CancelBattle,
    /// Start the match (creator only, all participants ready).
    Start,
    /// Idempotent "replace whole config" commit.
    SubmitConfig { config: ConfigPayload },
    /// Append an entry to the battle event log.
    AppendEvent { event: EventKind },
    /// Declare the winning warband (postbattle).
    DeclareWinner { warband: WarbandId },
    /// Confirm the declared result.
    ConfirmResult,
    /// Close out the battle.
    Finish,
}

impl Command {
    /// Stable name for logging and busy-flag scoping.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::SetReady { .. } => "set_ready",
            Command::CancelParticipation => "cancel_participation",
            Command::CancelBattle => "cancel_battle",
            Command::Start => "start",
            Command::SubmitConfig { .. } => "submit_config",
            Command::AppendEvent { .. } => "append_event",
            Command::DeclareWinner { .. } => "declare_winner",
            Command::ConfirmResult => "confirm_result",
            Command::Finish => "finish",
        }
    }
}
