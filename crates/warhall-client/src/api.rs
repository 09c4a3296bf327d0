//! REST abstraction over the campaign server's battle endpoints.
//!
//! Every mutation answers with the same full [`BattleSnapshot`], which is
//! what lets the session replace its cached state wholesale instead of
//! merging fields.

use async_trait::async_trait;
use thiserror::Error;

use warhall_core::RawWarband;
use warhall_protocol::{
    BattleId, BattleSnapshot, CampaignId, ConfigPayload, EventId, EventKind, WarbandId,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ApiError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Rejected { status, .. } => *status >= 500,
        }
    }
}

/// The battle endpoints the session driver needs. Implemented over HTTP in
/// production and in-memory in tests.
#[async_trait]
pub trait BattleApi: Send + Sync {
    /// Full battle state, including log entries after `since_event_id`.
    /// The session always passes zero and replays the whole log.
    async fn fetch_state(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        since_event_id: EventId,
    ) -> Result<BattleSnapshot, ApiError>;

    /// A participant's warband roster, in the campaign server's raw shape.
    async fn fetch_warband(
        &self,
        campaign: CampaignId,
        warband: WarbandId,
    ) -> Result<RawWarband, ApiError>;

    async fn join(&self, campaign: CampaignId, battle: BattleId)
        -> Result<BattleSnapshot, ApiError>;

    async fn set_ready(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        ready: bool,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn cancel_participation(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn cancel_battle(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn start(&self, campaign: CampaignId, battle: BattleId)
        -> Result<BattleSnapshot, ApiError>;

    /// Idempotent replace-wholesale config commit.
    async fn submit_config(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        config: &ConfigPayload,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn append_event(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        event: &EventKind,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn declare_winner(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        warband: WarbandId,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn confirm_result(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError>;

    async fn finish(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError>;
}
