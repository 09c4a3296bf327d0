//! reqwest-backed [`BattleApi`] implementation.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use warhall_core::RawWarband;
use warhall_protocol::{
    BattleId, BattleSnapshot, CampaignId, ConfigPayload, EventId, EventKind, WarbandId,
};

use crate::api::{ApiError, BattleApi};
use crate::config::ClientConfig;

pub struct HttpBattleApi {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBattleApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    fn battle_url(&self, campaign: CampaignId, battle: BattleId, tail: &str) -> String {
        if tail.is_empty() {
            format!("{}/campaigns/{campaign}/battles/{battle}", self.base_url)
        } else {
            format!(
                "{}/campaigns/{campaign}/battles/{battle}/{tail}",
                self.base_url
            )
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        debug!(%method, url, "battle api request");
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn post_action(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        tail: &str,
    ) -> Result<BattleSnapshot, ApiError> {
        let url = self.battle_url(campaign, battle, tail);
        self.execute(self.request(Method::POST, &url)).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        tail: &str,
        body: &B,
    ) -> Result<BattleSnapshot, ApiError> {
        let url = self.battle_url(campaign, battle, tail);
        self.execute(self.request(Method::POST, &url).json(body))
            .await
    }
}

#[async_trait]
impl BattleApi for HttpBattleApi {
    async fn fetch_state(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        since_event_id: EventId,
    ) -> Result<BattleSnapshot, ApiError> {
        let url = self.battle_url(campaign, battle, "");
        self.execute(
            self.request(Method::GET, &url)
                .query(&[("since_event", since_event_id.0)]),
        )
        .await
    }

    async fn fetch_warband(
        &self,
        campaign: CampaignId,
        warband: WarbandId,
    ) -> Result<RawWarband, ApiError> {
        let url = format!("{}/campaigns/{campaign}/warbands/{warband}", self.base_url);
        self.execute(self.request(Method::GET, &url)).await
    }

    async fn join(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "join").await
    }

    async fn set_ready(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        ready: bool,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_json(campaign, battle, "ready", &serde_json::json!({ "ready": ready }))
            .await
    }

    async fn cancel_participation(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "cancel").await
    }

    async fn cancel_battle(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "cancel_battle").await
    }

    async fn start(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "start").await
    }

    async fn submit_config(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        config: &ConfigPayload,
    ) -> Result<BattleSnapshot, ApiError> {
        let url = self.battle_url(campaign, battle, "config");
        self.execute(self.request(Method::PUT, &url).json(config))
            .await
    }

    async fn append_event(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        event: &EventKind,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_json(campaign, battle, "events", event).await
    }

    async fn declare_winner(
        &self,
        campaign: CampaignId,
        battle: BattleId,
        warband: WarbandId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_json(
            campaign,
            battle,
            "winner",
            &serde_json::json!({ "warband": warband }),
        )
        .await
    }

    async fn confirm_result(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "confirm").await
    }

    async fn finish(
        &self,
        campaign: CampaignId,
        battle: BattleId,
    ) -> Result<BattleSnapshot, ApiError> {
        self.post_action(campaign, battle, "finish").await
    }
}
