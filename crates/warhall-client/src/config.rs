//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use warhall_protocol::UserId;

/// Connection settings for the campaign server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the campaign server API, without a trailing slash.
    pub base_url: String,
    /// Bearer token for authenticated endpoints.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// The signed-in user; the session only ever needs its own identity.
    pub user: UserId,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(10),
            user: UserId(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_serde() {
        let config = ClientConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.base_url, config.base_url);
        assert_eq!(back.request_timeout, config.request_timeout);
    }
}
