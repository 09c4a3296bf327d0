//! Async battle synchronization client.
//!
//! Wires the pure engine in `warhall-core` to a real transport: a REST
//! [`BattleApi`], a typed realtime bus and the session driver task that
//! executes the state machine's effects.

pub mod api;
pub mod bridge;
pub mod config;
pub mod driver;
pub mod http;

pub use api::{ApiError, BattleApi};
pub use bridge::{ChannelBridge, RealtimeBridge};
pub use config::ClientConfig;
pub use driver::{spawn_session, SessionHandle, SessionView};
pub use http::HttpBattleApi;
