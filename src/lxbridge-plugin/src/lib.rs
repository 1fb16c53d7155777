//! Wire protocol and supervising-side client for the lxbridge plugin host.
//!
//! This crate provides:
//! - The JSON line protocol spoken between a supervising process and the bridge
//! - [`BridgeClient`], which spawns `lxbridge <module>` and waits for readiness
//! - [`PluginManager`], which keeps one bridge per enabled module in a plugin
//!   directory and fans searches out across them
//! - An adapter that turns module-native records into standard models
//!
//! # Protocol
//!
//! The supervisor writes [`Request`] messages (one per line) to the bridge's
//! stdin; the bridge answers with [`Response`] messages (one per line) on
//! stdout. Before any response, the bridge writes exactly one readiness
//! notification:
//!
//! ```text
//! {"id":null,"result":{"initialized":true},"error":null}
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use lxbridge_core::ClientConfig;
//! use lxbridge_plugin::{BridgeClient, SpawnConfig};
//!
//! let client = BridgeClient::new(SpawnConfig::new(&ClientConfig::default(), "demo.toml"));
//! client.start()?;
//! let tracks = client.search("keyword", 1, 30, "all")?;
//! ```

pub mod adapter;
mod client;
mod manager;
pub mod protocol;

pub use client::{BridgeClient, ClientError, SpawnConfig};
pub use manager::{ManagerError, PluginManager};
pub use protocol::{
    EventMessage, Method, Outbound, Request, RequestId, Response, READY_EVENT,
};
