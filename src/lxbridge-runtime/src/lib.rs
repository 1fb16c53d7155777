//! Plugin host for lxbridge.
//!
//! Loads a single compiled module, gives it a narrow [`HostContext`] and
//! bridges its `request` handler to a line-delimited JSON protocol:
//!
//! - [`sandbox`]: manifests, the module catalog and load states
//! - [`registry`]: event handlers and emission
//! - [`dispatcher`]: protocol operations to action descriptors
//! - [`framer`]: inbound line splitting and serialized dispatch
//! - [`output`]: the single writer for outbound lines
//! - [`bridge`]: wiring for a whole session

pub mod bridge;
pub mod context;
pub mod dispatcher;
pub mod fetch;
pub mod framer;
pub mod output;
pub mod registry;
pub mod sandbox;

pub use bridge::{Bridge, BridgeError};
pub use context::HostContext;
pub use dispatcher::{ActionDescriptor, DispatchError, Dispatcher};
pub use fetch::{FetchError, FetchOptions, FetchResponse};
pub use registry::{event, HandlerId, HandlerResult, Reply};
pub use sandbox::{
    ModuleCatalog, ModuleError, ModuleManifest, PluginHandle, PluginModule, PluginState,
};
