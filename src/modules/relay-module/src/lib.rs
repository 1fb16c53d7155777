//! Forwards every action to an HTTP endpoint.
//!
//! Each action descriptor is POSTed as JSON to `endpoint`; a 2xx reply body is
//! the result. Any other status fails the action, using the body's `msg` or
//! `error` field when one is present.
//!
//! ```toml
//! kind = "relay"
//!
//! [settings]
//! endpoint = "http://127.0.0.1:9763/action"
//! timeout_ms = 8000
//!
//! [settings.headers]
//! x-api-key = "secret"
//!
//! [settings.sources.kw]
//! name = "Relayed"
//! ```

use lxbridge_runtime::{
    event, FetchOptions, FetchResponse, HandlerResult, HostContext, ModuleError, ModuleManifest,
    PluginModule, Reply,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

pub const KIND: &str = "relay";

#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    pub endpoint: String,
    /// Falls back to the host's fetch timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub sources: Map<String, Value>,
}

pub struct RelayModule {
    name: String,
    settings: RelaySettings,
}

impl RelayModule {
    pub fn new(name: impl Into<String>, settings: RelaySettings) -> Result<Self, ModuleError> {
        if !(settings.endpoint.starts_with("http://") || settings.endpoint.starts_with("https://")) {
            return Err(ModuleError::InvalidSettings(format!(
                "endpoint must be an http(s) URL, got '{}'",
                settings.endpoint
            )));
        }
        Ok(Self {
            name: name.into(),
            settings,
        })
    }

    fn request_options(&self, body: Value) -> FetchOptions {
        let mut options = FetchOptions::post(body);
        for (name, value) in &self.settings.headers {
            options = options.with_header(name, value);
        }
        if let Some(ms) = self.settings.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}

pub fn factory(manifest: &ModuleManifest) -> Result<Box<dyn PluginModule>, ModuleError> {
    let settings: RelaySettings = manifest.settings_as()?;
    Ok(Box::new(RelayModule::new(manifest.display_name(), settings)?))
}

impl PluginModule for RelayModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_handlers(&self, ctx: &HostContext) -> Result<(), ModuleError> {
        let endpoint = self.settings.endpoint.clone();
        let template = self.request_options(Value::Null);
        let http = ctx.clone();
        ctx.on(event::REQUEST, move |descriptor| {
            let http = http.clone();
            let endpoint = endpoint.clone();
            let options = FetchOptions {
                body: Some(descriptor),
                ..template.clone()
            };
            Reply::deferred(async move {
                let response = http
                    .fetch(&endpoint, options)
                    .await
                    .map_err(|e| e.to_string())?;
                unwrap_reply(response)
            })
        });

        tracing::info!(module = %self.name, endpoint = %self.settings.endpoint, "relay ready");
        ctx.notify(
            event::INITED,
            json!({ "sources": Value::Object(self.settings.sources.clone()) }),
        );
        Ok(())
    }
}

fn unwrap_reply(response: FetchResponse) -> HandlerResult {
    if response.is_success() {
        return Ok(response.body);
    }
    let detail = ["msg", "error", "message"]
        .iter()
        .find_map(|key| response.body.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
        .unwrap_or_else(|| format!("endpoint returned HTTP {}", response.status));
    Err(detail)
}
