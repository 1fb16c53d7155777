//! Module loading.
//!
//! A module is a compiled [`PluginModule`] chosen by the `kind` field of a
//! manifest file. Loading reads and parses the manifest, builds the module
//! from its settings and lets it register handlers on the [`HostContext`].
//! The module never sees anything else of the host. Any failure along the way
//! (unreadable file, bad manifest, unknown kind, rejected settings, or a
//! registration error or panic) leaves the handle in [`PluginState::Failed`].

use crate::context::HostContext;
use crate::registry::panic_message;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub trait PluginModule {
    fn name(&self) -> &str;

    /// Registers the module's handlers. Called exactly once.
    fn register_handlers(&self, ctx: &HostContext) -> Result<(), ModuleError>;
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModuleError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("registration failed: {0}")]
    Registration(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read module {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse module manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unknown module kind '{kind}' (known: {known})")]
    UnknownKind { kind: String, known: String },
    #[error("module '{name}' failed to load: {source}")]
    Module {
        name: String,
        #[source]
        source: ModuleError,
    },
    #[error("module '{name}' panicked during load: {message}")]
    Panicked { name: String, message: String },
}

/// Manifest file describing which module to load and with what settings.
///
/// ```toml
/// kind = "static"
/// name = "Demo catalog"
///
/// [settings]
/// reply_delay_ms = 0
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModuleManifest {
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Value,
}

impl ModuleManifest {
    /// Parses `text` as JSON for `.json` files and TOML otherwise.
    pub fn parse(path: &Path, text: &str) -> Result<Self, LoadError> {
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(text).map_err(|e| e.to_string())
        } else {
            toml::from_str(text).map_err(|e| e.to_string())
        };
        parsed.map_err(|message| LoadError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// Deserializes `settings`; a missing table reads as empty.
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, ModuleError> {
        let settings = match &self.settings {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(settings).map_err(|e| ModuleError::InvalidSettings(e.to_string()))
    }
}

pub type ModuleFactory = Box<dyn Fn(&ModuleManifest) -> Result<Box<dyn PluginModule>, ModuleError>>;

/// Module kinds this host can load.
#[derive(Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleManifest) -> Result<Box<dyn PluginModule>, ModuleError> + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleManifest) -> Result<Box<dyn PluginModule>, ModuleError> + 'static,
    {
        self.register(kind, factory);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn instantiate(&self, manifest: &ModuleManifest) -> Result<Box<dyn PluginModule>, LoadError> {
        let factory = self
            .factories
            .get(&manifest.kind)
            .ok_or_else(|| LoadError::UnknownKind {
                kind: manifest.kind.clone(),
                known: self.kinds().collect::<Vec<_>>().join(", "),
            })?;
        factory(manifest).map_err(|source| LoadError::Module {
            name: manifest.display_name().to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    NotLoaded,
    Loaded,
    Failed(String),
}

/// The single module this bridge hosts and how loading went.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    path: PathBuf,
    state: PluginState,
}

impl PluginHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: PluginState::NotLoaded,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &PluginState {
        &self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PluginState::Loaded
    }

    /// The failure reason, if loading failed.
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            PluginState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn settle(&mut self, outcome: Result<(), LoadError>) {
        self.state = match outcome {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "module loaded");
                PluginState::Loaded
            }
            Err(err) => {
                tracing::error!(path = %self.path.display(), "{err}");
                PluginState::Failed(err.to_string())
            }
        };
    }
}

/// Loads the module described by the manifest at `path`.
pub fn load(path: &Path, catalog: &ModuleCatalog, ctx: &HostContext) -> PluginHandle {
    let mut handle = PluginHandle::new(path);
    ctx.set_module_path(path);
    let outcome = read_manifest(path)
        .and_then(|manifest| catalog.instantiate(&manifest))
        .and_then(|module| register(module.as_ref(), ctx));
    handle.settle(outcome);
    handle
}

/// Loads an already-constructed module, labelled by `path`.
pub fn load_module(path: &Path, module: &dyn PluginModule, ctx: &HostContext) -> PluginHandle {
    let mut handle = PluginHandle::new(path);
    ctx.set_module_path(path);
    handle.settle(register(module, ctx));
    handle
}

fn read_manifest(path: &Path) -> Result<ModuleManifest, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ModuleManifest::parse(path, &text)
}

fn register(module: &dyn PluginModule, ctx: &HostContext) -> Result<(), LoadError> {
    let name = module.name().to_string();
    tracing::debug!(module = %name, "registering module handlers");
    ctx.hold_announcements();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| module.register_handlers(ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(LoadError::Module { name, source }),
        Err(payload) => Err(LoadError::Panicked {
            name,
            message: panic_message(payload.as_ref()),
        }),
    };
    ctx.release_announcements(outcome.is_ok());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::registry::{event, Reply};
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct Echo;

    impl PluginModule for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn register_handlers(&self, ctx: &HostContext) -> Result<(), ModuleError> {
            ctx.on(event::REQUEST, |data| Reply::ok(data));
            Ok(())
        }
    }

    struct Refuses;

    impl PluginModule for Refuses {
        fn name(&self) -> &str {
            "refuses"
        }

        fn register_handlers(&self, _ctx: &HostContext) -> Result<(), ModuleError> {
            Err(ModuleError::Registration("missing api key".into()))
        }
    }

    /// Announces its sources, then refuses to finish loading.
    struct AnnouncesThenRefuses;

    impl PluginModule for AnnouncesThenRefuses {
        fn name(&self) -> &str {
            "announces"
        }

        fn register_handlers(&self, ctx: &HostContext) -> Result<(), ModuleError> {
            ctx.notify(event::INITED, json!({"sources": {"kw": {}}}));
            Err(ModuleError::Registration("missing api key".into()))
        }
    }

    struct Explodes;

    impl PluginModule for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }

        fn register_handlers(&self, _ctx: &HostContext) -> Result<(), ModuleError> {
            panic!("top-level module error")
        }
    }

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::new()
            .with("echo", |_| Ok(Box::new(Echo) as Box<dyn PluginModule>))
            .with("refuses", |_| Ok(Box::new(Refuses) as Box<dyn PluginModule>))
            .with("explodes", |_| Ok(Box::new(Explodes) as Box<dyn PluginModule>))
            .with("picky", |manifest| {
                #[derive(Deserialize)]
                struct Picky {
                    #[allow(dead_code)]
                    endpoint: String,
                }
                manifest.settings_as::<Picky>()?;
                Ok(Box::new(Echo) as Box<dyn PluginModule>)
            })
    }

    fn manifest(suffix: &str, body: &str) -> tempfile::TempPath {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.into_temp_path()
    }

    #[tokio::test]
    async fn loads_toml_manifest_and_registers_handlers() {
        let (ctx, _writer, _client) = context();
        let path = manifest(".toml", "kind = \"echo\"\n");

        let handle = load(&path, &catalog(), &ctx);
        assert_eq!(handle.state(), &PluginState::Loaded);
        assert_eq!(ctx.registry().handler_count(event::REQUEST), 1);
        assert_eq!(ctx.module_path().as_deref(), Some(&*path));
    }

    #[tokio::test]
    async fn loads_json_manifest() {
        let (ctx, _writer, _client) = context();
        let path = manifest(".json", r#"{"kind": "picky", "settings": {"endpoint": "http://x"}}"#);
        assert!(load(&path, &catalog(), &ctx).is_loaded());
    }

    #[tokio::test]
    async fn missing_file_fails() {
        let (ctx, _writer, _client) = context();
        let handle = load(Path::new("/nonexistent/module.toml"), &catalog(), &ctx);
        let reason = handle.failure().expect("should fail");
        assert!(reason.contains("failed to read module"), "got: {reason}");
    }

    #[tokio::test]
    async fn syntax_error_fails() {
        let (ctx, _writer, _client) = context();
        let path = NamedTempFile::new().unwrap().into_temp_path();
        std::fs::write(&path, "kind = ").unwrap();
        let handle = load(&path, &catalog(), &ctx);
        assert!(handle.failure().unwrap().contains("failed to parse"));
    }

    #[tokio::test]
    async fn unknown_kind_lists_known_kinds() {
        let (ctx, _writer, _client) = context();
        let path = manifest(".toml", "kind = \"lua\"\n");
        let reason = load(&path, &catalog(), &ctx).failure().unwrap().to_string();
        assert!(reason.contains("'lua'"));
        assert!(reason.contains("echo, explodes, picky, refuses"), "got: {reason}");
    }

    #[tokio::test]
    async fn rejected_settings_fail() {
        let (ctx, _writer, _client) = context();
        let path = manifest(".toml", "kind = \"picky\"\n[settings]\nendpoint = 3\n");
        let reason = load(&path, &catalog(), &ctx).failure().unwrap().to_string();
        assert!(reason.contains("invalid settings"), "got: {reason}");
    }

    #[tokio::test]
    async fn registration_error_fails() {
        let (ctx, _writer, _client) = context();
        let handle = load_module(Path::new("refuses.toml"), &Refuses, &ctx);
        assert!(handle.failure().unwrap().contains("missing api key"));
    }

    #[tokio::test]
    async fn failed_load_withholds_inited() {
        use tokio::io::AsyncReadExt;

        let (ctx, writer, mut client) = context();
        let handle = load_module(Path::new("announces.toml"), &AnnouncesThenRefuses, &ctx);
        assert!(handle.failure().is_some());
        drop(ctx);

        assert_eq!(writer.run().await.unwrap(), 0);
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert!(output.is_empty(), "got: {output}");
    }

    #[tokio::test]
    async fn registration_panic_fails_without_unwinding() {
        let (ctx, _writer, _client) = context();
        let handle = load_module(Path::new("explodes.toml"), &Explodes, &ctx);
        let reason = handle.failure().unwrap();
        assert!(reason.contains("top-level module error"), "got: {reason}");
    }

    #[test]
    fn missing_settings_read_as_empty() {
        let manifest = ModuleManifest::parse(Path::new("m.toml"), "kind = \"echo\"").unwrap();
        assert_eq!(manifest.display_name(), "echo");
        let settings: BTreeMap<String, Value> = manifest.settings_as().unwrap();
        assert!(settings.is_empty());

        let manifest =
            ModuleManifest::parse(Path::new("m.toml"), "kind = \"echo\"\nname = \"Demo\"").unwrap();
        assert_eq!(manifest.display_name(), "Demo");
        assert_eq!(manifest.settings, json!(null));
    }
}
