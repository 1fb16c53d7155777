//! Keeps one bridge process per module in a plugin directory.
//!
//! Plugins are named by manifest file stem: `kw.toml` in the plugin directory
//! is the plugin `kw`. Bridges start on [`PluginManager::load_plugins`] for the
//! enabled list, or lazily the first time an operation names a plugin.

use crate::client::{BridgeClient, ClientError, SpawnConfig};
use lxbridge_core::config::is_plugin_name;
use lxbridge_core::models::{Album, Artist, MediaSource, Track};
use lxbridge_core::{AppDirs, ClientConfig, Config};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use thiserror::Error;

const MANIFEST_EXTENSIONS: [&str; 2] = ["toml", "json"];

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid plugin name '{0}'")]
    InvalidName(String),
    #[error("plugin '{name}' not found in {dir}")]
    NotFound { name: String, dir: PathBuf },
    #[error("failed to read plugin directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("plugin '{name}': {source}")]
    Client {
        name: String,
        #[source]
        source: ClientError,
    },
}

pub struct PluginManager {
    client: ClientConfig,
    plugin_dir: PathBuf,
    enabled: Vec<String>,
    running: Mutex<BTreeMap<String, Arc<BridgeClient>>>,
}

impl PluginManager {
    pub fn new(client: ClientConfig, plugin_dir: impl Into<PathBuf>, enabled: Vec<String>) -> Self {
        Self {
            client,
            plugin_dir: plugin_dir.into(),
            enabled,
            running: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn from_config(config: &Config, dirs: &AppDirs) -> Self {
        Self::new(
            config.client.clone(),
            config.plugins.dir_or_default(dirs),
            config.plugins.enabled.clone(),
        )
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn enabled_plugins(&self) -> &[String] {
        &self.enabled
    }

    /// Names of the module manifests in the plugin directory, sorted.
    /// Creates the directory when it does not exist yet.
    pub fn available_plugins(&self) -> Result<Vec<String>, ManagerError> {
        let read_dir_error = |source| ManagerError::ReadDir {
            path: self.plugin_dir.clone(),
            source,
        };
        fs::create_dir_all(&self.plugin_dir).map_err(read_dir_error)?;
        let entries = fs::read_dir(&self.plugin_dir).map_err(read_dir_error)?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_manifest(path))
            .filter_map(|path| path.file_stem()?.to_str().map(str::to_owned))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Starts every enabled plugin. Failures are logged and skipped.
    /// Returns how many plugins are running afterwards.
    pub fn load_plugins(&self) -> usize {
        tracing::info!(enabled = ?self.enabled, "Loading plugins");
        for name in &self.enabled {
            if let Err(err) = self.load_plugin(name) {
                tracing::warn!(plugin = %name, "Plugin failed to load: {err}");
            }
        }
        self.running.lock().unwrap().len()
    }

    /// Starts the bridge for `name` unless it is already running.
    pub fn load_plugin(&self, name: &str) -> Result<(), ManagerError> {
        self.client(name).map(|_| ())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains_key(name)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        self.running.lock().unwrap().keys().cloned().collect()
    }

    /// Stops the bridge for `name`. Returns `false` when it was not running.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let Some(client) = self.running.lock().unwrap().remove(name) else {
            return false;
        };
        stop(name, &client);
        true
    }

    /// Stops every running bridge.
    pub fn close(&self) {
        let running = std::mem::take(&mut *self.running.lock().unwrap());
        for (name, client) in running {
            stop(&name, &client);
        }
    }

    pub fn search(
        &self,
        name: &str,
        keyword: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Track>, ManagerError> {
        self.with_client(name, |client| client.search(keyword, page, limit, source))
    }

    /// Searches every enabled plugin in parallel. A plugin that fails to load
    /// or to answer contributes an empty list.
    pub fn search_all(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> BTreeMap<String, Vec<Track>> {
        thread::scope(|scope| {
            let searches: Vec<_> = self
                .enabled
                .iter()
                .map(|name| {
                    let search =
                        scope.spawn(move || self.search(name, keyword, page, limit, source));
                    (name, search)
                })
                .collect();

            searches
                .into_iter()
                .map(|(name, search)| {
                    let tracks = match search.join() {
                        Ok(Ok(tracks)) => tracks,
                        Ok(Err(err)) => {
                            tracing::warn!(plugin = %name, "Search failed: {err}");
                            Vec::new()
                        }
                        Err(_) => {
                            tracing::error!(plugin = %name, "Search thread panicked");
                            Vec::new()
                        }
                    };
                    (name.clone(), tracks)
                })
                .collect()
        })
    }

    pub fn media_source(
        &self,
        name: &str,
        music_item: Value,
        source: &str,
        quality: &str,
    ) -> Result<Option<MediaSource>, ManagerError> {
        self.with_client(name, |client| client.media_source(music_item, source, quality))
    }

    pub fn lyric(
        &self,
        name: &str,
        music_item: Value,
        source: &str,
    ) -> Result<Option<String>, ManagerError> {
        self.with_client(name, |client| client.lyric(music_item, source))
    }

    pub fn album(
        &self,
        name: &str,
        album_id: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Album>, ManagerError> {
        self.with_client(name, |client| client.album(album_id, page, limit, source))
    }

    pub fn artist(
        &self,
        name: &str,
        artist_id: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Artist>, ManagerError> {
        self.with_client(name, |client| client.artist(artist_id, page, limit, source))
    }

    pub fn recommend(
        &self,
        name: &str,
        music_item: Value,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Track>, ManagerError> {
        self.with_client(name, |client| client.recommend(music_item, page, limit, source))
    }

    fn with_client<T>(
        &self,
        name: &str,
        call: impl FnOnce(&BridgeClient) -> Result<T, ClientError>,
    ) -> Result<T, ManagerError> {
        let client = self.client(name)?;
        call(&client).map_err(|source| ManagerError::Client {
            name: name.to_string(),
            source,
        })
    }

    /// Running client for `name`, started first if needed.
    fn client(&self, name: &str) -> Result<Arc<BridgeClient>, ManagerError> {
        if let Some(client) = self.running.lock().unwrap().get(name) {
            return Ok(Arc::clone(client));
        }

        let manifest = self.manifest_path(name)?;
        tracing::info!(plugin = name, manifest = %manifest.display(), "Starting plugin");
        let client = BridgeClient::new(SpawnConfig::new(&self.client, manifest));
        client.start().map_err(|source| ManagerError::Client {
            name: name.to_string(),
            source,
        })?;

        // A concurrent start of the same plugin may have won; keep the first.
        let mut running = self.running.lock().unwrap();
        let client = running
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(client));
        Ok(Arc::clone(client))
    }

    fn manifest_path(&self, name: &str) -> Result<PathBuf, ManagerError> {
        if !is_plugin_name(name) {
            return Err(ManagerError::InvalidName(name.to_string()));
        }
        MANIFEST_EXTENSIONS
            .iter()
            .map(|ext| self.plugin_dir.join(format!("{name}.{ext}")))
            .find(|path| path.is_file())
            .ok_or_else(|| ManagerError::NotFound {
                name: name.to_string(),
                dir: self.plugin_dir.clone(),
            })
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext))
}

fn stop(name: &str, client: &BridgeClient) {
    match client.stop() {
        Ok(()) => tracing::info!(plugin = name, "Plugin unloaded"),
        Err(err) => tracing::warn!(plugin = name, "Failed to stop plugin: {err}"),
    }
}
