//! Routes protocol operations to the module's `request` handler.
//!
//! Each operation becomes an [`ActionDescriptor`] and is handed to the first
//! handler registered for `request`. The handler's reply (immediate or
//! deferred) is awaited and normalised: errors and panics become
//! [`DispatchError::Handler`], a `null` result becomes
//! [`DispatchError::EmptyResult`].

use crate::context::HostContext;
use crate::registry::{self, event, Reply};
use crate::sandbox::{PluginHandle, PluginState};
use lxbridge_plugin::protocol::{
    AlbumParams, ArtistParams, LyricParams, MediaSourceParams, RecommendParams, SearchParams,
};
use lxbridge_plugin::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use thiserror::Error;

/// Action names carried in [`ActionDescriptor::action`].
pub mod action {
    pub const SEARCH: &str = "search";
    pub const MUSIC_URL: &str = "musicUrl";
    pub const LYRIC: &str = "lyric";
    pub const ALBUM: &str = "album";
    pub const ARTIST: &str = "artist";
    pub const RECOMMEND: &str = "recommend";
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Plugin not available: {0}")]
    CapabilityUnavailable(String),
    #[error("No handler registered for 'request' event")]
    NoHandlerRegistered,
    #[error("Unknown method: {0}")]
    UnknownMethod(String),
    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },
    #[error("{0}")]
    Handler(String),
    #[error("handler returned no result")]
    EmptyResult,
}

/// What the module's `request` handler receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: String,
    pub source: String,
    pub info: Value,
}

impl ActionDescriptor {
    pub fn new(action: &str, source: &str, info: impl Serialize) -> Self {
        Self {
            action: action.to_string(),
            source: source.to_string(),
            info: serde_json::to_value(info).unwrap_or(Value::Null),
        }
    }

    /// Decodes `info` into one of the typed shapes below.
    pub fn info_as<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.info.clone())
            .map_err(|e| format!("malformed {} info: {e}", self.action))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchInfo {
    pub keyword: String,
    pub page: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicUrlInfo {
    pub music_info: Value,
    /// Quality tag, e.g. `128k`.
    #[serde(rename = "type")]
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricInfo {
    pub music_info: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumInfo {
    pub album_id: Value,
    pub page: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistInfo {
    pub artist_id: Value,
    pub page: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendInfo {
    pub music_info: Value,
    pub page: u32,
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

pub struct Dispatcher {
    ctx: HostContext,
    handle: PluginHandle,
}

impl Dispatcher {
    pub fn new(ctx: HostContext, handle: PluginHandle) -> Self {
        Self { ctx, handle }
    }

    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    /// Decodes `params` for `method` and runs the matching operation.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let method = Method::from_name(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;
        match method {
            Method::Search => {
                let p: SearchParams = decode(method, params)?;
                self.search(&p.keyword, p.page, p.limit, &p.source, p.options)
                    .await
            }
            Method::GetMediaSource => {
                let p: MediaSourceParams = decode(method, params)?;
                let extra = (!p.options.extra.is_empty()).then(|| Value::Object(p.options.extra));
                self.resolve_media_source(p.music_item, &p.options.quality, &p.source, extra)
                    .await
            }
            Method::GetLyric => {
                let p: LyricParams = decode(method, params)?;
                self.get_lyrics(p.music_item, &p.source, p.options).await
            }
            Method::GetAlbum => {
                let p: AlbumParams = decode(method, params)?;
                self.get_album(p.album_id, p.page, p.limit, &p.source, p.options)
                    .await
            }
            Method::GetArtist => {
                let p: ArtistParams = decode(method, params)?;
                self.get_artist(p.artist_id, p.page, p.limit, &p.source, p.options)
                    .await
            }
            Method::GetRecommend => {
                let p: RecommendParams = decode(method, params)?;
                self.get_recommendations(p.music_item, p.page, p.limit, &p.source, p.options)
                    .await
            }
        }
    }

    pub async fn search(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = SearchInfo {
            keyword: keyword.to_string(),
            page,
            limit,
            options,
        };
        self.invoke(ActionDescriptor::new(action::SEARCH, source, info))
            .await
    }

    pub async fn resolve_media_source(
        &self,
        music_item: Value,
        quality: &str,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = MusicUrlInfo {
            music_info: music_item,
            quality: quality.to_string(),
            options,
        };
        self.invoke(ActionDescriptor::new(action::MUSIC_URL, source, info))
            .await
    }

    pub async fn get_lyrics(
        &self,
        music_item: Value,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = LyricInfo {
            music_info: music_item,
            options,
        };
        self.invoke(ActionDescriptor::new(action::LYRIC, source, info))
            .await
    }

    pub async fn get_album(
        &self,
        album_id: Value,
        page: u32,
        limit: u32,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = AlbumInfo {
            album_id,
            page,
            limit,
            options,
        };
        self.invoke(ActionDescriptor::new(action::ALBUM, source, info))
            .await
    }

    pub async fn get_artist(
        &self,
        artist_id: Value,
        page: u32,
        limit: u32,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = ArtistInfo {
            artist_id,
            page,
            limit,
            options,
        };
        self.invoke(ActionDescriptor::new(action::ARTIST, source, info))
            .await
    }

    pub async fn get_recommendations(
        &self,
        music_item: Value,
        page: u32,
        limit: u32,
        source: &str,
        options: Option<Value>,
    ) -> Result<Value, DispatchError> {
        let info = RecommendInfo {
            music_info: music_item,
            page,
            limit,
            options,
        };
        self.invoke(ActionDescriptor::new(action::RECOMMEND, source, info))
            .await
    }

    async fn invoke(&self, descriptor: ActionDescriptor) -> Result<Value, DispatchError> {
        match self.handle.state() {
            PluginState::Loaded => {}
            PluginState::NotLoaded => {
                return Err(DispatchError::CapabilityUnavailable("module not loaded".into()))
            }
            PluginState::Failed(reason) => {
                return Err(DispatchError::CapabilityUnavailable(reason.clone()))
            }
        }

        let handler = self
            .ctx
            .registry()
            .first(event::REQUEST)
            .ok_or(DispatchError::NoHandlerRegistered)?;

        let action = descriptor.action.clone();
        let started = Instant::now();
        let data = serde_json::to_value(&descriptor).unwrap_or(Value::Null);
        let outcome = match registry::invoke(&handler, data) {
            Reply::Ready(result) => result,
            Reply::Deferred(future) => registry::settle(future).await,
        };
        tracing::debug!(
            action = %action,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "request handler settled"
        );

        match outcome {
            Ok(Value::Null) => Err(DispatchError::EmptyResult),
            Ok(value) => Ok(value),
            Err(message) => Err(DispatchError::Handler(message)),
        }
    }
}

fn decode<T: DeserializeOwned>(method: Method, params: Value) -> Result<T, DispatchError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams {
        method: method.to_string(),
        message: e.to_string(),
    })
}
