//! Wire protocol spoken over the bridge's stdin/stdout.
//!
//! Inbound, one JSON document per line:
//! `{"id": <number|string>, "method": "<name>", "params": {...}}`
//!
//! Outbound, one JSON document per line:
//! `{"id": <echoed id|null>, "result": <any|null>, "error": <string|null>}`
//! plus the module readiness event `{"event": "inited", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event a module emits through `notify` once it has registered its sources.
pub const READY_EVENT: &str = "inited";

/// Request identifier, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    Text(String),
}

impl RequestId {
    /// Accepts only JSON numbers and strings.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// The six operations a peer may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "search")]
    Search,
    #[serde(rename = "getMediaSource")]
    GetMediaSource,
    #[serde(rename = "getLyric")]
    GetLyric,
    #[serde(rename = "getAlbum")]
    GetAlbum,
    #[serde(rename = "getArtist")]
    GetArtist,
    #[serde(rename = "getRecommend")]
    GetRecommend,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::Search,
        Method::GetMediaSource,
        Method::GetLyric,
        Method::GetAlbum,
        Method::GetArtist,
        Method::GetRecommend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Search => "search",
            Method::GetMediaSource => "getMediaSource",
            Method::GetLyric => "getLyric",
            Method::GetAlbum => "getAlbum",
            Method::GetArtist => "getArtist",
            Method::GetRecommend => "getRecommend",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request sent by a peer to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Response (or readiness notification) written by the bridge.
///
/// All three fields are always present on the wire; absent values are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<RequestId>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    /// The one-time readiness notification sent after a successful load.
    pub fn ready() -> Self {
        Self {
            id: None,
            result: Some(serde_json::json!({ "initialized": true })),
            error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.id.is_none()
            && self.error.is_none()
            && self
                .result
                .as_ref()
                .and_then(|r| r.get("initialized"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

/// Event forwarded from the module to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Any line the bridge writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    // Event first: a response line never carries `event`.
    Event(EventMessage),
    Response(Response),
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    30
}

fn default_source() -> String {
    "all".into()
}

fn default_quality() -> String {
    lxbridge_core::models::DEFAULT_QUALITY.into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub keyword: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Options for `getMediaSource`; `quality` selects the stream variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSourceOptions {
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for MediaSourceOptions {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSourceParams {
    pub music_item: Value,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub options: MediaSourceOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LyricParams {
    pub music_item: Value,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumParams {
    pub album_id: Value,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistParams {
    pub artist_id: Value,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendParams {
    pub music_item: Value,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}
