use serde::{Deserialize, Serialize};

/// A module-scoped track identifier.
///
/// Modules choose the format (often `<platform>_<number>`); the host treats it
/// as opaque and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Track metadata in the host's standard shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Duration in seconds, `0` when unknown.
    pub duration: u32,
    pub platform: String,
    /// The record exactly as the module returned it.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// A playable source resolved for a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MediaSource {
    pub url: String,
    pub quality: String,
    pub size: String,
    pub platform: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Album {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub cover: String,
    pub description: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub songs: Vec<Track>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub description: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub albums: Vec<Album>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Quality tag requested when the peer does not name one.
pub const DEFAULT_QUALITY: &str = "128k";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn album_without_songs_omits_field() {
        let album = Album {
            id: "a1".into(),
            title: "Album".into(),
            ..Album::default()
        };
        let json = serde_json::to_value(&album).unwrap();
        assert!(json.get("songs").is_none());
        assert_eq!(json["title"], "Album");
    }
}
