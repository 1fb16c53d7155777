use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub singer: String,
    #[serde(default)]
    pub album_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,
    /// `MM:SS`
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    pub lyric: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_id: Option<String>,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub tracks: Vec<CatalogTrack>,
    #[serde(default)]
    pub albums: Vec<CatalogAlbum>,
    #[serde(default)]
    pub artists: Vec<CatalogArtist>,
}

/// Accepts string or numeric ids from the peer.
pub fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn page<T: Clone>(items: &[T], page: u32, limit: u32) -> Vec<T> {
    let limit = limit.max(1) as usize;
    let skip = (page.max(1) as usize - 1).saturating_mul(limit);
    items.iter().skip(skip).take(limit).cloned().collect()
}

impl Catalog {
    pub fn search(&self, keyword: &str, page_no: u32, limit: u32) -> Vec<CatalogTrack> {
        let needle = keyword.to_lowercase();
        let hits: Vec<CatalogTrack> = self
            .tracks
            .iter()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle) || t.singer.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        page(&hits, page_no, limit)
    }

    pub fn track(&self, id: &str) -> Option<&CatalogTrack> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn album(&self, id: &str, page_no: u32, limit: u32) -> Option<Value> {
        let album = self.albums.iter().find(|a| a.id == id)?;
        let songs: Vec<CatalogTrack> = self
            .tracks
            .iter()
            .filter(|t| t.album_id.as_deref() == Some(id))
            .cloned()
            .collect();
        let mut record = serde_json::to_value(album).ok()?;
        record["songs"] = serde_json::to_value(page(&songs, page_no, limit)).ok()?;
        Some(record)
    }

    pub fn artist(&self, id: &str, page_no: u32, limit: u32) -> Option<Value> {
        let artist = self.artists.iter().find(|a| a.id == id)?;
        let albums: Vec<CatalogAlbum> = self
            .albums
            .iter()
            .filter(|a| a.artist_id.as_deref() == Some(id))
            .cloned()
            .collect();
        let mut record = serde_json::to_value(artist).ok()?;
        record["albums"] = serde_json::to_value(page(&albums, page_no, limit)).ok()?;
        Some(record)
    }

    /// Everything except the seed track, same artist first.
    pub fn recommend(&self, seed: &str, page_no: u32, limit: u32) -> Vec<CatalogTrack> {
        let singer = self.track(seed).map(|t| t.singer.as_str()).unwrap_or("");
        let mut picks: Vec<CatalogTrack> = self
            .tracks
            .iter()
            .filter(|t| t.id != seed)
            .cloned()
            .collect();
        picks.sort_by_key(|t| t.singer != singer);
        page(&picks, page_no, limit)
    }
}
