//! A module that answers every action from a catalog declared in its manifest.
//!
//! ```toml
//! kind = "static"
//! name = "Demo"
//!
//! [settings.sources.kw]
//! name = "Demo source"
//! type = "music"
//! actions = ["musicUrl", "lyric"]
//! qualitys = ["128k", "320k"]
//!
//! [[settings.tracks]]
//! id = "kw_1"
//! name = "Sunny Day"
//! singer = "Jay"
//! interval = "04:29"
//! source = "kw"
//! url = "https://cdn.example.com/kw_1.mp3"
//! lyric = "[00:00.00]Sunny Day"
//! ```

mod catalog;

pub use catalog::{Catalog, CatalogAlbum, CatalogArtist, CatalogTrack};

use catalog::id_text;
use lxbridge_runtime::dispatcher::{
    action, ActionDescriptor, AlbumInfo, ArtistInfo, LyricInfo, MusicUrlInfo, RecommendInfo,
    SearchInfo,
};
use lxbridge_runtime::{
    event, HandlerResult, HostContext, ModuleError, ModuleManifest, PluginModule, Reply,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::rc::Rc;
use std::time::Duration;

pub const KIND: &str = "static";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticSettings {
    /// Announced to the peer in the `inited` event.
    #[serde(default)]
    pub sources: Map<String, Value>,
    #[serde(flatten)]
    pub catalog: Catalog,
    /// Answer through a timer instead of immediately.
    #[serde(default)]
    pub reply_delay_ms: u64,
    /// Print each action to standard output, like a script module's
    /// `console.log`.
    #[serde(default)]
    pub console_log: bool,
}

pub struct StaticModule {
    name: String,
    settings: Rc<StaticSettings>,
}

impl StaticModule {
    pub fn new(name: impl Into<String>, settings: StaticSettings) -> Self {
        Self {
            name: name.into(),
            settings: Rc::new(settings),
        }
    }
}

/// Catalog factory for `kind = "static"`.
pub fn factory(manifest: &ModuleManifest) -> Result<Box<dyn PluginModule>, ModuleError> {
    let settings: StaticSettings = manifest.settings_as()?;
    Ok(Box::new(StaticModule::new(manifest.display_name(), settings)))
}

impl PluginModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_handlers(&self, ctx: &HostContext) -> Result<(), ModuleError> {
        let settings = Rc::clone(&self.settings);
        let timers = ctx.clone();
        ctx.on(event::REQUEST, move |data| {
            if settings.console_log {
                println!("static module got {data}");
            }
            let result = answer(&settings.catalog, data);
            if settings.reply_delay_ms == 0 {
                return Reply::from(result);
            }
            let sleep = timers.sleep(Duration::from_millis(settings.reply_delay_ms));
            Reply::deferred(async move {
                sleep.await;
                result
            })
        });

        tracing::info!(
            module = %self.name,
            tracks = self.settings.catalog.tracks.len(),
            "static catalog ready"
        );
        ctx.notify(
            event::INITED,
            json!({ "sources": Value::Object(self.settings.sources.clone()) }),
        );
        Ok(())
    }
}

fn answer(catalog: &Catalog, data: Value) -> HandlerResult {
    let descriptor: ActionDescriptor =
        serde_json::from_value(data).map_err(|e| format!("malformed action: {e}"))?;

    match descriptor.action.as_str() {
        action::SEARCH => {
            let info: SearchInfo = descriptor.info_as()?;
            to_json(catalog.search(&info.keyword, info.page, info.limit))
        }
        action::MUSIC_URL => {
            let info: MusicUrlInfo = descriptor.info_as()?;
            let track = lookup(catalog, &info.music_info)?;
            let url = track
                .url
                .as_deref()
                .ok_or_else(|| format!("no media source for {}", track.id))?;
            Ok(json!({ "url": url, "bitrate": info.quality, "source": track.source }))
        }
        action::LYRIC => {
            let info: LyricInfo = descriptor.info_as()?;
            let track = lookup(catalog, &info.music_info)?;
            track
                .lyric
                .clone()
                .map(Value::String)
                .ok_or_else(|| format!("no lyric for {}", track.id))
        }
        action::ALBUM => {
            let info: AlbumInfo = descriptor.info_as()?;
            let id = id_text(&info.album_id).ok_or("albumId must be a string or number")?;
            let album = catalog
                .album(&id, info.page, info.limit)
                .ok_or_else(|| format!("album {id} not found"))?;
            Ok(Value::Array(vec![album]))
        }
        action::ARTIST => {
            let info: ArtistInfo = descriptor.info_as()?;
            let id = id_text(&info.artist_id).ok_or("artistId must be a string or number")?;
            let artist = catalog
                .artist(&id, info.page, info.limit)
                .ok_or_else(|| format!("artist {id} not found"))?;
            Ok(Value::Array(vec![artist]))
        }
        action::RECOMMEND => {
            let info: RecommendInfo = descriptor.info_as()?;
            let seed = info.music_info.get("id").and_then(id_text).unwrap_or_default();
            to_json(catalog.recommend(&seed, info.page, info.limit))
        }
        other => Err(format!("unsupported action: {other}")),
    }
}

fn lookup<'a>(catalog: &'a Catalog, music_info: &Value) -> Result<&'a CatalogTrack, String> {
    let id = music_info
        .get("id")
        .and_then(id_text)
        .ok_or("musicInfo.id is required")?;
    catalog
        .track(&id)
        .ok_or_else(|| format!("track {id} not found"))
}

fn to_json(value: impl serde::Serialize) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StaticSettings {
        let manifest: ModuleManifest = serde_json::from_value(json!({
            "kind": "static",
            "settings": {
                "sources": {"kw": {"name": "Demo"}},
                "tracks": [
                    {"id": "kw_1", "name": "Sunny Day", "singer": "Jay", "albumId": "al_1",
                     "interval": "04:29", "source": "kw", "url": "https://cdn/kw_1.mp3",
                     "lyric": "[00:00.00]Sunny"},
                    {"id": "kw_2", "name": "Rain", "singer": "Jay", "source": "kw"}
                ],
                "albums": [{"id": "al_1", "name": "Weather", "artistId": "ar_1", "source": "kw"}],
                "artists": [{"id": "ar_1", "name": "Jay", "source": "kw"}]
            }
        }))
        .unwrap();
        manifest.settings_as().unwrap()
    }

    fn ask(action: &str, info: Value) -> HandlerResult {
        let descriptor = ActionDescriptor::new(action, "kw", info);
        answer(&settings().catalog, serde_json::to_value(descriptor).unwrap())
    }

    #[test]
    fn settings_parse_catalog_and_sources() {
        let settings = settings();
        assert_eq!(settings.catalog.tracks.len(), 2);
        assert_eq!(settings.sources["kw"]["name"], "Demo");
        assert_eq!(settings.reply_delay_ms, 0);
        assert!(!settings.console_log);
    }

    #[test]
    fn answers_each_action() {
        let found = ask("search", json!({"keyword": "sunny", "page": 1, "limit": 30})).unwrap();
        assert_eq!(found[0]["name"], "Sunny Day");

        let url = ask("musicUrl", json!({"musicInfo": {"id": "kw_1"}, "type": "320k"})).unwrap();
        assert_eq!(url, json!({"url": "https://cdn/kw_1.mp3", "bitrate": "320k", "source": "kw"}));

        let lyric = ask("lyric", json!({"musicInfo": {"id": "kw_1"}})).unwrap();
        assert_eq!(lyric, json!("[00:00.00]Sunny"));

        let album = ask("album", json!({"albumId": "al_1", "page": 1, "limit": 30})).unwrap();
        assert_eq!(album[0]["songs"][0]["id"], "kw_1");

        let artist = ask("artist", json!({"artistId": "ar_1", "page": 1, "limit": 30})).unwrap();
        assert_eq!(artist[0]["albums"][0]["id"], "al_1");

        let recs = ask("recommend", json!({"musicInfo": {"id": "kw_1"}, "page": 1, "limit": 30}))
            .unwrap();
        assert_eq!(recs.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn misses_are_errors() {
        let err = ask("musicUrl", json!({"musicInfo": {"id": "kw_2"}, "type": "128k"})).unwrap_err();
        assert_eq!(err, "no media source for kw_2");
        assert!(ask("lyric", json!({"musicInfo": {}})).is_err());
        assert!(ask("album", json!({"albumId": "nope", "page": 1, "limit": 1})).is_err());
        assert_eq!(ask("dance", json!({})).unwrap_err(), "unsupported action: dance");
    }
}
