//! Converts module-native records into the host's standard models.
//!
//! Modules speak the music-source dialect (`name`, `singer`, `albumName`,
//! `interval` as `MM:SS`); the rest of the system works with
//! [`lxbridge_core::models`]. Missing fields become empty strings rather than
//! errors, and the original record is kept in `raw`.

use lxbridge_core::models::{Album, Artist, MediaSource, Track, TrackId};
use serde_json::{json, Map, Value};

fn text(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn items(value: &Value) -> &[Value] {
    value.as_array().map(Vec::as_slice).unwrap_or(&[])
}

/// Parses `MM:SS` or `HH:MM:SS` into seconds. Anything else, including a
/// total that does not fit in `u32`, is `0`.
pub fn parse_interval(interval: &str) -> u32 {
    interval_seconds(interval).unwrap_or(0)
}

fn interval_seconds(interval: &str) -> Option<u32> {
    let parts: Vec<u32> = interval
        .split(':')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [minutes, seconds] => minutes.checked_mul(60)?.checked_add(*seconds),
        [hours, minutes, seconds] => hours
            .checked_mul(3600)?
            .checked_add(minutes.checked_mul(60)?)?
            .checked_add(*seconds),
        _ => None,
    }
}

/// Formats seconds as zero-padded `MM:SS`; zero yields an empty string.
pub fn format_interval(duration: u32) -> String {
    if duration == 0 {
        return String::new();
    }
    format!("{:02}:{:02}", duration / 60, duration % 60)
}

pub fn adapt_track(record: &Value) -> Track {
    Track {
        id: TrackId::new(text(record, "id")),
        title: text(record, "name"),
        artist: text(record, "singer"),
        album: text(record, "albumName"),
        duration: record
            .get("interval")
            .and_then(Value::as_str)
            .map(parse_interval)
            .unwrap_or(0),
        platform: text(record, "source"),
        raw: record.clone(),
    }
}

pub fn adapt_search_result(result: &Value) -> Vec<Track> {
    items(result).iter().map(adapt_track).collect()
}

/// Recommendations share the search record shape.
pub fn adapt_recommend_result(result: &Value) -> Vec<Track> {
    adapt_search_result(result)
}

pub fn adapt_media_source(result: &Value) -> Option<MediaSource> {
    match result {
        Value::Null => None,
        // Some modules resolve straight to the URL string.
        Value::String(url) if !url.is_empty() => Some(MediaSource {
            url: url.clone(),
            raw: result.clone(),
            ..MediaSource::default()
        }),
        Value::Object(_) => Some(MediaSource {
            url: text(result, "url"),
            quality: text(result, "bitrate"),
            size: text(result, "size"),
            platform: text(result, "source"),
            raw: result.clone(),
        }),
        _ => None,
    }
}

pub fn adapt_lyric(result: &Value) -> Option<String> {
    result.as_str().map(str::to_owned)
}

pub fn adapt_album(record: &Value) -> Album {
    Album {
        id: text(record, "id"),
        title: text(record, "name"),
        artist: text(record, "artist"),
        cover: text(record, "cover"),
        description: text(record, "description"),
        platform: text(record, "source"),
        songs: record
            .get("songs")
            .map(adapt_search_result)
            .unwrap_or_default(),
        raw: record.clone(),
    }
}

pub fn adapt_album_result(result: &Value) -> Vec<Album> {
    items(result).iter().map(adapt_album).collect()
}

pub fn adapt_artist_result(result: &Value) -> Vec<Artist> {
    items(result)
        .iter()
        .map(|record| Artist {
            id: text(record, "id"),
            name: text(record, "name"),
            avatar: text(record, "avatar"),
            description: text(record, "description"),
            platform: text(record, "source"),
            albums: record
                .get("albums")
                .map(adapt_album_result)
                .unwrap_or_default(),
            raw: record.clone(),
        })
        .collect()
}

/// Standard track back into the module's music-item shape.
pub fn to_music_item(track: &Track) -> Value {
    let mut item = Map::new();
    item.insert("id".into(), json!(track.id.as_ref()));
    item.insert("name".into(), json!(track.title));
    item.insert("singer".into(), json!(track.artist));
    item.insert("albumName".into(), json!(track.album));
    item.insert("interval".into(), json!(format_interval(track.duration)));
    let source = if track.platform.is_empty() {
        "all"
    } else {
        track.platform.as_str()
    };
    item.insert("source".into(), json!(source));
    Value::Object(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!(parse_interval("03:45"), 225);
        assert_eq!(parse_interval("01:02:03"), 3723);
        assert_eq!(parse_interval("abc"), 0);
        assert_eq!(parse_interval("1:2:3:4"), 0);
        assert_eq!(parse_interval(""), 0);
    }

    #[test]
    fn oversized_interval_is_zero() {
        assert_eq!(parse_interval("4294967295:00"), 0);
        assert_eq!(parse_interval("1193046:28:16"), 0);
        assert_eq!(parse_interval("00:4294967295"), 4_294_967_295);
        assert_eq!(adapt_track(&json!({"interval": "4294967295:00"})).duration, 0);
    }

    #[test]
    fn search_records_map_to_tracks() {
        let result = json!([{
            "id": "tx_123456",
            "name": "Song",
            "singer": "Singer",
            "albumName": "Album",
            "interval": "03:45",
            "source": "tx"
        }]);
        let tracks = adapt_search_result(&result);
        assert_eq!(tracks.len(), 1);
        let track = &tracks[0];
        assert_eq!(track.id.as_ref(), "tx_123456");
        assert_eq!(track.title, "Song");
        assert_eq!(track.artist, "Singer");
        assert_eq!(track.album, "Album");
        assert_eq!(track.duration, 225);
        assert_eq!(track.platform, "tx");
        assert_eq!(track.raw["singer"], "Singer");
    }

    #[test]
    fn non_array_search_result_is_empty() {
        assert!(adapt_search_result(&Value::Null).is_empty());
        assert!(adapt_search_result(&json!({"list": []})).is_empty());
    }

    #[test]
    fn media_source_maps_bitrate_to_quality() {
        let source = adapt_media_source(&json!({
            "url": "https://music.example.com/song.mp3",
            "bitrate": "320kbps",
            "size": "8.5MB",
            "source": "tx"
        }))
        .expect("object source");
        assert_eq!(source.quality, "320kbps");
        assert_eq!(source.platform, "tx");

        let bare = adapt_media_source(&json!("https://cdn.example.com/a.flac")).unwrap();
        assert_eq!(bare.url, "https://cdn.example.com/a.flac");
        assert!(adapt_media_source(&Value::Null).is_none());
    }

    #[test]
    fn artist_nests_albums_and_songs() {
        let result = json!([{
            "id": 9,
            "name": "Artist",
            "source": "kw",
            "albums": [{
                "id": "al1",
                "name": "First",
                "songs": [{"id": "s1", "name": "Track", "interval": "00:30"}]
            }]
        }]);
        let artists = adapt_artist_result(&result);
        assert_eq!(artists[0].id, "9");
        assert_eq!(artists[0].albums[0].title, "First");
        assert_eq!(artists[0].albums[0].songs[0].duration, 30);
    }

    #[test]
    fn standard_track_converts_back() {
        let track = Track {
            id: TrackId::new("kw_1"),
            title: "Song".into(),
            artist: "Singer".into(),
            album: "Album".into(),
            duration: 225,
            platform: String::new(),
            raw: Value::Null,
        };
        let item = to_music_item(&track);
        assert_eq!(item["name"], "Song");
        assert_eq!(item["singer"], "Singer");
        assert_eq!(item["interval"], "03:45");
        assert_eq!(item["source"], "all");

        let untimed = Track {
            duration: 0,
            ..track
        };
        assert_eq!(to_music_item(&untimed)["interval"], "");
    }
}
