#![cfg(unix)]

use lxbridge_core::ClientConfig;
use lxbridge_plugin::{BridgeClient, ClientError, ManagerError, PluginManager, SpawnConfig};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use tempfile::NamedTempFile;

fn script(body: &str) -> tempfile::TempPath {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "#!/bin/bash\n{body}").unwrap();
    file.flush().unwrap();
    std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    file.into_temp_path()
}

fn config_for(executable: &std::path::Path) -> SpawnConfig {
    let mut config = SpawnConfig::new(&ClientConfig::default(), "demo.toml");
    config.executable = executable.to_path_buf();
    config.init_timeout = Duration::from_secs(5);
    config.request_timeout = Duration::from_secs(5);
    config
}

const FAKE_BRIDGE: &str = r#"
echo 'starting up'
echo '{"event":"inited","data":{"sources":{"kw":{"name":"Demo"}}}}'
echo '{"id":null,"result":{"initialized":true},"error":null}'
while IFS= read -r line; do
    id=$(echo "$line" | grep -o '"id":[0-9]*' | head -n1 | cut -d: -f2)
    case "$line" in
        *'"method":"search"'*)
            if [[ "$1" == *broken* ]]; then
                echo '{"id":'$id',"result":null,"error":"search backend down"}'
            else
                echo '{"id":'$id',"result":[{"id":"kw_1","name":"Song","singer":"Singer","albumName":"Album","interval":"03:45","source":"kw"},{"id":"kw_2","name":"Other","singer":"Singer","interval":"01:00","source":"kw"}],"error":null}'
            fi
            ;;
        *'"method":"getLyric"'*)
            echo '{"id":'$id',"result":null,"error":"lyric not found"}'
            ;;
        *)
            echo '{"id":'$id',"result":{"url":"https://cdn.example.com/1.mp3","bitrate":"128k","source":"kw"},"error":null}'
            ;;
    esac
done
"#;

#[test]
fn client_handshake_and_search() {
    let bridge = script(FAKE_BRIDGE);
    let client = BridgeClient::new(config_for(&bridge));
    client.start().expect("bridge should become ready");

    let sources = client.sources().expect("inited data captured");
    assert_eq!(sources["sources"]["kw"]["name"], "Demo");

    let tracks = client.search("song", 1, 30, "all").expect("search");
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].title, "Song");
    assert_eq!(tracks[0].duration, 225);

    let source = client
        .media_source(serde_json::json!({"id": "kw_1"}), "kw", "320k")
        .expect("media source")
        .expect("resolved");
    assert_eq!(source.url, "https://cdn.example.com/1.mp3");
    assert_eq!(source.quality, "128k");

    client.stop().expect("stop");
    assert!(!client.is_running());
}

#[test]
fn module_error_surfaces_as_plugin_error() {
    let bridge = script(FAKE_BRIDGE);
    let client = BridgeClient::new(config_for(&bridge));
    client.start().expect("ready");

    let err = client
        .lyric(serde_json::json!({"id": "kw_1"}), "kw")
        .expect_err("lyric should fail");
    match err {
        ClientError::Plugin(message) => assert_eq!(message, "lyric not found"),
        other => panic!("expected plugin error, got {other:?}"),
    }
}

#[test]
fn load_failure_is_reported_at_startup() {
    let bridge = script(
        r#"echo '{"id":null,"result":null,"error":"failed to read module demo.toml"}'
exit 1"#,
    );
    let client = BridgeClient::new(config_for(&bridge));
    match client.start() {
        Err(ClientError::InitFailed(message)) => assert!(message.contains("demo.toml")),
        other => panic!("expected InitFailed, got {other:?}"),
    }
}

#[test]
fn silent_bridge_times_out() {
    let bridge = script("sleep 5");
    let mut config = config_for(&bridge);
    config.init_timeout = Duration::from_millis(200);
    let client = BridgeClient::new(config);
    assert!(matches!(client.start(), Err(ClientError::InitTimeout(_))));
}

/// A manager over a plugin directory holding `good`, `broken` and `extra`,
/// each served by the fake bridge.
fn manager(enabled: &[&str]) -> (PluginManager, tempfile::TempDir, tempfile::TempPath) {
    let bridge = script(FAKE_BRIDGE);
    let dir = tempfile::tempdir().unwrap();
    for file in ["good.toml", "broken.toml", "extra.json", "notes.txt"] {
        std::fs::write(dir.path().join(file), "kind = \"static\"\n").unwrap();
    }
    let client = ClientConfig {
        executable: bridge.to_path_buf(),
        init_timeout_secs: 5,
        request_timeout_secs: 5,
    };
    let enabled = enabled.iter().map(|name| name.to_string()).collect();
    (PluginManager::new(client, dir.path(), enabled), dir, bridge)
}

#[test]
fn manager_lists_manifests_in_plugin_dir() {
    let (manager, _dir, _bridge) = manager(&[]);
    assert_eq!(
        manager.available_plugins().unwrap(),
        vec!["broken", "extra", "good"]
    );
    assert!(manager.loaded_plugins().is_empty());
}

#[test]
fn load_plugins_starts_enabled_and_skips_missing() {
    let (manager, _dir, _bridge) = manager(&["good", "broken", "ghost"]);
    assert_eq!(manager.load_plugins(), 2);
    assert_eq!(manager.loaded_plugins(), vec!["broken", "good"]);
    assert!(!manager.is_loaded("ghost"));
    assert!(!manager.is_loaded("extra"));

    manager.close();
    assert!(manager.loaded_plugins().is_empty());
}

#[test]
fn search_all_maps_failing_plugins_to_empty() {
    let (manager, _dir, _bridge) = manager(&["good", "broken", "ghost"]);
    let results = manager.search_all("song", 1, 30, "all");
    assert_eq!(results.len(), 3);
    assert_eq!(results["good"].len(), 2);
    assert_eq!(results["good"][0].title, "Song");
    assert!(results["broken"].is_empty());
    assert!(results["ghost"].is_empty());
}

#[test]
fn unloaded_plugin_restarts_on_next_call() {
    let (manager, _dir, _bridge) = manager(&["good"]);
    manager.load_plugin("good").unwrap();
    assert!(manager.unload_plugin("good"));
    assert!(!manager.unload_plugin("good"));
    assert!(!manager.is_loaded("good"));

    let tracks = manager.search("good", "song", 1, 30, "kw").unwrap();
    assert_eq!(tracks.len(), 2);
    assert!(manager.is_loaded("good"));

    match manager.search("broken", "song", 1, 30, "kw") {
        Err(ManagerError::Client {
            name,
            source: ClientError::Plugin(message),
        }) => {
            assert_eq!(name, "broken");
            assert_eq!(message, "search backend down");
        }
        other => panic!("expected plugin error, got {other:?}"),
    }
}

#[test]
fn unknown_and_path_like_names_are_rejected() {
    let (manager, _dir, _bridge) = manager(&[]);
    assert!(matches!(
        manager.load_plugin("ghost"),
        Err(ManagerError::NotFound { .. })
    ));
    assert!(matches!(
        manager.load_plugin("../good"),
        Err(ManagerError::InvalidName(_))
    ));
    assert!(manager.loaded_plugins().is_empty());
}
