//! Wiring the engine from a config file.

use std::sync::Arc;

use demosync_core::config::load_from;
use demosync_sources::engine_from_config;
use demosync_sync::CheckpointStore;
use tempfile::TempDir;

const CONFIG: &str = r#"
steam_api_key: "KEY"
session_bridge: /tmp/demosync-test-bridge.sock
accounts:
  - steam_id64: "76561198000000001"
    gcpd:
      cookie: "steamLoginSecure=abc"
  - steam_id64: "76561198000000002"
    share_code:
      auth_code: "AAAA-BBBBB-CCCC"
      oldest_share_code: "CSGO-JP4n8-EhvPq-aDet5-XOEhk-OijDA"
"#;

#[test]
fn builds_engine_without_touching_state() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("config.yaml");
    std::fs::write(&path, CONFIG).unwrap();
    let config = load_from(&path).expect("valid config");

    let store = Arc::new(CheckpointStore::new(&config.state_dir_at(tmp.path())));
    let engine = engine_from_config(&config, tmp.path(), store.clone()).expect("engine");

    assert_eq!(engine.store().path(), store.path());
    assert!(!store.path().exists(), "building the engine never writes state");
}
