//! Resolution through the bridge socket against a scripted bridge.
#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::share_code;
use demosync_core::{AccountKey, MatchId, ShareCode, StreamKind};
use demosync_sources::bridge::{BridgeEvent, BridgeRequest, BridgeSessionProvider};
use demosync_sync::resolver::resolve_batch;
use demosync_sync::{CheckpointStore, ResolveFailure, ResolvedMatch, ResolverOptions};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

fn account() -> AccountKey {
    AccountKey::from("76561198000000001")
}

fn options() -> ResolverOptions {
    ResolverOptions {
        ready_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_millis(300),
        quit_timeout: Duration::from_secs(2),
        concurrency: 1,
    }
}

/// Accept one session. Answers every submitted code except `silent` ones,
/// and records every request line it received.
fn spawn_bridge(socket: &Path, silent: Vec<u64>) -> Arc<Mutex<Vec<BridgeRequest>>> {
    let listener = UnixListener::bind(socket).expect("bind bridge socket");
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = received.clone();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: BridgeRequest = serde_json::from_str(&line).expect("request line");
            log.lock().unwrap().push(request.clone());
            let replies = match request.cmd.as_str() {
                "activate" => vec![
                    BridgeEvent::Ready,
                    BridgeEvent::RefreshToken {
                        token: "fresh-token".into(),
                    },
                ],
                "submit" => {
                    let code = ShareCode::parse(request.share_code.as_deref().unwrap_or_default())
                        .expect("valid code");
                    let id = code.match_id().expect("decodes");
                    if silent.contains(&id.0) {
                        Vec::new()
                    } else {
                        vec![BridgeEvent::Result(ResolvedMatch {
                            id,
                            match_time: 1_696_191_300,
                            replay_url: Some(format!(
                                "http://replay181.valve.net/730/{}_1573209442.dem.bz2",
                                id.padded()
                            )),
                            player_count: 10,
                            switched_teams: false,
                        })]
                    }
                }
                "deactivate" => vec![BridgeEvent::Quit],
                _ => Vec::new(),
            };
            for event in replies {
                let mut out = serde_json::to_string(&event).expect("event json");
                out.push('\n');
                if write.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });

    received
}

#[tokio::test]
async fn resolves_codes_and_stores_refresh_token() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("bridge.sock");
    let received = spawn_bridge(&socket, vec![2]);
    let store = CheckpointStore::new(&tmp.path().join("state"));
    let provider = BridgeSessionProvider::new(&socket);

    let codes = vec![share_code(1), share_code(2), share_code(3)];
    let report = resolve_batch(&provider, &store, &account(), &codes, &options()).await;

    let ids: Vec<MatchId> = report.resolved.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![MatchId(1), MatchId(3)]);
    assert_eq!(report.failed, vec![(MatchId(2), ResolveFailure::Timeout)]);
    assert_eq!(
        store
            .get(StreamKind::SessionRefreshToken, &account())
            .await
            .unwrap()
            .as_deref(),
        Some("fresh-token")
    );

    let received = received.lock().unwrap();
    let cmds: Vec<&str> = received.iter().map(|r| r.cmd.as_str()).collect();
    assert_eq!(
        cmds,
        vec!["login", "activate", "submit", "submit", "submit", "deactivate"]
    );
    assert_eq!(received[0].account.as_deref(), Some("76561198000000001"));
    assert_eq!(received[0].refresh_token, None);
}

#[tokio::test]
async fn missing_socket_fails_every_code() {
    let tmp = TempDir::new().unwrap();
    let store = CheckpointStore::new(&tmp.path().join("state"));
    let provider = BridgeSessionProvider::new(tmp.path().join("absent.sock"));

    let report = resolve_batch(&provider, &store, &account(), &[share_code(1)], &options()).await;

    assert!(report.resolved.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, ResolveFailure::SessionFault(_)));
}
