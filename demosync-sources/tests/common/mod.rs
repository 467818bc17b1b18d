//! Canned upstream servers for the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use demosync_core::{DecodedShareCode, MatchId, ShareCode};

pub fn share_code(id: u64) -> ShareCode {
    ShareCode::encode(&DecodedShareCode {
        match_id: MatchId(id),
        reservation_id: 42,
        tv_port: 7,
    })
}

pub fn fixture(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u16,
    pub body: String,
}

impl Canned {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Request lines (`GET /path?query HTTP/1.1`) and `Cookie` headers seen.
#[derive(Debug, Default)]
pub struct Seen {
    pub requests: Vec<String>,
    pub cookies: Vec<Option<String>>,
}

/// Answer one connection per canned response, in order, then stop.
pub async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let seen = Arc::new(Mutex::new(Seen::default()));
    let log = seen.clone();

    tokio::spawn(async move {
        for canned in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let head = String::from_utf8_lossy(&head).to_string();
            {
                let mut log = log.lock().unwrap();
                log.requests
                    .push(head.lines().next().unwrap_or_default().to_string());
                log.cookies.push(
                    head.lines()
                        .find_map(|l| l.strip_prefix("cookie: ").or_else(|| l.strip_prefix("Cookie: ")))
                        .map(str::to_owned),
                );
            }
            let response = format!(
                "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{}",
                canned.status,
                canned.body.len(),
                canned.body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (base, seen)
}
