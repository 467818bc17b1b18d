//! Game-coordinator sessions through an external bridge process.
//!
//! The bridge owns the Steam login and the coordinator connection. We talk
//! to it over a unix socket with newline-delimited JSON: one
//! [`BridgeRequest`] per command line, one [`BridgeEvent`] per event line.
//! Each connection is one session.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use demosync_core::{AccountKey, ShareCode};
use demosync_sync::{
    ResolvedMatch, Session, SessionError, SessionEvent, SessionHandle, SessionProvider,
};

const EVENT_BUFFER: usize = 64;

/// One command line sent to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_code: Option<String>,
}

impl BridgeRequest {
    fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            account: None,
            refresh_token: None,
            share_code: None,
        }
    }

    pub fn login(account: &AccountKey, refresh_token: Option<&str>) -> Self {
        Self {
            account: Some(account.to_string()),
            refresh_token: refresh_token.map(str::to_owned),
            ..Self::command("login")
        }
    }

    pub fn activate() -> Self {
        Self::command("activate")
    }

    pub fn submit(code: &ShareCode) -> Self {
        Self {
            share_code: Some(code.as_str().to_string()),
            ..Self::command("submit")
        }
    }

    pub fn deactivate() -> Self {
        Self::command("deactivate")
    }
}

/// One event line received from the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    Ready,
    Result(ResolvedMatch),
    Quit,
    RefreshToken { token: String },
    Fault { reason: String },
}

impl From<BridgeEvent> for SessionEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Ready => SessionEvent::Ready,
            BridgeEvent::Result(m) => SessionEvent::Result(m),
            BridgeEvent::Quit => SessionEvent::Quit,
            BridgeEvent::RefreshToken { token } => SessionEvent::RefreshToken(token),
            BridgeEvent::Fault { reason } => SessionEvent::Fault(reason),
        }
    }
}

pub struct BridgeSessionProvider {
    socket: PathBuf,
}

impl BridgeSessionProvider {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for BridgeSessionProvider {
    async fn connect(
        &self,
        account: &AccountKey,
        refresh_token: Option<&str>,
    ) -> Result<SessionHandle, SessionError> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            SessionError::Connect(format!("{}: {e}", self.socket.display()))
        })?;
        let (read, write) = stream.into_split();
        let writer = Mutex::new(write);
        send_line(&writer, &BridgeRequest::login(account, refresh_token)).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(read, tx));
        tracing::debug!(account = %account, socket = %self.socket.display(), "bridge session opened");
        Ok(SessionHandle {
            session: Box::new(BridgeSession { writer, reader }),
            events: rx,
        })
    }
}

/// Forward event lines until EOF. Dropping `tx` ends the event stream.
async fn read_events(read: OwnedReadHalf, tx: mpsc::Sender<SessionEvent>) {
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                let _ = tx.send(SessionEvent::Fault(format!("bridge read: {err}"))).await;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeEvent>(&line) {
            Ok(event) => {
                if tx.send(event.into()).await.is_err() {
                    break;
                }
            }
            Err(err) => tracing::warn!(error = %err, "ignoring unparseable bridge event"),
        }
    }
    tracing::debug!("bridge event stream ended");
}

async fn send_line(
    writer: &Mutex<OwnedWriteHalf>,
    request: &BridgeRequest,
) -> Result<(), SessionError> {
    let mut line =
        serde_json::to_string(request).map_err(|e| SessionError::Protocol(e.to_string()))?;
    line.push('\n');
    let mut writer = writer.lock().await;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|_| SessionError::Closed)?;
    writer.flush().await.map_err(|_| SessionError::Closed)
}

struct BridgeSession {
    writer: Mutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

impl BridgeSession {
    async fn send(&self, request: &BridgeRequest) -> Result<(), SessionError> {
        send_line(&self.writer, request).await
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Session for BridgeSession {
    async fn activate(&self) -> Result<(), SessionError> {
        self.send(&BridgeRequest::activate()).await
    }

    async fn submit(&self, code: &ShareCode) -> Result<(), SessionError> {
        self.send(&BridgeRequest::submit(code)).await
    }

    async fn deactivate(&self) -> Result<(), SessionError> {
        self.send(&BridgeRequest::deactivate()).await
    }
}
