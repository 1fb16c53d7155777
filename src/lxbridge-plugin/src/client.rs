//! Supervising-side client: spawns the bridge process and talks to it over stdio.

use crate::adapter;
use crate::protocol::{
    AlbumParams, ArtistParams, LyricParams, MediaSourceOptions, MediaSourceParams, Method,
    Outbound, RecommendParams, Request, RequestId, Response, SearchParams, READY_EVENT,
};
use lxbridge_core::models::{Album, Artist, MediaSource, Track};
use lxbridge_core::ClientConfig;
use serde::Serialize;
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from the supervising client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to spawn bridge process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("bridge process has no stdin")]
    NoStdin,
    #[error("bridge process has no stdout")]
    NoStdout,
    #[error("failed to write to bridge: {0}")]
    WriteError(std::io::Error),
    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),
    #[error("module failed to load: {0}")]
    InitFailed(String),
    #[error("no readiness notification within {0:?}")]
    InitTimeout(Duration),
    #[error("no response to request {id} within {timeout:?}")]
    RequestTimeout { id: u64, timeout: Duration },
    #[error("module returned error: {0}")]
    Plugin(String),
    #[error("request/response ID mismatch: sent {sent}, received {received:?}")]
    IdMismatch {
        sent: u64,
        received: Option<RequestId>,
    },
    #[error("bridge process terminated unexpectedly")]
    ProcessTerminated,
}

/// How to launch the bridge for one module.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub executable: PathBuf,
    /// Module manifest passed as the bridge's only positional argument.
    pub module: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub init_timeout: Duration,
    pub request_timeout: Duration,
}

impl SpawnConfig {
    pub fn new(client: &ClientConfig, module: impl Into<PathBuf>) -> Self {
        Self {
            executable: client.executable.clone(),
            module: module.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            init_timeout: client.init_timeout(),
            request_timeout: client.request_timeout(),
        }
    }
}

/// A running bridge process hosting one module.
pub struct BridgeClient {
    config: SpawnConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    lines: Mutex<Option<Receiver<String>>>,
    request_id: AtomicU64,
    sources: Mutex<Option<Value>>,
}

impl BridgeClient {
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            lines: Mutex::new(None),
            request_id: AtomicU64::new(1),
            sources: Mutex::new(None),
        }
    }

    /// Spawns the bridge and waits for its readiness notification.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .arg(&self.config.module)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(ClientError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(ClientError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(ClientError::NoStdout)?;

        // A reader thread turns blocking reads into a channel we can wait on
        // with a deadline.
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        *self.child.lock().unwrap() = Some(child);
        *self.stdin.lock().unwrap() = Some(stdin);
        *self.lines.lock().unwrap() = Some(rx);

        if let Err(err) = self.wait_ready() {
            let _ = self.stop();
            return Err(err);
        }
        tracing::info!(module = %self.config.module.display(), "Bridge ready");
        Ok(())
    }

    /// Stop the bridge process.
    pub fn stop(&self) -> Result<(), ClientError> {
        // Closing stdin ends the bridge's read loop.
        *self.stdin.lock().unwrap() = None;

        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        *self.lines.lock().unwrap() = None;
        Ok(())
    }

    /// Check if the bridge process is running.
    pub fn is_running(&self) -> bool {
        self.child
            .lock()
            .unwrap()
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    /// Data the module sent with its `inited` event, typically its source table.
    pub fn sources(&self) -> Option<Value> {
        self.sources.lock().unwrap().clone()
    }

    fn wait_ready(&self) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.init_timeout;
        loop {
            let line = self
                .next_line(deadline)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => ClientError::InitTimeout(self.config.init_timeout),
                    RecvTimeoutError::Disconnected => ClientError::ProcessTerminated,
                })?;
            match parse_line(&line) {
                Some(Outbound::Event(event)) if event.event == READY_EVENT => {
                    tracing::debug!(data = %event.data, "Module sources announced");
                    *self.sources.lock().unwrap() = Some(event.data);
                }
                Some(Outbound::Response(resp)) if resp.is_ready() => return Ok(()),
                Some(Outbound::Response(Response {
                    id: None,
                    error: Some(message),
                    ..
                })) => return Err(ClientError::InitFailed(message)),
                Some(other) => tracing::debug!(?other, "Ignoring message during startup"),
                None => tracing::debug!(%line, "Ignoring non-JSON line during startup"),
            }
        }
    }

    fn next_line(&self, deadline: Instant) -> Result<String, RecvTimeoutError> {
        let guard = self.lines.lock().unwrap();
        let rx = guard.as_ref().ok_or(RecvTimeoutError::Disconnected)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        rx.recv_timeout(remaining)
    }

    /// Send one request and wait for its response.
    pub fn send_request(&self, method: Method, params: impl Serialize) -> Result<Value, ClientError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id: id.into(),
            method: method.as_str().to_string(),
            params: serde_json::to_value(params).map_err(ClientError::Encode)?,
        };
        let json = serde_json::to_string(&request).map_err(ClientError::Encode)?;

        {
            let mut stdin_guard = self.stdin.lock().unwrap();
            let stdin = stdin_guard
                .as_mut()
                .ok_or(ClientError::ProcessTerminated)?;
            writeln!(stdin, "{}", json).map_err(ClientError::WriteError)?;
            stdin.flush().map_err(ClientError::WriteError)?;
        }

        let timeout = self.config.request_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let line = self.next_line(deadline).map_err(|err| match err {
                RecvTimeoutError::Timeout => ClientError::RequestTimeout { id, timeout },
                RecvTimeoutError::Disconnected => ClientError::ProcessTerminated,
            })?;
            let response = match parse_line(&line) {
                Some(Outbound::Response(resp)) => resp,
                Some(Outbound::Event(event)) => {
                    tracing::debug!(event = %event.event, "Ignoring module event");
                    continue;
                }
                None => {
                    tracing::warn!(%line, "Ignoring non-JSON line from bridge");
                    continue;
                }
            };

            match response.id.as_ref() {
                Some(RequestId::Number(n)) if n.as_u64() == Some(id) => {}
                // Late answer to a request that already timed out.
                Some(RequestId::Number(n)) if n.as_u64().is_some_and(|n| n < id) => {
                    tracing::warn!(stale = %n, current = id, "Dropping stale response");
                    continue;
                }
                _ => {
                    return Err(ClientError::IdMismatch {
                        sent: id,
                        received: response.id,
                    })
                }
            }

            if let Some(message) = response.error {
                return Err(ClientError::Plugin(message));
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }

    pub fn search(
        &self,
        keyword: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Track>, ClientError> {
        tracing::info!(keyword, page, limit, source, "Search");
        let result = self.send_request(
            Method::Search,
            SearchParams {
                keyword: keyword.to_string(),
                page,
                limit,
                source: source.to_string(),
                options: None,
            },
        )?;
        let tracks = adapter::adapt_search_result(&result);
        tracing::info!(count = tracks.len(), "Search finished");
        Ok(tracks)
    }

    pub fn media_source(
        &self,
        music_item: Value,
        source: &str,
        quality: &str,
    ) -> Result<Option<MediaSource>, ClientError> {
        let result = self.send_request(
            Method::GetMediaSource,
            MediaSourceParams {
                music_item,
                source: source.to_string(),
                options: MediaSourceOptions {
                    quality: quality.to_string(),
                    ..MediaSourceOptions::default()
                },
            },
        )?;
        Ok(adapter::adapt_media_source(&result))
    }

    pub fn lyric(&self, music_item: Value, source: &str) -> Result<Option<String>, ClientError> {
        let result = self.send_request(
            Method::GetLyric,
            LyricParams {
                music_item,
                source: source.to_string(),
                options: None,
            },
        )?;
        Ok(adapter::adapt_lyric(&result))
    }

    pub fn album(
        &self,
        album_id: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Album>, ClientError> {
        let result = self.send_request(
            Method::GetAlbum,
            AlbumParams {
                album_id: Value::from(album_id),
                page,
                limit,
                source: source.to_string(),
                options: None,
            },
        )?;
        Ok(adapter::adapt_album_result(&result))
    }

    pub fn artist(
        &self,
        artist_id: &str,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Artist>, ClientError> {
        let result = self.send_request(
            Method::GetArtist,
            ArtistParams {
                artist_id: Value::from(artist_id),
                page,
                limit,
                source: source.to_string(),
                options: None,
            },
        )?;
        Ok(adapter::adapt_artist_result(&result))
    }

    pub fn recommend(
        &self,
        music_item: Value,
        page: u32,
        limit: u32,
        source: &str,
    ) -> Result<Vec<Track>, ClientError> {
        let result = self.send_request(
            Method::GetRecommend,
            RecommendParams {
                music_item,
                page,
                limit,
                source: source.to_string(),
                options: None,
            },
        )?;
        Ok(adapter::adapt_recommend_result(&result))
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn parse_line(line: &str) -> Option<Outbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}
