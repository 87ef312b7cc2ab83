//! Scripted capture and transport doubles for worker tests

#![allow(dead_code)]

use async_trait::async_trait;
use camrelay::capture::{CaptureBackend, CaptureSession, Frame, OpenError};
use camrelay::encode::{EncodeError, FrameEncoder};
use camrelay::transport::{ConnectError, Connector, FrameSink, SendError, HEADER_LEN};
use camrelay::CameraAddress;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Everything the doubles observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    OpenFailed(String),
    CaptureClosed(String),
    Connected(u32),
    ConnectFailed,
    /// `seq` is the capture sequence recovered from the payload
    Sent { conn: u32, len: usize, seq: u32 },
    SendFailed(u32),
    ConnClosed(u32),
}

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    /// Sequence numbers of successfully sent frames, in send order
    pub fn sent_sequences(&self) -> Vec<u32> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Sent { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

/// One scripted read from a capture session
#[derive(Debug, Clone, Copy)]
pub enum Read {
    Frame,
    Empty,
}

/// Pixel value step between consecutive test frames, wide enough to survive
/// JPEG quantization
pub const LEVEL_STEP: u8 = 40;

/// Uniform 4x4 frame whose pixel value encodes `sequence` (valid up to 6)
/// Recover the sequence number from a test frame's pixel value
pub fn sequence_of(level: u8) -> u32 {
    (level as u32 + LEVEL_STEP as u32 / 2) / LEVEL_STEP as u32
}

pub fn test_frame(sequence: u32) -> Frame {
    Frame {
        data: vec![(sequence as u8).wrapping_mul(LEVEL_STEP); 4 * 4 * 3],
        width: 4,
        height: 4,
        pts: sequence as u64 * 33_000_000,
        sequence,
    }
}

/// Capture backend whose reads follow a shared script. When the script runs
/// out the session fires `on_exhausted` (if set) and then blocks forever, like
/// a healthy camera with nothing new to say.
#[derive(Clone)]
pub struct ScriptedCapture {
    log: EventLog,
    reads: Arc<Mutex<VecDeque<Read>>>,
    open_results: Arc<Mutex<VecDeque<bool>>>,
    failing_hosts: Vec<String>,
    on_exhausted: Option<watch::Sender<()>>,
    next_sequence: Arc<Mutex<u32>>,
}

impl ScriptedCapture {
    pub fn new(log: EventLog, reads: impl IntoIterator<Item = Read>) -> Self {
        Self {
            log,
            reads: Arc::new(Mutex::new(reads.into_iter().collect())),
            open_results: Arc::new(Mutex::new(VecDeque::new())),
            failing_hosts: Vec::new(),
            on_exhausted: None,
            next_sequence: Arc::default(),
        }
    }

    /// Successive `open` outcomes; once drained every open succeeds
    pub fn with_open_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        *self.open_results.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn with_failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.push(host.to_string());
        self
    }

    pub fn shutdown_when_exhausted(mut self, tx: watch::Sender<()>) -> Self {
        self.on_exhausted = Some(tx);
        self
    }
}

#[async_trait]
impl CaptureBackend for ScriptedCapture {
    type Session = ScriptedSession;

    async fn open(&self, camera: &CameraAddress) -> Result<ScriptedSession, OpenError> {
        let host = camera.host().to_string();
        let scripted_ok = self.open_results.lock().unwrap().pop_front().unwrap_or(true);
        if !scripted_ok || self.failing_hosts.contains(&host) {
            self.log.push(Event::OpenFailed(host.clone()));
            return Err(OpenError::Unavailable(format!("{host} unreachable")));
        }
        self.log.push(Event::Open(host.clone()));
        Ok(ScriptedSession {
            host,
            log: self.log.clone(),
            reads: self.reads.clone(),
            on_exhausted: self.on_exhausted.clone(),
            sequence: self.next_sequence.clone(),
            closed: false,
        })
    }
}

pub struct ScriptedSession {
    host: String,
    log: EventLog,
    reads: Arc<Mutex<VecDeque<Read>>>,
    on_exhausted: Option<watch::Sender<()>>,
    /// Shared across reopened sessions so numbering continues
    sequence: Arc<Mutex<u32>>,
    closed: bool,
}

#[async_trait]
impl CaptureSession for ScriptedSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(Read::Frame) => {
                let sequence = {
                    let mut next = self.sequence.lock().unwrap();
                    *next += 1;
                    *next - 1
                };
                Some(test_frame(sequence))
            }
            Some(Read::Empty) => None,
            None => {
                if let Some(tx) = &self.on_exhausted {
                    let _ = tx.send(());
                }
                std::future::pending().await
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.push(Event::CaptureClosed(self.host.clone()));
        }
    }
}

/// Connector whose connect and send outcomes follow scripts. Drained scripts
/// mean success.
#[derive(Clone)]
pub struct ScriptedConnector {
    log: EventLog,
    connect_results: Arc<Mutex<VecDeque<bool>>>,
    send_results: Arc<Mutex<VecDeque<bool>>>,
    connect_times: Arc<Mutex<Vec<Instant>>>,
    next_id: Arc<Mutex<u32>>,
}

impl ScriptedConnector {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            connect_results: Arc::default(),
            send_results: Arc::default(),
            connect_times: Arc::default(),
            next_id: Arc::default(),
        }
    }

    pub fn with_connect_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        *self.connect_results.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn with_send_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        *self.send_results.lock().unwrap() = results.into_iter().collect();
        self
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<ScriptedConnection, ConnectError> {
        self.connect_times.lock().unwrap().push(Instant::now());
        let ok = self.connect_results.lock().unwrap().pop_front().unwrap_or(true);
        if !ok {
            self.log.push(Event::ConnectFailed);
            return Err(ConnectError::Io {
                addr: self.target().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            });
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.log.push(Event::Connected(id));
        Ok(ScriptedConnection {
            id,
            log: self.log.clone(),
            send_results: self.send_results.clone(),
            closed: false,
        })
    }

    fn target(&self) -> &str {
        "relay.test:8000"
    }
}

pub struct ScriptedConnection {
    id: u32,
    log: EventLog,
    send_results: Arc<Mutex<VecDeque<bool>>>,
    closed: bool,
}

#[async_trait]
impl FrameSink for ScriptedConnection {
    async fn send(&mut self, wire: &[u8]) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        let ok = self.send_results.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            self.log.push(Event::Sent {
                conn: self.id,
                len: wire.len(),
                seq: wire.get(HEADER_LEN).copied().map(sequence_of).unwrap_or(0),
            });
            Ok(())
        } else {
            self.log.push(Event::SendFailed(self.id));
            Err(SendError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )))
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.push(Event::ConnClosed(self.id));
        }
    }
}

/// Passes raw pixels through, failing on chosen sequence numbers
#[derive(Default)]
pub struct RawEncoder {
    pub fail_sequences: Vec<u32>,
}

impl FrameEncoder for RawEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        if self.fail_sequences.contains(&frame.sequence) {
            return Err(EncodeError::BufferSize {
                width: frame.width,
                height: frame.height,
                expected: 0,
                actual: frame.data.len(),
            });
        }
        Ok(frame.data.clone())
    }
}

pub fn fast_settings() -> camrelay::WorkerSettings {
    camrelay::WorkerSettings {
        reconnect_backoff: Duration::from_secs(5),
        reopen_delay: Duration::from_millis(100),
        stats_interval: Duration::from_secs(1),
    }
}
