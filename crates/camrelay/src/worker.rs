//! Per-camera streaming worker
//!
//! One worker owns one camera's capture session and at most one connection to
//! the relay server, and drives them through a small state machine:
//!
//! ```text
//!                 connect ok
//!   Disconnected -> Connecting -----------> Streaming
//!        ^            |    ^                  |
//!        |            +----+ connect error,   | send error
//!        |           wait fixed backoff       |
//!        +------------------------------------+
//! ```
//!
//! Transport failures never touch the capture session. An empty read reopens
//! the capture session in place and keeps streaming. The worker only ends on
//! shutdown or when reopening the capture session fails.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::camera::CameraAddress;
use crate::capture::{CaptureBackend, CaptureSession, Frame, OpenError};
use crate::encode::FrameEncoder;
use crate::transport::{encode_frame, Connector, FrameSink, SendError};

/// Connection state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Streaming,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Why a worker stopped
#[derive(Debug)]
pub enum WorkerExit {
    /// The shutdown signal fired
    Shutdown,
    /// The capture session could not be (re)opened
    CaptureLost(OpenError),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Fixed wait after a failed connect attempt
    pub reconnect_backoff: Duration,
    /// Pause between closing and reopening the capture session
    pub reopen_delay: Duration,
    /// How often streaming statistics are logged
    pub stats_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            reopen_delay: Duration::from_secs(1),
            stats_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of one pass through the streaming loop
enum Step {
    Continue,
    SendFailed(SendError),
    CaptureLost(OpenError),
    Shutdown,
}

struct StreamStats {
    sent: u64,
    dropped: u64,
    bytes: u64,
    reopens: u64,
    last_log: Instant,
}

impl StreamStats {
    fn new() -> Self {
        Self {
            sent: 0,
            dropped: 0,
            bytes: 0,
            reopens: 0,
            last_log: Instant::now(),
        }
    }
}

/// Streams one camera to the relay server until shutdown
pub struct Worker<B, C, E> {
    camera: CameraAddress,
    capture: Arc<B>,
    connector: Arc<C>,
    encoder: Arc<E>,
    settings: WorkerSettings,
    state_tx: watch::Sender<WorkerState>,
    stats: StreamStats,
}

impl<B, C, E> Worker<B, C, E>
where
    B: CaptureBackend,
    C: Connector,
    E: FrameEncoder + 'static,
{
    pub fn new(
        camera: CameraAddress,
        capture: Arc<B>,
        connector: Arc<C>,
        encoder: Arc<E>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            camera,
            capture,
            connector,
            encoder,
            settings,
            state_tx: watch::Sender::new(WorkerState::Disconnected),
            stats: StreamStats::new(),
        }
    }

    pub fn camera(&self) -> &CameraAddress {
        &self.camera
    }

    /// Follow state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, next: WorkerState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            log::debug!("[{}] {} -> {}", self.camera, prev, next);
        }
    }

    /// Close the connection (if any) and enter Disconnected
    async fn disconnect(&self, connection: &mut Option<C::Connection>) {
        if let Some(mut conn) = connection.take() {
            conn.close().await;
        }
        self.set_state(WorkerState::Disconnected);
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) -> WorkerExit {
        log::info!("[{}] Opening capture session", self.camera);
        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => return WorkerExit::Shutdown,
            opened = self.capture.open(&self.camera) => opened,
        };
        let mut session = match opened {
            Ok(s) => s,
            Err(e) => {
                log::error!("[{}] Failed to open capture: {}", self.camera, e);
                return WorkerExit::CaptureLost(e);
            }
        };

        let mut connection: Option<C::Connection> = None;
        let mut attempt: u64 = 0;

        let exit = loop {
            match self.state() {
                WorkerState::Disconnected => {
                    self.set_state(WorkerState::Connecting);
                }
                WorkerState::Connecting => {
                    attempt += 1;
                    log::info!(
                        "[{}] Connecting to {} (attempt {})",
                        self.camera,
                        self.connector.target(),
                        attempt
                    );
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break WorkerExit::Shutdown,
                        result = self.connector.connect() => result,
                    };
                    match result {
                        Ok(conn) => {
                            log::info!(
                                "[{}] Connected to {}, streaming",
                                self.camera,
                                self.connector.target()
                            );
                            connection = Some(conn);
                            attempt = 0;
                            self.stats.last_log = Instant::now();
                            self.set_state(WorkerState::Streaming);
                        }
                        Err(e) => {
                            log::error!(
                                "[{}] Connect attempt {} failed: {}; retrying in {:?}",
                                self.camera,
                                attempt,
                                e,
                                self.settings.reconnect_backoff
                            );
                            tokio::select! {
                                biased;
                                _ = shutdown.changed() => break WorkerExit::Shutdown,
                                _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
                            }
                        }
                    }
                }
                WorkerState::Streaming => {
                    let Some(conn) = connection.as_mut() else {
                        // Streaming always holds a connection; recover if not
                        self.set_state(WorkerState::Disconnected);
                        continue;
                    };
                    match self.stream_once(&mut session, conn, &mut shutdown).await {
                        Step::Continue => {}
                        Step::SendFailed(e) => {
                            log::error!(
                                "[{}] Connection lost while sending: {}; reconnecting",
                                self.camera,
                                e
                            );
                            self.disconnect(&mut connection).await;
                        }
                        Step::CaptureLost(e) => {
                            log::error!(
                                "[{}] Failed to reopen capture: {}; stopping worker",
                                self.camera,
                                e
                            );
                            self.disconnect(&mut connection).await;
                            session.close();
                            return WorkerExit::CaptureLost(e);
                        }
                        Step::Shutdown => break WorkerExit::Shutdown,
                    }
                }
            }
        };

        log::info!("[{}] Shutting down worker", self.camera);
        self.disconnect(&mut connection).await;
        session.close();
        exit
    }

    /// Pull one frame and push it to the relay. Frames that fail to encode or
    /// send are dropped, never retried.
    async fn stream_once(
        &mut self,
        session: &mut B::Session,
        conn: &mut C::Connection,
        shutdown: &mut watch::Receiver<()>,
    ) -> Step {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => return Step::Shutdown,
            frame = session.next_frame() => frame,
        };

        let Some(frame) = frame else {
            return self.reopen(session, shutdown).await;
        };

        let jpeg = match self.encode(frame).await {
            Some(jpeg) => jpeg,
            None => {
                self.stats.dropped += 1;
                return Step::Continue;
            }
        };

        let wire = match encode_frame(&jpeg) {
            Ok(wire) => wire,
            Err(e) => {
                log::error!("[{}] Dropping frame: {}", self.camera, e);
                self.stats.dropped += 1;
                return Step::Continue;
            }
        };

        let sent = tokio::select! {
            biased;
            _ = shutdown.changed() => return Step::Shutdown,
            sent = conn.send(&wire) => sent,
        };

        match sent {
            Ok(()) => {
                self.stats.sent += 1;
                self.stats.bytes += wire.len() as u64;
                self.log_stats();
                Step::Continue
            }
            Err(e) => {
                self.stats.dropped += 1;
                Step::SendFailed(e)
            }
        }
    }

    async fn encode(&self, frame: Frame) -> Option<Vec<u8>> {
        let encoder = self.encoder.clone();
        match tokio::task::spawn_blocking(move || encoder.encode(&frame)).await {
            Ok(Ok(jpeg)) => Some(jpeg),
            Ok(Err(e)) => {
                log::warn!("[{}] Failed to encode frame: {}", self.camera, e);
                None
            }
            Err(e) => {
                log::error!("[{}] Encoder task failed: {}", self.camera, e);
                None
            }
        }
    }

    /// Close and reopen the capture session, leaving the connection alone
    async fn reopen(
        &mut self,
        session: &mut B::Session,
        shutdown: &mut watch::Receiver<()>,
    ) -> Step {
        log::warn!(
            "[{}] Empty frame from camera, reopening capture",
            self.camera
        );
        session.close();
        self.stats.reopens += 1;

        tokio::select! {
            biased;
            _ = shutdown.changed() => return Step::Shutdown,
            _ = tokio::time::sleep(self.settings.reopen_delay) => {}
        }

        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => return Step::Shutdown,
            opened = self.capture.open(&self.camera) => opened,
        };

        match opened {
            Ok(fresh) => {
                *session = fresh;
                log::info!("[{}] Capture reopened", self.camera);
                Step::Continue
            }
            Err(e) => Step::CaptureLost(e),
        }
    }

    fn log_stats(&mut self) {
        if self.stats.last_log.elapsed() < self.settings.stats_interval {
            return;
        }
        log::info!(
            "[{}] {}: {} frames sent, {} dropped, {} KiB, {} reopens",
            self.camera,
            self.state(),
            self.stats.sent,
            self.stats.dropped,
            self.stats.bytes / 1024,
            self.stats.reopens
        );
        self.stats.last_log = Instant::now();
    }
}
