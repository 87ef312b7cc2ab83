use std::sync::Arc;
use tokio::sync::watch;

use crate::camera::CameraAddress;
use crate::capture::CaptureBackend;
use crate::encode::FrameEncoder;
use crate::transport::Connector;
use crate::worker::{Worker, WorkerExit, WorkerSettings};

/// How one worker ended
#[derive(Debug)]
pub struct WorkerReport {
    pub camera: CameraAddress,
    pub outcome: Result<WorkerExit, tokio::task::JoinError>,
}

/// Fans out one independent worker per camera and waits for all of them.
///
/// Workers share only the immutable factories (capture backend, connector,
/// encoder); each one opens its own capture session and connection.
pub struct Supervisor<B, C, E> {
    capture: Arc<B>,
    connector: Arc<C>,
    encoder: Arc<E>,
    settings: WorkerSettings,
}

impl<B, C, E> Supervisor<B, C, E>
where
    B: CaptureBackend + 'static,
    C: Connector + 'static,
    E: FrameEncoder + 'static,
{
    pub fn new(capture: B, connector: C, encoder: E, settings: WorkerSettings) -> Self {
        Self {
            capture: Arc::new(capture),
            connector: Arc::new(connector),
            encoder: Arc::new(encoder),
            settings,
        }
    }

    pub fn worker(&self, camera: CameraAddress) -> Worker<B, C, E> {
        Worker::new(
            camera,
            self.capture.clone(),
            self.connector.clone(),
            self.encoder.clone(),
            self.settings.clone(),
        )
    }

    /// Run one worker per camera until every worker has ended.
    ///
    /// Each worker gets a clone of `shutdown_rx`, so a signal already sent
    /// before this call still stops them. Returns one report per camera, in
    /// input order. An empty camera list returns immediately.
    pub async fn run(
        &self,
        cameras: Vec<CameraAddress>,
        shutdown_rx: &watch::Receiver<()>,
    ) -> Vec<WorkerReport> {
        if cameras.is_empty() {
            log::warn!("No cameras to stream");
            return Vec::new();
        }

        log::info!("Starting {} camera workers", cameras.len());

        let mut tasks = Vec::with_capacity(cameras.len());
        for camera in cameras {
            let worker = self.worker(camera);
            log::info!("Spawning worker for camera {}", worker.camera());
            let camera = worker.camera().clone();
            tasks.push((camera, tokio::spawn(worker.run(shutdown_rx.clone()))));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (camera, task) in tasks {
            let outcome = task.await;
            match &outcome {
                Ok(WorkerExit::Shutdown) => log::info!("[{}] Worker stopped", camera),
                Ok(WorkerExit::CaptureLost(e)) => {
                    log::error!("[{}] Worker ended, capture lost: {}", camera, e)
                }
                Err(e) => log::error!("[{}] Worker task failed: {}", camera, e),
            }
            reports.push(WorkerReport { camera, outcome });
        }

        log::info!("All camera workers have ended");
        reports
    }
}
