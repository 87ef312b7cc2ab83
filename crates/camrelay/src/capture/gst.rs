use async_trait::async_trait;
use gstreamer::prelude::*;
use std::time::Duration;

use super::{CaptureBackend, CaptureSession, Frame, OpenError};
use crate::camera::CameraAddress;
use crate::config::CameraSettings;

/// Decoded frames buffered between the appsink thread and the worker
const FRAME_QUEUE_DEPTH: usize = 3;

/// Opens RTSP sources through GStreamer and decodes them to RGB24
#[derive(Debug, Clone)]
pub struct GstCapture {
    settings: CameraSettings,
    open_timeout: Duration,
}

impl GstCapture {
    pub fn new(settings: CameraSettings, open_timeout: Duration) -> Self {
        Self {
            settings,
            open_timeout,
        }
    }

    /// Pipeline description for one camera.
    ///
    /// ```text
    /// rtspsrc ! decodebin ! videoconvert ! videoscale ! video/x-raw,format=RGB ! appsink
    /// ```
    pub fn pipeline_description(&self, url: &str) -> String {
        let size = match self.settings.resize {
            Some(r) if r.is_enabled() => format!(",width={},height={}", r.width, r.height),
            _ => String::new(),
        };
        format!(
            "rtspsrc location=\"{url}\" latency={latency} protocols=tcp ! \
             decodebin ! \
             videoconvert ! \
             videoscale ! \
             video/x-raw,format=RGB{size} ! \
             appsink name=sink emit-signals=true sync=false max-buffers=1 drop=true",
            latency = self.settings.latency,
        )
    }

    fn handle_sample(sink: &gstreamer_app::AppSink, sequence: u32) -> Result<Frame, String> {
        let sample = sink.pull_sample().map_err(|e| e.to_string())?;

        let caps = sample.caps().ok_or("sample without caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps).map_err(|e| e.to_string())?;

        let buffer = sample.buffer().ok_or("sample without buffer")?;
        let pts = buffer.pts().map(|t| t.nseconds()).unwrap_or(0);
        let map = buffer.map_readable().map_err(|e| e.to_string())?;

        let width = info.width();
        let height = info.height();
        let row = width as usize * 3;
        let stride = info.stride().first().copied().unwrap_or(row as i32) as usize;

        // RGB rows are padded to 4-byte boundaries by GStreamer
        let data = if stride == row {
            map.as_slice()[..row * height as usize].to_vec()
        } else {
            let src = map.as_slice();
            let mut packed = Vec::with_capacity(row * height as usize);
            for y in 0..height as usize {
                let start = y * stride;
                packed.extend_from_slice(&src[start..start + row]);
            }
            packed
        };

        Ok(Frame {
            data,
            width,
            height,
            pts,
            sequence,
        })
    }
}

#[async_trait]
impl CaptureBackend for GstCapture {
    type Session = GstSession;

    async fn open(&self, camera: &CameraAddress) -> Result<GstSession, OpenError> {
        gstreamer::init()?;

        let url = camera.rtsp_url(&self.settings);
        log::debug!(
            "[{}] Creating pipeline: {}",
            camera,
            self.pipeline_description(&CameraAddress::new(camera.host()).rtsp_url(&self.settings))
        );

        let pipeline = gstreamer::parse::launch(&self.pipeline_description(&url))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| OpenError::DowncastError)?;

        let sink = pipeline
            .by_name("sink")
            .ok_or(OpenError::ElementNotFound)?
            .dynamic_cast::<gstreamer_app::AppSink>()
            .map_err(|_| OpenError::DowncastError)?;

        let (frame_tx, frame_rx) = flume::bounded::<Frame>(FRAME_QUEUE_DEPTH);
        let (eos_tx, eos_rx) = flume::unbounded::<String>();

        let name = camera.to_string();
        sink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample({
                    let mut seq: u32 = 0;
                    let name = name.clone();
                    move |sink| {
                        match Self::handle_sample(sink, seq) {
                            Ok(frame) => {
                                seq = seq.wrapping_add(1);
                                if let Err(flume::TrySendError::Full(_)) = frame_tx.try_send(frame)
                                {
                                    log::debug!("[{}] Frame queue full, dropping frame", name);
                                }
                            }
                            Err(e) => log::warn!("[{}] Bad sample: {}", name, e),
                        }
                        Ok(gstreamer::FlowSuccess::Ok)
                    }
                })
                .build(),
        );

        if let Some(bus) = pipeline.bus() {
            let name = name.clone();
            bus.set_sync_handler(move |_, msg| {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => {
                        let _ = eos_tx.send("end of stream".to_string());
                    }
                    gstreamer::MessageView::Error(err) => {
                        log::debug!("[{}] Pipeline error: {:?}", name, err.debug());
                        let _ = eos_tx.send(err.error().to_string());
                    }
                    _ => {}
                }
                gstreamer::BusSyncReply::Drop
            });
        }

        let mut session = GstSession {
            pipeline,
            frame_rx,
            eos_rx,
            read_timeout: self.settings.read_timeout(),
            camera: name,
            closed: false,
        };

        if let Err(e) = session.pipeline.set_state(gstreamer::State::Playing) {
            let reason = session.eos_rx.try_recv().ok();
            session.close();
            return Err(match reason {
                Some(reason) => OpenError::Unavailable(reason),
                None => OpenError::StateChange(e),
            });
        }

        // Blocks until rtspsrc has negotiated with the camera or gives up
        let pipeline = session.pipeline.clone();
        let timeout = gstreamer::ClockTime::from_mseconds(self.open_timeout.as_millis() as u64);
        let state = tokio::task::spawn_blocking(move || pipeline.state(timeout).0).await;

        let failure = match state {
            Ok(Ok(gstreamer::StateChangeSuccess::Async)) => Some(OpenError::Timeout(self.open_timeout)),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(match session.eos_rx.try_recv() {
                Ok(reason) => OpenError::Unavailable(reason),
                Err(_) => OpenError::StateChange(e),
            }),
            Err(e) => Some(OpenError::Unavailable(e.to_string())),
        };

        if let Some(err) = failure {
            session.close();
            return Err(err);
        }

        Ok(session)
    }
}

/// A running GStreamer pipeline for one camera
pub struct GstSession {
    pipeline: gstreamer::Pipeline,
    frame_rx: flume::Receiver<Frame>,
    eos_rx: flume::Receiver<String>,
    read_timeout: Duration,
    camera: String,
    closed: bool,
}

#[async_trait]
impl CaptureSession for GstSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        if self.closed {
            return None;
        }

        tokio::select! {
            biased;

            reason = self.eos_rx.recv_async() => {
                if let Ok(reason) = reason {
                    log::warn!("[{}] Capture stopped: {}", self.camera, reason);
                }
                None
            }

            frame = self.frame_rx.recv_async() => frame.ok(),

            _ = tokio::time::sleep(self.read_timeout) => {
                log::warn!(
                    "[{}] No frame decoded within {:?}",
                    self.camera,
                    self.read_timeout
                );
                None
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.pipeline.send_event(gstreamer::event::Eos::new());
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::debug!("[{}] Failed to stop pipeline: {}", self.camera, e);
        }
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resize;

    #[test]
    fn test_pipeline_native_size() {
        let capture = GstCapture::new(CameraSettings::default(), Duration::from_secs(10));
        let desc = capture.pipeline_description("rtsp://10.0.0.5:554/Streaming/Channels/102");
        assert!(desc.starts_with("rtspsrc location=\"rtsp://10.0.0.5:554/Streaming/Channels/102\""));
        assert!(desc.contains("latency=200"));
        assert!(desc.contains("video/x-raw,format=RGB !"));
        assert!(desc.contains("max-buffers=1 drop=true"));
    }

    #[test]
    fn test_pipeline_with_resize() {
        let settings = CameraSettings {
            resize: Some(Resize {
                width: 720,
                height: 480,
            }),
            ..Default::default()
        };
        let capture = GstCapture::new(settings, Duration::from_secs(10));
        let desc = capture.pipeline_description("rtsp://cam/stream");
        assert!(desc.contains("video/x-raw,format=RGB,width=720,height=480"));
    }

    #[test]
    fn test_pipeline_ignores_zero_resize() {
        let settings = CameraSettings {
            resize: Some(Resize {
                width: 0,
                height: 480,
            }),
            ..Default::default()
        };
        let capture = GstCapture::new(settings, Duration::from_secs(10));
        assert!(!capture
            .pipeline_description("rtsp://cam/stream")
            .contains("width="));
    }
}
