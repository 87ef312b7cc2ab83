//! Relay live video from IP cameras to a remote collection server.
//!
//! Each discovered camera gets its own [`worker::Worker`], which pulls decoded
//! frames from a [`capture::CaptureSession`], compresses them to JPEG and
//! writes them length-prefixed over a dedicated TCP connection. Workers are
//! fully independent and recover from transport and capture failures on their
//! own; the [`supervisor::Supervisor`] only fans them out and joins them.

pub mod camera;
pub mod capture;
pub mod config;
pub mod discovery;
pub mod encode;
pub mod shutdown;
pub mod supervisor;
pub mod transport;
pub mod worker;

pub use camera::{CameraAddress, Credentials};
pub use config::{Config, ConfigError};
pub use supervisor::{Supervisor, WorkerReport};
pub use worker::{Worker, WorkerExit, WorkerSettings, WorkerState};
