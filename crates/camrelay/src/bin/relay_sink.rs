//! Minimal relay-server endpoint for the camera stream.
//!
//! Accepts any number of camera connections, decodes the length-prefixed
//! frames and logs per-connection throughput. Optionally keeps the latest
//! frame of each connection on disk.

use argh::FromArgs;
use camrelay::transport::read_frame;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

#[derive(FromArgs)]
/// Receive framed JPEG streams from camrelay workers
struct Args {
    /// address to listen on
    #[argh(option, short = 'l', default = "String::from(\"0.0.0.0:8000\")")]
    listen: String,

    /// directory to write the latest frame of each connection to
    #[argh(option, short = 'o')]
    output_dir: Option<PathBuf>,

    /// largest accepted frame in bytes
    #[argh(option, default = "16 * 1024 * 1024")]
    max_frame: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    let (_shutdown_tx, shutdown_rx) = camrelay::shutdown::setup_shutdown()?;
    let mut accept_rx = shutdown_rx.clone();

    let listener = TcpListener::bind(&args.listen).await?;
    log::info!("Listening for camera streams on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            biased;

            _ = accept_rx.changed() => break,

            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        log::warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                log::info!("Camera stream connected from {}", peer);
                tokio::spawn(handle_stream(
                    socket,
                    peer,
                    args.output_dir.clone(),
                    args.max_frame,
                    shutdown_rx.clone(),
                ));
            }
        }
    }

    log::info!("Relay sink stopped");
    Ok(())
}

async fn handle_stream(
    mut socket: TcpStream,
    peer: SocketAddr,
    output_dir: Option<PathBuf>,
    max_frame: usize,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;
    let mut window_frames: u64 = 0;
    let mut last_log = Instant::now();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            frame = read_frame(&mut socket, max_frame) => frame,
        };

        match frame {
            Ok(Some(jpeg)) => {
                frames += 1;
                window_frames += 1;
                bytes += jpeg.len() as u64;

                if let Some(dir) = &output_dir {
                    let path = dir.join(format!("{}.jpg", peer.to_string().replace(':', "_")));
                    if let Err(e) = tokio::fs::write(&path, &jpeg).await {
                        log::warn!("[{}] Failed to write {}: {}", peer, path.display(), e);
                    }
                }

                let elapsed = last_log.elapsed();
                if elapsed >= Duration::from_secs(1) {
                    log::info!(
                        "[{}] {:.1} fps, {} frames, {} KiB total",
                        peer,
                        window_frames as f64 / elapsed.as_secs_f64(),
                        frames,
                        bytes / 1024
                    );
                    window_frames = 0;
                    last_log = Instant::now();
                }
            }
            Ok(None) => {
                log::info!("[{}] Stream closed after {} frames", peer, frames);
                break;
            }
            Err(e) => {
                log::warn!("[{}] Stream error after {} frames: {}", peer, frames, e);
                break;
            }
        }
    }
}
