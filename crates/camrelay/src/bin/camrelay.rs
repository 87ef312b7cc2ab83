use argh::FromArgs;
use camrelay::capture::GstCapture;
use camrelay::config::Config;
use camrelay::discovery;
use camrelay::encode::JpegEncoder;
use camrelay::transport::TcpConnector;
use camrelay::{Supervisor, WorkerExit, WorkerSettings};
use std::time::Duration;

#[derive(FromArgs)]
/// Relay RTSP cameras on the local network to a remote server
struct Args {
    /// path to the configuration file
    #[argh(option, short = 'c', default = "String::from(\"config.yaml\")")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let args: Args = argh::from_env();

    let mut config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Failed to load config from '{}': {}", args.config, e);
            std::process::exit(1);
        }
    };
    config.camera.apply_env();

    log::info!(
        "Relay server {}, reconnect backoff {:?}",
        config.relay.address(),
        config.relay.reconnect_backoff()
    );
    if config.camera.credentials().is_none() {
        log::warn!("No camera credentials configured (set CAM_USER / CAM_PASSWORD)");
    }

    let (_shutdown_tx, shutdown_rx) = camrelay::shutdown::setup_shutdown()?;

    let discoverer = discovery::from_config(&config.discovery, config.camera.credentials());
    let discovered = {
        let mut rx = shutdown_rx.clone();
        tokio::select! {
            biased;
            _ = rx.changed() => None,
            result = discoverer.discover() => Some(result),
        }
    };
    let cameras = match discovered {
        None => {
            log::info!("Shutdown requested during discovery, exiting");
            return Ok(());
        }
        Some(Ok(cameras)) => cameras,
        Some(Err(e)) => {
            log::error!("Camera discovery failed: {}", e);
            Vec::new()
        }
    };

    if cameras.is_empty() {
        log::warn!("No cameras found matching the criteria, nothing to stream");
        return Ok(());
    }

    log::info!(
        "Found {} camera(s): {}",
        cameras.len(),
        cameras
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let supervisor = Supervisor::new(
        GstCapture::new(config.camera.clone(), config.relay.connect_timeout()),
        TcpConnector::new(
            config.relay.address(),
            config.relay.connect_timeout(),
            config.relay.write_timeout(),
        ),
        JpegEncoder::new(config.camera.jpeg_quality),
        WorkerSettings {
            reconnect_backoff: config.relay.reconnect_backoff(),
            reopen_delay: config.camera.reopen_delay(),
            stats_interval: Duration::from_secs(1),
        },
    );

    let reports = supervisor.run(cameras, &shutdown_rx).await;

    let lost = reports
        .iter()
        .filter(|r| !matches!(r.outcome, Ok(WorkerExit::Shutdown)))
        .count();
    if lost > 0 {
        log::warn!("{} of {} camera workers ended abnormally", lost, reports.len());
    }

    log::info!("All workers shut down, exiting");

    Ok(())
}
