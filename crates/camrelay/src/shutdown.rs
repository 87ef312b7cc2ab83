use tokio::sync::watch;

/// Set up a shutdown channel triggered by SIGINT/SIGTERM.
///
/// Returns the sender (for the signal handler) and a receiver that stays
/// alive for the whole run, so a signal that arrives before any worker starts
/// is not lost. Hand workers clones of the receiver.
pub fn setup_shutdown() -> anyhow::Result<(watch::Sender<()>, watch::Receiver<()>)> {
    let (tx, rx) = watch::channel(());
    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, shutting down gracefully...");
        let _ = shutdown_tx.send(());
    })?;
    Ok((tx, rx))
}
