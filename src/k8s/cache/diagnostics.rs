use super::factory::InformerFactory;
use crate::error::Result;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Log the live informers each time the process receives SIGUSR2.
///
/// # Errors
///
/// Returns an error if the signal handler cannot be installed
pub fn spawn(factory: Arc<InformerFactory>, stop: CancellationToken) -> Result<JoinHandle<()>> {
    let mut signals = signal(SignalKind::user_defined2())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                received = signals.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match factory.resources() {
                        Ok(resources) => {
                            let names: Vec<String> = resources.iter().map(ToString::to_string).collect();
                            info!("dynamic cache status: {} informers [{}]", names.len(), names.join(", "));
                        }
                        Err(e) => warn!("dynamic cache status unavailable: {e}"),
                    }
                }
            }
        }
        debug!("dynamic cache status exiting");
    }))
}
