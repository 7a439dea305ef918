use std::collections::HashMap;
use std::env;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::settings::Settings;

mod error;
mod pipeline;
mod settings;
mod setup_tracing;
mod state_store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e.into());
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> error::Result<()> {
    let vars: HashMap<String, String> = env::vars().collect();
    let settings = Settings::try_from(vars)?;
    info!(
        topic = %settings.sink.topic,
        semantics = ?settings.sink.semantics,
        subtask_index = settings.context.subtask_index,
        "Starting sink"
    );

    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();

    // wait for SIG{INT,TERM} and invoke cancellation token.
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let result = pipeline::run(settings, cln_token).await;
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Failed to install terminate signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
