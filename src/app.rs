use crate::config::Config;
use crate::feedback::FeedbackLog;
use crate::pipeline::Pipeline;
use crate::predictor::{HostedPredictor, PredictionParams};
use crate::server::{HttpServer, SharedState};
use crate::staging::StagingArea;
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let predictor = match HostedPredictor::new(&config.predictor) {
        Ok(predictor) => Arc::new(predictor),
        Err(e) => {
            tracing::error!("Failed to initialize segmentation client: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let staging = StagingArea::new(&config.storage.image_dir);
    if let Err(e) = staging.ensure().await {
        tracing::warn!("Staging directory not ready yet: {}", e);
    }

    let params = PredictionParams {
        confidence: config.predictor.confidence,
        overlap: config.predictor.overlap,
    };
    let pipeline = Pipeline::new(staging, predictor, params);

    let state = SharedState {
        pipeline: Arc::new(pipeline),
        feedback: Arc::new(FeedbackLog::new(&config.storage.feedback_path)),
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server_handle.await {
        tracing::error!("Server stopped with error: {:?}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
