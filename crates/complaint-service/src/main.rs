use anyhow::Result;
use complaint_service::{
    api,
    capture::{camera::SharedCamera, ConfiguredGeolocator, V4l2Camera},
    classifier,
    config::ComplaintServiceConfig,
    geocode::LocationIqGeocoder,
    ComplaintServiceState,
};
use std::sync::Arc;
use telemetry::LogConfig;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment
    let config = ComplaintServiceConfig::from_env()?;

    telemetry::init_structured_logging(
        LogConfig::new("complaint-service")
            .with_version(common::VERSION)
            .with_node_id(config.node_id.clone()),
    );

    info!(
        bind = %config.bind_addr,
        node_id = %config.node_id,
        model = %config.model_location,
        backend = ?config.classifier_backend,
        session_idle_ttl_secs = config.session_idle_ttl.as_secs(),
        "Complaint service configuration loaded"
    );

    let mut builder = ComplaintServiceState::builder(config.node_id.clone())
        .policy(config.validation.clone())
        .camera(SharedCamera::new(Arc::new(V4l2Camera::new(
            config.camera.clone(),
        ))))
        .geolocator(Arc::new(ConfiguredGeolocator::new(config.device_location)));

    // A missing model leaves the service up but not ready
    match classifier::load(&config).await {
        Ok(classifier) => {
            let info = classifier.info();
            info!(
                model = %info.name,
                classes = info.class_count,
                labels = ?info.labels,
                "Classifier loaded"
            );
            builder = builder.classifier(classifier);
        }
        Err(e) => {
            error!(error = %e, "Classifier unavailable; validation disabled");
            builder = builder.model_error(e);
        }
    }

    match config.geocode.clone() {
        Some(geocode) => {
            info!(base_url = %geocode.base_url, "Reverse geocoding enabled");
            builder = builder.geocoder(Arc::new(LocationIqGeocoder::new(geocode)?));
        }
        None => warn!("GEOCODE_API_KEY not set; reverse geocoding disabled"),
    }

    let state = builder.build();
    state.spawn_reaper(config.session_idle_ttl);
    let app = api::router(state.clone());

    // Bind and serve
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Complaint service listening on {}", config.bind_addr);

    // Run with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: ComplaintServiceState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown().await;
}
