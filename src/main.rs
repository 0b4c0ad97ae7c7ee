use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum::body::Body;
use http::{HeaderValue, StatusCode};
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};

mod config;
mod db;
mod error;
mod routes;
mod services;

use config::Config;
use services::clock::Clock;
use services::delivery::{DeliverySettings, DeliveryWorker};
use services::directory::BookingDirectory;
use services::gateway::MessageGateway;
use services::init;
use services::message_log::MessageLogSink;
use services::queue_store::QueueStore;
use services::scheduler::ScheduleSynchronizer;
use services::templates::default_templates;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QueueStore>,
    pub directory: Arc<dyn BookingDirectory>,
    pub message_log: Arc<dyn MessageLogSink>,
    pub synchronizer: ScheduleSynchronizer,
    pub worker: DeliveryWorker,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn QueueStore>,
        directory: Arc<dyn BookingDirectory>,
        gateway: Arc<dyn MessageGateway>,
        message_log: Arc<dyn MessageLogSink>,
        clock: Arc<dyn Clock>,
        settings: DeliverySettings,
    ) -> Self {
        let synchronizer = ScheduleSynchronizer::new(
            store.clone(),
            directory.clone(),
            clock.clone(),
            default_templates(),
        );
        let worker = DeliveryWorker::new(
            store.clone(),
            directory.clone(),
            gateway,
            message_log.clone(),
            clock,
            settings,
            default_templates(),
        );

        Self {
            config,
            store,
            directory,
            message_log,
            synchronizer,
            worker,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appointment_notifications=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting Appointment Notifications Service");

    // Initialize database
    let pool = init::init_db(&config).await?;

    let app_state = Arc::new(init::build_state(config.clone(), pool)?);

    // Create shutdown notifier for background workers and std threads
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Spawn background workers (returns JoinHandles so we can await shutdown)
    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Delivery triggers call the external gateway, so they are rate limited per client IP.
    // The error handler returns a proper 429 status and Retry-After header when limits are exceeded.
    let mut trigger_builder = GovernorConfigBuilder::default();
    trigger_builder.per_second(config.rate_limit.trigger_per_second.into());
    trigger_builder.burst_size(config.rate_limit.trigger_burst);
    trigger_builder.key_extractor(SmartIpKeyExtractor);
    trigger_builder.error_handler(|error: GovernorError| -> http::Response<Body> {
        match error {
            GovernorError::TooManyRequests { wait_time, headers } => {
                // `wait_time` is provided as seconds
                let retry_after = wait_time;

                // Use the same error shape as `AppError::RateLimited -> IntoResponse`
                let body = serde_json::json!({
                    "error": {
                        "code": "RATE_LIMITED",
                        "message": "Rate limit exceeded",
                        "details": { "retry_after_seconds": retry_after }
                    }
                })
                .to_string();

                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                resp.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );

                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }

                resp.headers_mut()
                    .insert(http::header::RETRY_AFTER, HeaderValue::from(retry_after));

                resp
            }
            GovernorError::UnableToExtractKey => {
                let body = serde_json::json!({
                    "error": {
                        "code": "BAD_REQUEST",
                        "message": "Unable to determine client IP for rate limiting"
                    }
                })
                .to_string();

                let mut resp = http::Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                resp.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                resp
            }
            GovernorError::Other { code, msg, headers } => {
                let body = msg.unwrap_or_else(|| "Rate limiting error".to_string());
                let mut resp = http::Response::new(Body::from(body));
                let status = StatusCode::from_u16(code.as_u16())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                *resp.status_mut() = status;
                if let Some(hmap) = headers {
                    for (name, value) in hmap.iter() {
                        resp.headers_mut().append(name.clone(), value.clone());
                    }
                }
                resp
            }
        }
    });

    let trigger_gov_conf = Arc::new(
        trigger_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build trigger governor config"))?,
    );

    // Background cleanup for trigger limiter storage
    let trigger_cleaner = {
        let limiter = trigger_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            // Use smaller sleep granularity to allow quick shutdown.
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Trigger rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("trigger rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let trigger_rate_layer = GovernorLayer {
        config: trigger_gov_conf.clone(),
    };

    let mut cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::ACCEPT]);
    if let Some(origin) = &config.server.cors_origin {
        let origin = origin
            .parse::<HeaderValue>()
            .map_err(|_| anyhow::anyhow!("Invalid CORS_ORIGIN: {}", origin))?;
        cors = cors.allow_origin(origin);
    }

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))
        // Delivery triggers (rate limited), queue inspection and delivery logs
        .nest(
            "/api/reminders",
            routes::reminders::router()
                .merge(routes::reminders::trigger_router().layer(trigger_rate_layer)),
        )
        // Appointment lifecycle hooks
        .nest("/api/appointments", routes::appointments::router())
        // Tenant-wide resynchronization
        .nest("/api/tenants", routes::tenants::router())
        // Add shared state
        .with_state(app_state.clone())
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    // The signal future notifies background workers and threads; the server
    // future is then dropped, which stops accepting new connections.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let thread_shutdown_clone = thread_shutdown.clone();

    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {},
                        _ = term.recv() => {},
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to bind SIGTERM, listening for Ctrl+C only: {}", e);
                    if let Err(e) = ctrl_c.await {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        }

        tracing::info!("Shutdown signal received, notifying background workers and threads");
        let _ = shutdown_tx_clone.send(());
        thread_shutdown_clone.store(true, Ordering::SeqCst);
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server future dropped to stop accepting new connections");
        }
    }

    // Give the poller some time to finish its current run.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, bg_wait).await.is_err() {
        tracing::warn!("Background workers did not exit in time");
    }

    // The cleanup thread checks `thread_shutdown` every second.
    if let Err(e) = trigger_cleaner.join() {
        tracing::warn!("Trigger cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
