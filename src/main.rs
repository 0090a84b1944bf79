use Carelink_backend::api::payments::{self as payments_api, PaymentsState};
use Carelink_backend::config::AppConfig;
use Carelink_backend::database::payment_repository::PaymentRepository;
use Carelink_backend::database::repository::PaymentStore;
use Carelink_backend::database::usage_repository::UsageRepository;
use Carelink_backend::health::{HealthChecker, HealthState, HealthStatus};
use Carelink_backend::logging::init_tracing;
use Carelink_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use Carelink_backend::payments::momo::{MomoConfig, MomoStatusClient};
use Carelink_backend::rooms::JitsiRoomProvisioner;
use Carelink_backend::services::confirmation::ConfirmationService;
use Carelink_backend::services::orchestrator::ServiceOrchestrator;
use Carelink_backend::workers::payment_expiry::{ExpirySweeperConfig, ExpirySweeperWorker};
use Carelink_backend::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};
use Carelink_backend::database;

use axum::{
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Carelink backend service"
    );

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        anyhow::anyhow!(e)
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        anyhow::anyhow!(e)
    })?;

    info!(
        host = %config.server.host,
        port = config.server.port,
        currency = %config.billing.currency,
        payment_timeout_minutes = config.billing.payment_timeout_minutes,
        "Server configuration loaded"
    );

    // Initialize database connection pool
    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("✅ Database connection pool initialized");

    // Initialize health checker
    let health_checker = HealthChecker::new(db_pool.clone());

    // Wire the core services
    let usage_ledger = Arc::new(UsageRepository::new(db_pool.clone()));
    let payment_store: Arc<dyn PaymentStore> = Arc::new(PaymentRepository::new(db_pool.clone()));
    let room_provisioner = Arc::new(JitsiRoomProvisioner);

    let orchestrator = Arc::new(ServiceOrchestrator::new(
        usage_ledger,
        payment_store.clone(),
        room_provisioner,
        config.billing.clone(),
    ));
    let confirmation = Arc::new(ConfirmationService::new(
        payment_store.clone(),
        config.billing.clone(),
    ));

    // Background workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let mut worker_handles = Vec::new();

    let sweeper_enabled = std::env::var("PAYMENT_SWEEPER_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    if sweeper_enabled {
        let sweeper_config = ExpirySweeperConfig::from_env();
        info!(
            sweep_interval_secs = sweeper_config.sweep_interval.as_secs(),
            "Starting payment expiry sweeper"
        );
        let worker = ExpirySweeperWorker::new(payment_store.clone(), sweeper_config);
        worker_handles.push(tokio::spawn(worker.run(worker_shutdown_rx.clone())));
    } else {
        info!("Payment expiry sweeper disabled (PAYMENT_SWEEPER_ENABLED=false)");
    }

    let reconcile_enabled = std::env::var("RECONCILE_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let momo_config = MomoConfig::from_env();
    if reconcile_enabled && momo_config.is_configured() {
        let reconcile_config = ReconciliationConfig::from_env();
        info!(
            poll_interval_secs = reconcile_config.poll_interval.as_secs(),
            "Starting payment reconciliation worker"
        );
        let status_source = Arc::new(
            MomoStatusClient::new(momo_config)
                .map_err(|e| anyhow::anyhow!("momo client init failed: {}", e))?,
        );
        let worker = ReconciliationWorker::new(
            payment_store.clone(),
            status_source,
            confirmation.clone(),
            reconcile_config,
        );
        worker_handles.push(tokio::spawn(worker.run(worker_shutdown_rx.clone())));
    } else {
        info!("Payment reconciliation worker disabled (missing MoMo credentials or RECONCILE_ENABLED=false)");
    }

    // Create the application router with logging middleware
    info!("🛣️  Setting up application routes...");

    let payments_state = PaymentsState {
        orchestrator,
        confirmation,
        payments: payment_store,
    };

    let payment_routes = Router::new()
        .route(
            "/v1/payments/remaining",
            get(payments_api::remaining_free_uses),
        )
        .route("/v1/payments/initiate", post(payments_api::initiate))
        .route(
            "/v1/payments/awaiting",
            post(payments_api::awaiting_verification),
        )
        .route("/v1/payments/confirm", post(payments_api::confirm))
        .route("/v1/payments/cancel", post(payments_api::cancel))
        .route("/v1/payments/refund", post(payments_api::refund))
        .route("/v1/dashboard/payments", get(payments_api::list_payments))
        .with_state(payments_state);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(payment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    "Welcome to Carelink Backend API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    // Readiness checks all dependencies
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
