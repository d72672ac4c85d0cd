//! Coordinator process entry point
//!
//! Usage: pact-coordinator [port] [decision_log_path]
//!
//! Defaults: port 50050, decision log "coordinator-decisions.log".

use pact_core::coordinator::{CoordinatorConfig, CoordinatorEngine};
use pact_core::coordinator_server::{router, CoordinatorState};
use pact_core::decision_log::DecisionLog;
use pact_core::registry::ParticipantRegistry;
use pact_core::transport::HttpTransport;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args
        .get(1)
        .map(|p| p.parse().expect("port must be a number"))
        .unwrap_or(50050);
    let log_path = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "coordinator-decisions.log".to_string());

    let registry = Arc::new(ParticipantRegistry::new());
    let transport = Arc::new(HttpTransport::new());
    let log = DecisionLog::open(&log_path).expect("failed to open decision log");

    let engine = Arc::new(CoordinatorEngine::new(
        Arc::clone(&registry),
        transport,
        log,
        CoordinatorConfig::default(),
    ));

    // Resume any decisions the previous run did not finish dispatching
    let recovering = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = recovering.recover().await {
            error!(error = %e, "decision log recovery failed");
        }
    });

    let state = CoordinatorState::new(engine, registry);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, log = %log_path, "coordinator listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind coordinator port");
    axum::serve(listener, app).await.expect("server error");
}
