//! Participant process entry point
//!
//! Usage: pact-participant <participant_id> [port] [data_dir] [coordinator_url]
//!
//! Defaults: port 50051, data dir "./<participant_id>-data", coordinator
//! "http://127.0.0.1:50050". On startup the prepared journal is replayed,
//! the participant announces itself to the coordinator, and two background
//! loops run: one expiring stale ACTIVE transactions, one asking the
//! coordinator about transactions left blocked in PREPARED.

use pact_core::participant::{ParticipantConfig, ParticipantEngine};
use pact_core::participant_server::{router, ParticipantState};
use pact_core::protocol::RegisterRequest;
use pact_core::transport::fetch_decision;
use pact_core::types::Decision;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let participant_id = args.get(1).cloned().expect("usage: pact-participant <participant_id> [port] [data_dir] [coordinator_url]");
    let port: u16 = args
        .get(2)
        .map(|p| p.parse().expect("port must be a number"))
        .unwrap_or(50051);
    let data_dir = args
        .get(3)
        .cloned()
        .unwrap_or_else(|| format!("./{}-data", participant_id));
    let coordinator_url = args
        .get(4)
        .cloned()
        .unwrap_or_else(|| "http://127.0.0.1:50050".to_string());

    let config = ParticipantConfig::default();
    let engine = Arc::new(
        ParticipantEngine::open(&data_dir, config.clone()).expect("failed to open participant store"),
    );

    let endpoint = format!("http://127.0.0.1:{}", port);
    register_with_coordinator(&coordinator_url, &participant_id, &endpoint).await;

    // Abort ACTIVE transactions that never saw a prepare in time
    let sweeper = Arc::clone(&engine);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            sweeper.expire_stale();
        }
    });

    // Recovered PREPARED transactions block until the coordinator answers;
    // periodically ask it for the decision.
    let inquirer = Arc::clone(&engine);
    let inquiry_url = coordinator_url.clone();
    let inquiry_interval = config.recovery_inquiry_timeout;
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            tokio::time::sleep(inquiry_interval).await;

            for tx_id in inquirer.prepared_ids() {
                match fetch_decision(&client, &inquiry_url, &tx_id, Duration::from_secs(5)).await {
                    Ok(Some(Decision::Committed)) => {
                        info!(tx_id = %tx_id, "coordinator says COMMITTED, applying");
                        if let Err(e) = inquirer.commit(&tx_id) {
                            warn!(tx_id = %tx_id, error = %e, "commit after inquiry failed");
                        }
                    }
                    Ok(Some(Decision::Aborted)) => {
                        info!(tx_id = %tx_id, "coordinator says ABORTED, rolling back");
                        if let Err(e) = inquirer.abort(&tx_id) {
                            warn!(tx_id = %tx_id, error = %e, "abort after inquiry failed");
                        }
                    }
                    // No decision yet, or coordinator unreachable: stay
                    // blocked, as 2PC requires after a YES vote.
                    Ok(None) => {}
                    Err(e) => {
                        warn!(tx_id = %tx_id, error = %e, "decision inquiry failed");
                    }
                }
            }
        }
    });

    let state = ParticipantState::new(engine, participant_id.clone());
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, participant_id = %participant_id, data_dir = %data_dir, "participant listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind participant port");
    axum::serve(listener, app).await.expect("server error");
}

/// Best-effort announcement; the admission API can also register us later.
async fn register_with_coordinator(coordinator_url: &str, participant_id: &str, endpoint: &str) {
    let client = reqwest::Client::new();
    let body = RegisterRequest {
        participant_id: participant_id.to_string(),
        endpoint: endpoint.to_string(),
    };

    match client
        .post(format!("{}/register", coordinator_url))
        .json(&body)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            info!(coordinator = %coordinator_url, "registered with coordinator");
        }
        Ok(response) => {
            warn!(status = %response.status(), "coordinator refused registration");
        }
        Err(e) => {
            warn!(error = %e, "could not reach coordinator for registration");
        }
    }
}
