//! Gommo Game Server
//!
//! Authoritative world server: a fixed-timestep chunked simulation streaming
//! per-tick snapshots to browser clients over WebSocket.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use gommo_server::config::ServerConfig;
use gommo_server::game::scheduler::TickScheduler;
use gommo_server::net::handler::ConnectionHandler;
use gommo_server::protocol::Outbound;
use gommo_server::state::AppState;
use gommo_server::{PROTOCOL_VERSION, VERSION};

/// Half-width of the square test creatures are scattered in
const TEST_CREATURE_RANGE: u32 = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging();

    info!("Gommo Game Server v{} (protocol {})", VERSION, PROTOCOL_VERSION);

    // Load configuration
    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize application state (world, sessions, saved objects)
    let state = Arc::new(AppState::new(config.clone())?);
    info!("Application state initialized");

    if config.test_creatures > 0 {
        let mut rng = StdRng::from_entropy();
        state
            .world
            .seed_creatures(config.test_creatures, TEST_CREATURE_RANGE, &mut rng);
    }

    // Start the tick scheduler on its own thread
    let outbound: Arc<dyn Outbound> = state.sessions.clone();
    let scheduler = TickScheduler::new(
        state.world.clone(),
        outbound,
        config.snapshot_worker_count(),
    )?
    .with_store(state.store.clone());
    state.world.set_running(true);
    let scheduler_handle = thread::Builder::new()
        .name("tick-scheduler".to_string())
        .spawn(move || scheduler.run())?;

    // Start WebSocket listener
    let listener = TcpListener::bind(config.listen_address()).await?;
    info!("WebSocket server listening on: {}", listener.local_addr()?);

    let ws_state = state.clone();
    let mut ws_shutdown_rx = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        accept_websocket_connections(listener, ws_state, &mut ws_shutdown_rx).await;
    });

    info!("Server startup complete!");
    info!("{}", state.world.info());

    // Wait for shutdown signal
    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");
    let _ = ws_handle.await;

    info!("Sessions at shutdown: {:?}", state.sessions.count_by_state());
    state.sessions.disconnect_all("Server shutting down");
    info!("All sessions asked to disconnect");

    // Stop the tick loop and wait for the current tick to finish
    state.world.set_running(false);
    match tokio::task::spawn_blocking(move || scheduler_handle.join()).await {
        Ok(Ok(())) => info!("Tick scheduler joined"),
        Ok(Err(_)) => error!("Tick scheduler thread panicked"),
        Err(e) => error!("Failed to join tick scheduler: {}", e),
    }

    // Final save
    let failed = state.save_all();
    if failed.is_empty() {
        info!("World saved");
    } else {
        warn!("Final save failed for areas: {:?}", failed);
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gommo_server=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();
}

/// Accept incoming WebSocket connections (for browser clients)
async fn accept_websocket_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_websocket(stream, addr).await {
                                warn!("WebSocket connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
