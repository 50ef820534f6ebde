use std::sync::Arc;

use bayou::broker::Broker;
use bayou::config::load_config;
use bayou::transport::start_websocket_server;
use bayou::utils::logging;

#[tokio::main]
async fn main() {
    let config = load_config().expect("Failed to load configuration");
    logging::init("info");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Broker::new(config.broker.clone()));

    // Idle sessions whose transport went away are reaped in the background.
    let sweeper = broker.clone();
    let sweep_every = broker.hold_timeout();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_every).await;
            sweeper.sweep_expired();
        }
    });

    if let Err(e) = start_websocket_server(&addr, broker).await {
        eprintln!("Failed to bind {addr}: {e}");
        std::process::exit(1);
    }
}
