//! Headless entry point. Wires logging, configuration, the instance lock,
//! the store, and Orchestration per the Lifecycle startup sequence, then
//! idles — the transport that would accept launch/terminate requests over
//! the wire is out of scope (§1).

use agentctl::config::Config;
use agentctl::lifecycle::Instance;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();
    log::info!(
        "starting agentctl on port {} (db={}, lock={})",
        config.port,
        config.db_path,
        config.lock_path.display()
    );

    let instance = match Instance::startup(&config.lock_path, &config.db_path, config.port) {
        Ok(instance) => instance,
        Err(error) => {
            log::error!("startup failed: {error}");
            std::process::exit(1);
        }
    };

    log::info!("agentctl ready, instance {}", instance.metadata().instance_id);

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install SIGINT handler");
    log::info!("shutting down");
    instance.shutdown();
}
