use std::sync::Arc;

use broadcast_fanout::service::{wake_publisher, Service};
use broadcast_fanout::{AppConfig, AppError};
use fanout_core::{LoggingTransport, SharedStore};
use fanout_persistence::PgFanoutStore;
use log::{error, info};

async fn run() -> Result<(), AppError> {
    let cfg = AppConfig::from_env()?;
    let pool = tokio::task::spawn_blocking(fanout_persistence::build_dev_pool_from_env)
        .await
        .map_err(|e| AppError::Task(format!("pool build: {e}")))??;
    let store: SharedStore = Arc::new(PgFanoutStore::from_pool(pool));
    let wake = wake_publisher(&cfg)?;

    let service = Service::start(&cfg, store, wake, Arc::new(LoggingTransport)).await?;
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("service:signal_failed err={e}");
    }
    info!("service:shutdown_requested");
    service.shutdown().await
}

#[tokio::main]
async fn main() {
    fanout_persistence::init_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run().await {
        error!("service:failed err={e}");
        std::process::exit(1);
    }
}
