use service_module::{run_server, BoxError, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt::init();

    let config = ServiceConfig::from_env()?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    run_server(config, shutdown).await
}
