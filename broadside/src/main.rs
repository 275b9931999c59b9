//! Broadside server binary.

use broadside::config::ServerConfig;
use broadside::server::ServerBuilder;
use broadside::telemetry::init_tracing;
use tracing::error;

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let _guard = init_tracing(config.tracing());

    let server = match ServerBuilder::from_config(config).build() {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}
