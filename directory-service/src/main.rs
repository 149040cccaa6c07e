use directory_service::config::DirectoryConfig;
use directory_service::services::init_metrics;
use directory_service::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = DirectoryConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "directory-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    init_metrics().map_err(|e| std::io::Error::other(format!("Metrics error: {}", e)))?;

    tracing::info!(
        graph = %config.azure.graph_base_url,
        custom_domain = %config.mail.custom_domain,
        "Starting directory-service"
    );

    let application = Application::build(config)
        .await
        .map_err(|e| std::io::Error::other(format!("Startup error: {}", e)))?;

    application.run_until_stopped().await
}
