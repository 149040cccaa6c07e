//! Application startup and lifecycle management.

use crate::config::DirectoryConfig;
use crate::handlers;
use crate::services::{
    AzureTokenSource, BearerClient, DistributionListService, ExchangeClient, GraphClient,
    GroupDirectory, HelpdeskClient, IdentityResolver, MailDirectory, SiteService, SiteSettings,
    TicketDesk, TicketService,
};
use axum::http::{header, HeaderName, HeaderValue, Method, Request};
use axum::middleware::from_fn;
use axum::routing::{get, post, put};
use axum::Router;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use service_core::resilience::{CredentialBroker, PurgePolicy, SyncOptions, ValidationCache};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Backing systems the services talk to.
pub struct Backends {
    pub mail: Arc<dyn MailDirectory>,
    pub directory: Arc<dyn GroupDirectory>,
    pub tickets: Arc<dyn TicketDesk>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DirectoryConfig>,
    pub identities: Arc<IdentityResolver>,
    pub distribution_lists: Arc<DistributionListService>,
    pub sites: Arc<SiteService>,
    pub tickets: Arc<TicketService>,
}

impl AppState {
    pub fn new(config: DirectoryConfig, backends: Backends) -> Self {
        let resilience = &config.resilience;

        let identities = Arc::new(IdentityResolver::new(
            backends.directory.clone(),
            Arc::new(ValidationCache::new("users", resilience.validation_cache_ttl)),
            Arc::new(ValidationCache::new(
                "principal_names",
                resilience.validation_cache_ttl,
            )),
            resilience.sync_concurrency,
        ));
        let sync = SyncOptions::default().with_concurrency(resilience.sync_concurrency);

        let distribution_lists = Arc::new(DistributionListService::new(
            backends.mail,
            identities.clone(),
            config.mail.custom_domain.clone(),
            config.mail.owners_as_members,
            sync.clone(),
        ));

        let sites = Arc::new(SiteService::new(
            backends.directory,
            identities.clone(),
            sync,
            SiteSettings {
                poll_attempts: resilience.site_poll_attempts,
                poll_interval: resilience.site_poll_interval,
                purge: PurgePolicy {
                    attempts: resilience.purge_attempts,
                    delay: resilience.purge_delay,
                },
                deadline: resilience.request_deadline,
            },
        ));

        let tickets = Arc::new(TicketService::new(backends.tickets));

        Self {
            config: Arc::new(config),
            identities,
            distribution_lists,
            sites,
            tickets,
        }
    }
}

fn cors_layer(origin: &str) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    if origin.trim() == "*" {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origin
        .split(',')
        .map(|o| {
            o.trim().parse::<HeaderValue>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid CORS origin '{}': {}", o, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(origins))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let cors = cors_layer(&state.config.cors_origin)?;

    let api = Router::new()
        .route(
            "/api/dl",
            post(handlers::distribution_lists::create_distribution_list),
        )
        .route(
            "/api/dl/:dl_id",
            get(handlers::distribution_lists::get_distribution_list)
                .patch(handlers::distribution_lists::update_distribution_list)
                .delete(handlers::distribution_lists::delete_distribution_list),
        )
        .route("/api/sharepoint/site", post(handlers::sites::create_site))
        .route(
            "/api/sharepoint/site/:group_id",
            axum::routing::delete(handlers::sites::delete_site),
        )
        .route(
            "/api/sharepoint/site/:group_id/membership",
            put(handlers::sites::set_membership),
        )
        .route(
            "/api/sharepoint/owners",
            post(handlers::sites::add_owners).delete(handlers::sites::remove_owners),
        )
        .route(
            "/api/sharepoint/members",
            post(handlers::sites::add_members).delete(handlers::sites::remove_members),
        )
        .route("/api/tickets", post(handlers::tickets::create_ticket))
        .route(
            "/api/tickets/:ticket_id",
            axum::routing::patch(handlers::tickets::update_ticket),
        );

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .merge(api)
        // route_layer so the matched path is known when recording
        .route_layer(from_fn(metrics_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(cors);

    Ok(app)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Wire the real backends and bind the listener (port 0 picks a free port).
    pub async fn build(config: DirectoryConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.resilience.http_timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        let token_source = Arc::new(AzureTokenSource::new(http.clone(), &config.azure));
        let broker = Arc::new(CredentialBroker::with_margin(
            token_source,
            config.resilience.token_refresh_margin,
        ));

        let graph = GraphClient::new(
            BearerClient::new("graph", http.clone(), broker.clone(), config.azure.graph_scope.clone()),
            &config.azure.graph_base_url,
        );
        let exchange = ExchangeClient::new(
            BearerClient::new("exchange", http.clone(), broker, config.azure.exchange_scope.clone()),
            config.azure.exchange_command_url(),
        );
        let helpdesk = HelpdeskClient::new(
            http,
            &config.helpdesk.base_url,
            config.helpdesk.api_key.clone(),
        );

        let port = config.common.port;
        let state = AppState::new(
            config,
            Backends {
                mail: Arc::new(exchange),
                directory: Arc::new(graph),
                tickets: Arc::new(helpdesk),
            },
        );
        state.identities.spawn_sweepers(CACHE_SWEEP_INTERVAL);

        let router = build_router(state)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        tracing::info!("directory-service listening on port {}", self.port);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
