use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub common: core_config::Config,
    pub azure: AzureConfig,
    pub mail: MailConfig,
    pub helpdesk: HelpdeskConfig,
    pub resilience: ResilienceConfig,
    pub cors_origin: String,
}

/// App registration used for the client-credentials flow against the
/// identity platform, plus the API endpoints it grants access to.
#[derive(Debug, Clone)]
pub struct AzureConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub authority_host: String,
    pub graph_base_url: String,
    pub graph_scope: String,
    pub exchange_base_url: String,
    pub exchange_scope: String,
}

impl AzureConfig {
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn exchange_command_url(&self) -> String {
        format!(
            "{}/adminapi/beta/{}/InvokeCommand",
            self.exchange_base_url.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Domain for distribution list addresses (`alias@custom_domain`).
    pub custom_domain: String,
    /// Owners are also added as members of their distribution lists.
    pub owners_as_members: bool,
}

#[derive(Debug, Clone)]
pub struct HelpdeskConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
}

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub token_refresh_margin: Duration,
    /// Zero disables the identity validation cache.
    pub validation_cache_ttl: Duration,
    pub sync_concurrency: usize,
    pub site_poll_attempts: u32,
    pub site_poll_interval: Duration,
    pub purge_attempts: u32,
    pub purge_delay: Duration,
    pub request_deadline: Duration,
    pub http_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            token_refresh_margin: Duration::from_secs(300),
            validation_cache_ttl: Duration::from_secs(300),
            sync_concurrency: 10,
            site_poll_attempts: 12,
            site_poll_interval: Duration::from_secs(5),
            purge_attempts: 3,
            purge_delay: Duration::from_secs(2),
            request_deadline: Duration::from_secs(120),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl DirectoryConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(DirectoryConfig {
            common: common_config,
            azure: AzureConfig {
                tenant_id: get_env("TENANT_ID", None, is_prod)?,
                client_id: get_env("CLIENT_ID", None, is_prod)?,
                client_secret: Secret::new(get_env("CLIENT_SECRET", None, is_prod)?),
                authority_host: get_env(
                    "AUTHORITY_HOST",
                    Some("https://login.microsoftonline.com"),
                    false,
                )?,
                graph_base_url: get_env(
                    "GRAPH_BASE_URL",
                    Some("https://graph.microsoft.com/v1.0"),
                    false,
                )?,
                graph_scope: get_env(
                    "GRAPH_SCOPE",
                    Some("https://graph.microsoft.com/.default"),
                    false,
                )?,
                exchange_base_url: get_env(
                    "EXCHANGE_BASE_URL",
                    Some("https://outlook.office365.com"),
                    false,
                )?,
                exchange_scope: get_env(
                    "EXCHANGE_SCOPE",
                    Some("https://outlook.office365.com/.default"),
                    false,
                )?,
            },
            mail: MailConfig {
                custom_domain: get_env("CUSTOM_DOMAIN", Some("example.com"), is_prod)?,
                owners_as_members: parse_env("OWNERS_AS_MEMBERS", true)?,
            },
            helpdesk: HelpdeskConfig {
                base_url: get_env("HELPDESK_BASE_URL", Some("http://localhost:9000"), is_prod)?,
                api_key: Secret::new(get_env("HELPDESK_API_KEY", Some(""), is_prod)?),
            },
            resilience: ResilienceConfig {
                token_refresh_margin: seconds("TOKEN_REFRESH_MARGIN_SECONDS", 300)?,
                validation_cache_ttl: seconds("VALIDATION_CACHE_TTL_SECONDS", 300)?,
                sync_concurrency: parse_env("SYNC_CONCURRENCY", 10)?,
                site_poll_attempts: parse_env("SITE_POLL_ATTEMPTS", 12)?,
                site_poll_interval: seconds("SITE_POLL_INTERVAL_SECONDS", 5)?,
                purge_attempts: parse_env("PURGE_ATTEMPTS", 3)?,
                purge_delay: seconds("PURGE_DELAY_SECONDS", 2)?,
                request_deadline: seconds("REQUEST_DEADLINE_SECONDS", 120)?,
                http_timeout: seconds("HTTP_TIMEOUT_SECONDS", 30)?,
            },
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.trim().to_lowercase().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}

fn seconds(key: &str, default: u64) -> Result<Duration, AppError> {
    parse_env(key, default).map(Duration::from_secs)
}
