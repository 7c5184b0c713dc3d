use std::env;
use std::io;
use std::path::PathBuf;

use crate::error::BoxError;
use crate::routing::RouteConfig;
use crate::schedule::validate_cron_expression;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub route_config: RouteConfig,
    /// Bearer token for the batch trigger endpoint; unset means the check
    /// is skipped (local development).
    pub batch_auth_token: Option<String>,
    pub batch_max_concurrency: usize,
    /// Cron expression for the in-process nightly trigger; unset means an
    /// external scheduler owns triggering.
    pub newsletter_cron: Option<String>,
    pub inbound_body_max_bytes: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);

        let service_domain = env::var("SERVICE_DOMAIN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| "SERVICE_DOMAIN not set".to_string())?;
        let assistant_local_parts = env::var("ASSISTANT_LOCAL_PARTS")
            .unwrap_or_else(|_| "assistant".to_string())
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>();
        let reply_prefix = env::var("REPLY_PREFIX").unwrap_or_else(|_| "reply".to_string());
        let route_config = RouteConfig::new(&service_domain, assistant_local_parts, &reply_prefix);

        let db_path = resolve_path(
            env::var("DB_PATH").unwrap_or_else(|_| "data/assistant.db".to_string()),
        )?;

        let batch_auth_token = env::var("BATCH_AUTH_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let batch_max_concurrency = env::var("BATCH_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(4);

        let newsletter_cron = env::var("NEWSLETTER_CRON")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if let Some(expression) = newsletter_cron.as_deref() {
            validate_cron_expression(expression)
                .map_err(|err| format!("invalid NEWSLETTER_CRON '{}': {}", expression, err))?;
        }

        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        Ok(Self {
            host,
            port,
            db_path,
            route_config,
            batch_auth_token,
            batch_max_concurrency,
            newsletter_cron,
            inbound_body_max_bytes,
        })
    }
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
