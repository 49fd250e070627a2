//! Environment configuration.
//!
//! Every recognized option is enumerated here; unknown environment
//! variables are ignored. `LLM_*` credentials are parsed for the external
//! conversational adapter and have no effect on the core.

use std::str::FromStr;

use covenant_core::{EntityId, RealmId};
use covenant_infra::BootstrapConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEnv {
    Development,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStoreBackend {
    Memory,
    Relational,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackend {
    None,
    Redis,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub node_env: NodeEnv,
}

#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    pub backend: EventStoreBackend,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub event_store: EventStoreConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub bootstrap: BootstrapConfig,
    /// External LLM adapter credentials; carried through untouched.
    pub llm_api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("{0} is required when EVENT_STORE_BACKEND=relational")]
    MissingDatabaseUrl(&'static str),
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_env = match var("NODE_ENV").as_deref() {
            None | Some("development") => NodeEnv::Development,
            Some("production") => NodeEnv::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "NODE_ENV",
                    message: format!("expected development|production, got '{other}'"),
                });
            }
        };

        let port = match var("SERVER_PORT") {
            None => 8080,
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                name: "SERVER_PORT",
                message: format!("{e}"),
            })?,
        };

        let backend = match var("EVENT_STORE_BACKEND").as_deref() {
            None | Some("memory") => EventStoreBackend::Memory,
            Some("relational") => EventStoreBackend::Relational,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "EVENT_STORE_BACKEND",
                    message: format!("expected memory|relational, got '{other}'"),
                });
            }
        };

        let url = var("EVENT_STORE_URL").or_else(|| var("DATABASE_URL"));
        if backend == EventStoreBackend::Relational && url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl("EVENT_STORE_URL"));
        }

        let rate_limit_backend = match var("RATE_LIMIT_BACKEND").as_deref() {
            None | Some("none") => RateLimitBackend::None,
            Some("redis") => RateLimitBackend::Redis,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "RATE_LIMIT_BACKEND",
                    message: format!("expected none|redis, got '{other}'"),
                });
            }
        };

        let mut bootstrap = BootstrapConfig::default();
        if let Some(raw) = var("BOOTSTRAP_PRIMORDIAL_REALM_ID") {
            bootstrap.primordial_realm_id =
                RealmId::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    name: "BOOTSTRAP_PRIMORDIAL_REALM_ID",
                    message: e.to_string(),
                })?;
        }
        if let Some(raw) = var("BOOTSTRAP_PRIMORDIAL_SYSTEM_ID") {
            bootstrap.primordial_system_id =
                EntityId::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    name: "BOOTSTRAP_PRIMORDIAL_SYSTEM_ID",
                    message: e.to_string(),
                })?;
        }

        Ok(Self {
            server: ServerConfig {
                host: var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port,
                node_env,
            },
            event_store: EventStoreConfig { backend, url },
            auth: AuthConfig {
                // Development fallback; production deployments must set it.
                jwt_secret: var("AUTH_JWT_SECRET")
                    .unwrap_or_else(|| "covenant-dev-secret".to_string()),
                issuer: var("AUTH_ISSUER"),
                audience: var("AUTH_AUDIENCE"),
            },
            rate_limit: RateLimitConfig {
                backend: rate_limit_backend,
                redis_url: var("RATE_LIMIT_REDIS_URL"),
            },
            bootstrap,
            llm_api_key: var("LLM_API_KEY"),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
