use config::builder::DefaultState;
use config::{Config as ConfigLoader, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use weave_client::HttpBackendConfig;
use weave_session::SessionConfig;
use weave_types::RequestParams;

/// Environment variables that override single TOML keys
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("BACKEND_ENDPOINT", "backend.endpoint"),
    ("BACKEND_WORKSPACE_ID", "backend.workspace_id"),
    ("BACKEND_WEB_SEARCH", "backend.web_search"),
    ("SESSION_INTERRUPTED_MARKER", "session.interrupted_marker"),
    ("SESSION_DEFAULT_TITLE", "session.default_title"),
    ("LOG_LEVEL", "logging.level"),
    ("LOG_FORMAT", "logging.format"),
    ("MONGODB_DATABASE", "mongodb.database"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub session: SessionSettings,
    pub logging: LoggingConfig,
    pub mongodb: MongoDbConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub mongodb_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub endpoint: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Default request toggles
    #[serde(default)]
    pub conversation_recall: bool,
    #[serde(default)]
    pub document_recall: bool,
    #[serde(default)]
    pub web_search: bool,
}

impl BackendConfig {
    pub fn request_params(&self) -> RequestParams {
        RequestParams::new()
            .with_conversation_recall(self.conversation_recall)
            .with_document_recall(self.document_recall)
            .with_web_search(self.web_search)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub interrupted_marker: String,
    pub default_title: String,
}

impl From<SessionSettings> for SessionConfig {
    fn from(settings: SessionSettings) -> Self {
        Self {
            interrupted_marker: settings.interrupted_marker,
            default_title: settings.default_title,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoDbConfig {
    pub database: String,
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Nested `WEAVE_SECTION__KEY` variables
    /// 4. BACKEND_, SESSION_, LOG_ and MONGODB_ variables listed in `ENV_OVERRIDES`
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("WEAVE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        let builder = with_env_overrides(builder, |name| std::env::var(name).ok())?;

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        // Secrets
        cfg.api_token = std::env::var("WEAVE_API_TOKEN")
            .map_err(|_| ConfigError::Message("WEAVE_API_TOKEN environment variable is required".to_string()))?;
        cfg.mongodb_uri = std::env::var("MONGODB_URI").ok().filter(|uri| !uri.is_empty());

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            endpoint: self.backend.endpoint.clone(),
            api_token: self.api_token.clone(),
            workspace_id: self.backend.workspace_id.clone(),
        }
    }
}

fn with_env_overrides(
    builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    ENV_OVERRIDES.iter().try_fold(builder, |builder, (var, key)| {
        builder.set_override_option(*key, lookup(var))
    })
}
