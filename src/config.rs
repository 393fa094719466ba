use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenieConfig {
    pub host: String,     // Workspace instance URL, e.g. https://adb-123.azuredatabricks.net
    pub space_id: String, // Genie space to converse with
    pub warehouse_id: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_conflict_retries: u32,
    pub max_status_attempts: u32,
    pub max_sql_result_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub token_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChatConfig {
    pub greeting: String,
    pub fallback_text: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub genie: GenieConfig,
    pub poll: PollConfig,
    pub auth: AuthConfig,
    pub web: WebConfig,
    pub chat: ChatConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Genie space identifier
    #[arg(long)]
    pub space_id: Option<String>,

    /// SQL warehouse used to execute generated queries
    #[arg(long)]
    pub warehouse_id: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with the built-in defaults
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/genie-chat/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // GENIE_CHAT__GENIE__SPACE_ID=... style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("GENIE_CHAT").separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(space_id) = &args.space_id {
            config.genie.space_id = space_id.clone();
        }
        if let Some(warehouse_id) = &args.warehouse_id {
            config.genie.warehouse_id = warehouse_id.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genie.host.trim().is_empty() {
            return Err(ConfigError::Message("genie.host must be set".to_string()));
        }
        if self.genie.space_id.trim().is_empty() {
            return Err(ConfigError::Message("genie.space_id must be set".to_string()));
        }
        if self.poll.multiplier < 1.0 {
            return Err(ConfigError::Message(format!(
                "poll.multiplier must be at least 1.0, got {}",
                self.poll.multiplier
            )));
        }
        if self.poll.max_delay_ms < self.poll.base_delay_ms {
            return Err(ConfigError::Message(
                "poll.max_delay_ms must not be smaller than poll.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl GenieConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            genie: GenieConfig {
                host: String::new(),
                space_id: String::new(),
                warehouse_id: String::new(),
                request_timeout_secs: 60,
            },
            poll: PollConfig {
                base_delay_ms: 1000,
                multiplier: 1.5,
                max_delay_ms: 10_000,
                max_conflict_retries: 15,
                max_status_attempts: 20,
                max_sql_result_attempts: 15,
            },
            auth: AuthConfig {
                token: None,
                token_env: "DATABRICKS_TOKEN".to_string(),
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            chat: ChatConfig {
                greeting: "Hi! Ask me a question about your data.".to_string(),
                fallback_text: "No response content was returned for this question.".to_string(),
            },
        }
    }
}
