use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "AMD";
const API_KEY_ENV: &str = "ROBOFLOW_API_KEY";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub predictor: PredictorConfig,
    pub storage: StorageConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hosted segmentation model settings.
#[derive(Debug, Deserialize, Clone)]
pub struct PredictorConfig {
    #[serde(default)]
    pub api_key: String,
    pub workspace: String,
    pub project: String,
    pub version: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default = "default_overlap")]
    pub overlap: u8,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://outline.roboflow.com".into()
}

fn default_confidence() -> u8 {
    40
}

fn default_overlap() -> u8 {
    30
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl PredictorConfig {
    pub fn get_model_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.project,
            self.version
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err(format!(
                "Predictor API key is missing. Set {} or {}_PREDICTOR__API_KEY.",
                API_KEY_ENV, ENV_PREFIX
            ));
        }
        if self.confidence > 100 {
            return Err(format!(
                "Confidence threshold must be a percentage, got {}",
                self.confidence
            ));
        }
        if self.overlap > 100 {
            return Err(format!(
                "Overlap threshold must be a percentage, got {}",
                self.overlap
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_feedback_path")]
    pub feedback_path: PathBuf,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_feedback_path() -> PathBuf {
    PathBuf::from("feedback_log.csv")
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {e}"))
    })?;

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_configuration(
        &base_path.join("configuration"),
        &environment,
        std::env::var(API_KEY_ENV).ok(),
    )
}

/// Layers `base.yaml`, the environment file and `AMD_*` variables, in that order.
/// A `ROBOFLOW_API_KEY` value wins over everything else.
pub fn load_configuration(
    configuration_directory: &Path,
    environment: &Environment,
    api_key: Option<String>,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("predictor.api_key", api_key)?
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.predictor.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}
