use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub local_root: PathBuf,
    pub bucket: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_base_url: Option<Url>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseConfig {
    Memory,
    DynamoDb {
        users_table: String,
        images_table: String,
        predictions_table: String,
        reports_table: String,
        activities_table: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub model_config_path: PathBuf,
    pub auto_detect: bool,
    pub preload_models: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                reason: e.to_string(),
            })?,
            None => 8081,
        };

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let public_base_url = match get("STORAGE_PUBLIC_BASE_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                key: "STORAGE_PUBLIC_BASE_URL",
                reason: e.to_string(),
            })?),
            None => None,
        };

        let timeout_secs = match get("STORAGE_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "STORAGE_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => 30,
        };

        let storage = StorageConfig {
            local_root: PathBuf::from(get("LOCAL_STORAGE_ROOT").unwrap_or_else(|| "media".into())),
            bucket: get("S3_BUCKET_NAME"),
            endpoint_url: get("S3_ENDPOINT_URL"),
            access_key_id: get("S3_ACCESS_KEY_ID"),
            secret_access_key: get("S3_SECRET_ACCESS_KEY"),
            public_base_url,
            timeout: Duration::from_secs(timeout_secs),
        };

        let database = match get("DATABASE_BACKEND").as_deref() {
            None | Some("memory") => DatabaseConfig::Memory,
            Some("dynamodb") => DatabaseConfig::DynamoDb {
                users_table: get("DYNAMODB_USERS_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_USERS_TABLE"))?,
                images_table: get("DYNAMODB_IMAGES_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_IMAGES_TABLE"))?,
                predictions_table: get("DYNAMODB_PREDICTIONS_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_PREDICTIONS_TABLE"))?,
                reports_table: get("DYNAMODB_REPORTS_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_REPORTS_TABLE"))?,
                activities_table: get("DYNAMODB_ACTIVITIES_TABLE")
                    .ok_or(ConfigError::Missing("DYNAMODB_ACTIVITIES_TABLE"))?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "DATABASE_BACKEND",
                    reason: format!("unknown backend '{}'", other),
                });
            }
        };

        Ok(Self {
            port,
            jwt_secret,
            storage,
            database,
            model_config_path: PathBuf::from(
                get("MODEL_CONFIG_PATH").unwrap_or_else(|| "config/models.yaml".into()),
            ),
            auto_detect: parse_flag(get("AUTO_DETECT"), true),
            preload_models: parse_flag(get("PRELOAD_MODELS"), false),
        })
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.database, DatabaseConfig::Memory);
        assert_eq!(config.storage.local_root, PathBuf::from("media"));
        assert!(config.storage.bucket.is_none());
        assert_eq!(config.storage.timeout, Duration::from_secs(30));
        assert!(config.auto_detect);
        assert!(!config.preload_models);
    }

    #[test]
    fn missing_secret_is_an_error() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn dynamodb_backend_requires_tables() {
        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("DATABASE_BACKEND", "dynamodb"),
            ("DYNAMODB_USERS_TABLE", "users"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DYNAMODB_IMAGES_TABLE")));

        let err = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("DATABASE_BACKEND", "dynamodb"),
            ("DYNAMODB_USERS_TABLE", "users"),
            ("DYNAMODB_IMAGES_TABLE", "images"),
            ("DYNAMODB_PREDICTIONS_TABLE", "predictions"),
            ("DYNAMODB_REPORTS_TABLE", "reports"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DYNAMODB_ACTIVITIES_TABLE")));
    }

    #[test]
    fn flags_and_urls_are_parsed() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "x"),
            ("AUTO_DETECT", "off"),
            ("PRELOAD_MODELS", "TRUE"),
            ("STORAGE_PUBLIC_BASE_URL", "https://cdn.example.com/storage/v1/object/public/"),
        ]))
        .unwrap();
        assert!(!config.auto_detect);
        assert!(config.preload_models);
        assert_eq!(
            config.storage.public_base_url.unwrap().host_str(),
            Some("cdn.example.com")
        );

        let err = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "x"), ("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }
}
