#[cfg(feature = "config")]
use core_config::{env_optional, ConfigError, FromEnv};

/// Redis connection settings.
///
/// ```ignore
/// let config = RedisConfig::new("redis://127.0.0.1:6379").with_database(2);
/// let conn = database::redis::connect_from_config(config).await?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Logical database number, appended to the URL when it has none
    pub database: Option<u8>,

    /// ACL username, used only when the URL carries no credentials
    pub username: Option<String>,

    /// Password, used only when the URL carries no credentials
    pub password: Option<String>,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: None,
            username: None,
            password: None,
        }
    }

    pub fn with_database(mut self, database: u8) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_auth(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Whether a usable target is present.
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Full connection URL with credentials and database folded in.
    ///
    /// Anything already present in `url` takes precedence.
    pub fn build_url(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        let Some((scheme, rest)) = url.split_once("://") else {
            return url.to_string();
        };

        let rest = match (&self.password, rest.contains('@')) {
            (Some(password), false) => {
                let user = self.username.as_deref().unwrap_or_default();
                format!("{}:{}@{}", user, password, rest)
            }
            _ => rest.to_string(),
        };

        match self.database {
            Some(db) if !rest.contains('/') => format!("{}://{}/{}", scheme, rest, db),
            _ => format!("{}://{}", scheme, rest),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379")
    }
}

#[cfg(feature = "config")]
impl RedisConfig {
    /// Like [`FromEnv::from_env`], but an unset or blank target yields `None`.
    ///
    /// Malformed optional values (e.g. `REDIS_DATABASE`) are still errors.
    pub fn from_env_optional() -> Result<Option<Self>, ConfigError> {
        match Self::from_env() {
            Ok(config) if config.is_configured() => Ok(Some(config)),
            Ok(_) | Err(ConfigError::MissingEnvVar(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Environment variables:
/// - `REDIS_URL` or `REDIS_HOST` (required) - connection string
/// - `REDIS_DATABASE` (optional) - database number
/// - `REDIS_USERNAME` / `REDIS_PASSWORD` (optional) - credentials
#[cfg(feature = "config")]
impl FromEnv for RedisConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let url = env_optional("REDIS_URL")
            .or_else(|| env_optional("REDIS_HOST"))
            .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL or REDIS_HOST".to_string()))?;

        let database = env_optional("REDIS_DATABASE")
            .map(|db| {
                db.parse().map_err(|e| ConfigError::ParseError {
                    key: "REDIS_DATABASE".to_string(),
                    details: format!("{}", e),
                })
            })
            .transpose()?;

        Ok(Self {
            url,
            database,
            username: env_optional("REDIS_USERNAME"),
            password: env_optional("REDIS_PASSWORD"),
        })
    }
}
