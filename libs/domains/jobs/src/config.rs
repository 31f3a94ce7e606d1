//! Dispatch and worker configuration.

use core_config::{env_flag, env_optional, env_or_default, env_parse, ConfigError, FromEnv};
use database::redis::RedisConfig;
use std::time::Duration;
use stream_worker::DEFAULT_PREFIX;
use strum::{AsRefStr, Display};

/// How a job is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DispatchMode {
    /// Run the handler now, in the caller's task
    Inline,
    /// Persist to the job's queue for a worker to pick up
    Durable,
}

/// Dispatcher settings.
///
/// Environment variables:
/// - `REDIS_URL` / `REDIS_HOST` (optional) - durable backend; unset means inline only
/// - `JOB_QUEUE_MODE` (optional) - `inline` forces inline; `durable`/`auto` (default) use the backend when configured
/// - `JOB_QUEUE_INLINE_FALLBACK` (default: true) - run inline when a durable enqueue fails
/// - `JOB_QUEUE_PREFIX` (default: jobs) - key prefix for queue streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pub redis: Option<RedisConfig>,
    pub force_inline: bool,
    pub inline_fallback: bool,
    pub queue_prefix: String,
}

impl DispatchConfig {
    /// Inline only, no backend.
    pub fn inline() -> Self {
        Self {
            redis: None,
            force_inline: false,
            inline_fallback: true,
            queue_prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Durable with fallback enabled.
    pub fn durable(url: impl Into<String>) -> Self {
        Self {
            redis: Some(RedisConfig::new(url)),
            ..Self::inline()
        }
    }

    pub fn with_force_inline(mut self, force_inline: bool) -> Self {
        self.force_inline = force_inline;
        self
    }

    pub fn with_inline_fallback(mut self, enabled: bool) -> Self {
        self.inline_fallback = enabled;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_prefix = prefix.into();
        self
    }

    /// Backend connection URL, if one is configured.
    pub fn backend_url(&self) -> Option<String> {
        self.redis
            .as_ref()
            .filter(|redis| redis.is_configured())
            .map(RedisConfig::build_url)
    }

    /// Inline when forced or when no backend is configured, durable otherwise.
    pub fn mode(&self) -> DispatchMode {
        if self.force_inline || self.backend_url().is_none() {
            DispatchMode::Inline
        } else {
            DispatchMode::Durable
        }
    }
}

impl FromEnv for DispatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let force_inline = match env_optional("JOB_QUEUE_MODE")
            .map(|mode| mode.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("auto") | Some("durable") => false,
            Some("inline") => true,
            Some(other) => {
                return Err(ConfigError::ParseError {
                    key: "JOB_QUEUE_MODE".to_string(),
                    details: format!("expected inline, durable or auto, got '{}'", other),
                })
            }
        };

        Ok(Self {
            redis: RedisConfig::from_env_optional()?,
            force_inline,
            inline_fallback: env_flag("JOB_QUEUE_INLINE_FALLBACK", true)?,
            queue_prefix: env_or_default("JOB_QUEUE_PREFIX", DEFAULT_PREFIX),
        })
    }
}

/// Worker process tuning.
///
/// Environment variables:
/// - `JOB_WORKER_CONCURRENCY` (default: 4) - jobs processed at once per queue
/// - `JOB_TIMEOUT_SECS` (default: 300) - execution budget of one handler call
/// - `JOB_WORKER_CONSUMER_ID` or `HOSTNAME` (optional) - consumer name kept
///   across restarts, so a restarted worker replays its own unacknowledged jobs.
///   Must differ between processes sharing a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub job_timeout: Duration,
    /// Random per start when unset
    pub consumer_id: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: Duration::from_secs(300),
            consumer_id: None,
        }
    }
}

impl FromEnv for WorkerSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let concurrency: usize = env_parse("JOB_WORKER_CONCURRENCY", 4)?;
        let timeout_secs: u64 = env_parse("JOB_TIMEOUT_SECS", 300)?;

        Ok(Self {
            concurrency: concurrency.max(1),
            job_timeout: Duration::from_secs(timeout_secs.max(1)),
            consumer_id: env_optional("JOB_WORKER_CONSUMER_ID")
                .or_else(|| env_optional("HOSTNAME"))
                .map(|id| format!("worker-{}", id)),
        })
    }
}
