//! Redis connectivity shared by the job dispatch crates.
//!
//! # Features
//!
//! - `redis` (default) - Redis connector, configuration and health checks
//! - `config` - `core_config::FromEnv` support for [`redis::RedisConfig`]
//!
//! # Example
//!
//! ```ignore
//! use database::redis;
//! use redis::AsyncCommands;
//!
//! let mut conn = redis::connect("redis://127.0.0.1:6379").await?;
//! conn.set::<_, _, ()>("key", "value").await?;
//! ```

pub mod common;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
