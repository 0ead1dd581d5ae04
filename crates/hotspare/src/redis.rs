//! Redis-backed distributed lock
//!
//! The default [`DistLock`] backend:
//! - `SET NX EX` for atomic acquisition with an expiry
//! - Lua check-and-extend so the current holder can re-acquire each tick
//! - Lua check-and-delete so a release never clobbers another holder
//!
//! Connection settings come from the environment; see [`RedisConfig`].

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::DistLock;

/// Required: Redis address, `host:port` or a full `redis://` URL.
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
/// Optional: Redis password.
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
/// Optional: connect timeout in seconds.
pub const ENV_REDIS_TIMEOUT_SECONDS: &str = "REDIS_TIMEOUT_SECONDS";

const EXTEND_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        redis.call("EXPIRE", KEYS[1], ARGV[2])
        return 1
    else
        return 0
    end
"#;

const RELEASE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        redis.call("DEL", KEYS[1])
        return 1
    else
        return 0
    end
"#;

/// Connection parameters for the default Redis backend.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub password: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl RedisConfig {
    /// Reads the configuration from the environment.
    ///
    /// A missing [`ENV_REDIS_HOST`] or an unparsable
    /// [`ENV_REDIS_TIMEOUT_SECONDS`] is a construction error.
    pub fn from_env() -> Result<Self> {
        let addr = std::env::var(ENV_REDIS_HOST)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "{ENV_REDIS_HOST} must be set (host:port or redis://...)"
                ))
            })?;

        let password = std::env::var(ENV_REDIS_PASSWORD)
            .ok()
            .filter(|v| !v.is_empty());

        let connect_timeout_secs = match std::env::var(ENV_REDIS_TIMEOUT_SECONDS)
            .ok()
            .filter(|v| !v.is_empty())
        {
            Some(raw) => Some(raw.parse::<u64>().map_err(|e| {
                Error::Config(format!("{ENV_REDIS_TIMEOUT_SECONDS} is not a number: {e}"))
            })?),
            None => None,
        };

        Ok(Self {
            addr,
            password,
            connect_timeout_secs,
        })
    }

    /// The connection URL. An `addr` that already carries a scheme is
    /// used as-is; otherwise one is composed with the optional password.
    pub fn url(&self) -> String {
        if self.addr.starts_with("redis://") || self.addr.starts_with("rediss://") {
            return self.addr.clone();
        }

        match &self.password {
            Some(password) => format!("redis://:{password}@{}", self.addr),
            None => format!("redis://{}", self.addr),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

/// The default [`DistLock`] backend.
///
/// Each instance carries its own random holder token, so a lock value in
/// Redis identifies which node currently owns the key.
pub struct RedisLock {
    conn: ConnectionManager,
    key: String,
    ttl_secs: u64,
    holder: String,
}

impl RedisLock {
    /// Connects to Redis and prepares a lock on `key` with the given
    /// expiry. Connection failure is a construction error.
    pub async fn connect(config: RedisConfig, key: impl Into<String>, ttl_secs: u64) -> Result<Self> {
        let client = redis::Client::open(config.url().as_str())
            .map_err(|e| Error::Connection(e.to_string()))?;

        let conn = match config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    Error::Connection(format!("timed out connecting to {}", config.addr))
                })??,
            None => ConnectionManager::new(client).await?,
        };

        Ok(Self {
            conn,
            key: key.into(),
            ttl_secs,
            holder: Uuid::new_v4().to_string(),
        })
    }

    /// [`connect`](Self::connect) with [`RedisConfig::from_env`].
    pub async fn from_env(key: impl Into<String>, ttl_secs: u64) -> Result<Self> {
        Self::connect(RedisConfig::from_env()?, key, ttl_secs).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl DistLock for RedisLock {
    async fn acquire(&self) -> Result<()> {
        let mut conn = self.conn.clone();

        // SET key holder NX EX ttl
        let set: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.holder)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        if set.is_some() {
            return Ok(());
        }

        // Key exists. If it is ours, refresh the expiry instead of failing,
        // so the holder keeps the lock across ticks.
        let extended: i32 = redis::Script::new(EXTEND_SCRIPT)
            .key(&self.key)
            .arg(&self.holder)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        if extended == 1 {
            Ok(())
        } else {
            Err(Error::LockUnavailable(self.key.clone()))
        }
    }

    async fn release(&self) -> bool {
        let mut conn = self.conn.clone();

        match redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.holder)
            .invoke_async::<i32>(&mut conn)
            .await
        {
            Ok(deleted) => deleted == 1,
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to release lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize the tests that
    // touch them.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn clear_env() {
        std::env::remove_var(ENV_REDIS_HOST);
        std::env::remove_var(ENV_REDIS_PASSWORD);
        std::env::remove_var(ENV_REDIS_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_from_env_requires_host() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();

        let err = RedisConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_env_full() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_REDIS_HOST, "redis.internal:6379");
        std::env::set_var(ENV_REDIS_PASSWORD, "hunter2");
        std::env::set_var(ENV_REDIS_TIMEOUT_SECONDS, "5");

        let config = RedisConfig::from_env().unwrap();
        assert_eq!(config.addr, "redis.internal:6379");
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(5)));
        clear_env();
    }

    #[test]
    fn test_from_env_rejects_bad_timeout() {
        let _guard = ENV_GUARD.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_REDIS_HOST, "localhost:6379");
        std::env::set_var(ENV_REDIS_TIMEOUT_SECONDS, "soon");

        let err = RedisConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        clear_env();
    }

    #[test]
    fn test_url_composition() {
        let config = RedisConfig {
            addr: "localhost:6379".to_string(),
            password: None,
            connect_timeout_secs: None,
        };
        assert_eq!(config.url(), "redis://localhost:6379");

        let config = RedisConfig {
            addr: "localhost:6379".to_string(),
            password: Some("hunter2".to_string()),
            connect_timeout_secs: None,
        };
        assert_eq!(config.url(), "redis://:hunter2@localhost:6379");

        let config = RedisConfig {
            addr: "redis://elsewhere:6380".to_string(),
            password: Some("ignored".to_string()),
            connect_timeout_secs: None,
        };
        assert_eq!(config.url(), "redis://elsewhere:6380");
    }
}
