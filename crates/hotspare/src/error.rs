//! Error types for master election

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("backend connection error: {0}")]
    Connection(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("lock {0} is held elsewhere")]
    LockUnavailable(String),

    #[error("start input must carry quit and done channels")]
    InvalidStart,

    #[error("node already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, Error>;
