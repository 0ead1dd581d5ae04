//! Hotspare
//!
//! A leader-election primitive for groups of identical worker processes.
//! Every process runs a [`Node`] that competes for a shared distributed
//! lock on a fixed tick; the winner becomes the master and runs the
//! caller's privileged callback once per tick, the rest stand by as hot
//! spares, ready to take over when the lock expires.
//!
//! # Features
//!
//! - **Tick-driven election**: one lock attempt per tick, the first one
//!   immediately at start
//! - **Pluggable lock backend**: any [`DistLock`] implementation; a
//!   Redis-backed default is built from the environment
//! - **Graceful shutdown**: a two-phase quit/done handshake that only
//!   reports completion after the election loop has actually stopped
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotspare::{MasterCallback, Node, StartInput};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> hotspare::Result<()> {
//!     // Reads REDIS_HOST (and optionally REDIS_PASSWORD,
//!     // REDIS_TIMEOUT_SECONDS) for the default lock backend.
//!     let node = Arc::new(
//!         Node::builder()
//!             .with_name("reports")
//!             .with_verbose(true)
//!             .with_tick_secs(5)
//!             .build()
//!             .await?,
//!     );
//!
//!     let (quit_tx, quit_rx) = mpsc::channel(1);
//!     let (done_tx, mut done_rx) = mpsc::channel(1);
//!
//!     let on_master: MasterCallback = Arc::new(|_ctx| {
//!         Box::pin(async move {
//!             println!("running the privileged action");
//!             Ok(())
//!         })
//!     });
//!
//!     node.start(StartInput {
//!         on_master: Some(on_master),
//!         quit: Some(quit_rx),
//!         done: Some(done_tx),
//!         ..Default::default()
//!     })?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     quit_tx.send(()).await.ok();
//!     done_rx.recv().await;
//!     Ok(())
//! }
//! ```

mod error;
mod lock;
mod node;
mod redis;

pub use crate::error::{Error, Result};
pub use crate::lock::DistLock;
pub use crate::node::{
    default_lock_key, MasterCallback, MasterContext, Node, NodeBuilder, Role, StartInput,
};
pub use crate::redis::{
    RedisConfig, RedisLock, ENV_REDIS_HOST, ENV_REDIS_PASSWORD, ENV_REDIS_TIMEOUT_SECONDS,
};
