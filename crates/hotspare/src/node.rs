//! Master election node
//!
//! A [`Node`] repeatedly tries to acquire a shared [`DistLock`] on a fixed
//! tick, flips between [`Role::Master`] and [`Role::Worker`] according to
//! the outcome, and invokes the caller's callback once per tick while it
//! holds the master role. Shutdown is a two-phase handshake: the caller
//! signals `quit`, the engine acknowledges that it has stopped, and only
//! then does `done` fire.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::DistLock;
use crate::redis::RedisLock;

/// Opaque value handed unchanged to every master callback invocation.
pub type MasterContext = Arc<dyn Any + Send + Sync>;

/// Callback invoked once per tick while this node is master.
///
/// The returned error is logged and otherwise ignored: it does not alter
/// the election state machine and is not retried.
pub type MasterCallback =
    Arc<dyn Fn(MasterContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Election role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No election attempt has completed yet.
    Unknown,
    /// The lock is held elsewhere.
    Worker,
    /// This node holds the lock.
    Master,
}

/// Lock key for a node name, shared by every node in the group.
pub fn default_lock_key(name: &str) -> String {
    format!("{name}-distlocker")
}

/// Input to [`Node::start`], consumed exactly once.
///
/// `quit` and `done` are mandatory; an input missing either is rejected
/// with [`Error::InvalidStart`] before anything is spawned.
#[derive(Default)]
pub struct StartInput {
    /// Called once per tick while master. `None` elects without acting.
    pub on_master: Option<MasterCallback>,
    /// Passed unchanged to every `on_master` invocation.
    pub master_ctx: Option<MasterContext>,
    /// One emission (or dropping the sender) requests termination.
    pub quit: Option<mpsc::Receiver<()>>,
    /// Fired exactly once, after the engine has actually stopped.
    pub done: Option<mpsc::Sender<()>>,
}

/// A process that competes for the master role in a group of identical
/// nodes sharing one distributed lock.
pub struct Node {
    name: String,
    verbose: bool,
    tick_secs: u64,
    lock: Arc<dyn DistLock>,
    master: AtomicBool,
    running: AtomicBool,
    identity: OnceLock<String>,
    role_tx: watch::Sender<Role>,
    role_rx: watch::Receiver<Role>,
}

/// Builder for [`Node`]. Later calls to the same option overwrite
/// earlier ones.
pub struct NodeBuilder {
    name: String,
    verbose: bool,
    tick_secs: u64,
    lock: Option<Arc<dyn DistLock>>,
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self {
            name: "kettle".to_string(),
            verbose: false,
            tick_secs: 30,
            lock: None,
        }
    }
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Human label for the node; also derives the default lock key.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Emit per-tick role logs at `info` instead of `debug`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Supply a custom lock; bypasses default backend construction.
    pub fn with_lock(mut self, lock: Arc<dyn DistLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Election interval in seconds. Also the expiry of the default lock.
    pub fn with_tick_secs(mut self, secs: u64) -> Self {
        self.tick_secs = secs;
        self
    }

    /// Resolves the configuration into a ready [`Node`].
    ///
    /// When no custom lock was supplied, a [`RedisLock`] is built from
    /// the environment with key `<name>-distlocker` and expiry equal to
    /// the tick interval; its construction errors propagate from here.
    pub async fn build(self) -> Result<Node> {
        if self.tick_secs == 0 {
            return Err(Error::Config(
                "tick interval must be at least 1 second".to_string(),
            ));
        }

        let lock = match self.lock {
            Some(lock) => lock,
            None => {
                Arc::new(RedisLock::from_env(default_lock_key(&self.name), self.tick_secs).await?)
                    as Arc<dyn DistLock>
            }
        };

        let (role_tx, role_rx) = watch::channel(Role::Unknown);

        Ok(Node {
            name: self.name,
            verbose: self.verbose,
            tick_secs: self.tick_secs,
            lock,
            master: AtomicBool::new(false),
            running: AtomicBool::new(false),
            identity: OnceLock::new(),
            role_tx,
            role_rx,
        })
    }
}

impl Node {
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn tick_secs(&self) -> u64 {
        self.tick_secs
    }

    /// Point-in-time snapshot of the master flag.
    pub fn is_master(&self) -> bool {
        self.master.load(Ordering::SeqCst)
    }

    /// Current election role.
    pub fn role(&self) -> Role {
        *self.role_rx.borrow()
    }

    /// Subscribe to role changes.
    pub fn subscribe(&self) -> watch::Receiver<Role> {
        self.role_rx.clone()
    }

    /// `<hostname>__<uuid>`, minted by [`start`](Node::start). `None`
    /// before the node has been started.
    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    /// Starts the election engine and the termination watcher, then
    /// returns immediately.
    ///
    /// The watcher blocks on `quit`; on receipt it stops the engine,
    /// waits for the engine's acknowledgement, and only then fires
    /// `done`. A node cannot be started twice.
    pub fn start(self: &Arc<Self>, input: StartInput) -> Result<()> {
        let StartInput {
            on_master,
            master_ctx,
            quit,
            done,
        } = input;

        let (Some(mut quit), Some(done)) = (quit, done) else {
            return Err(Error::InvalidStart);
        };

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let _ = self.identity.set(format!("{hostname}__{}", Uuid::new_v4()));

        if self.verbose {
            info!(
                name = %self.name,
                identity = self.identity().unwrap_or(""),
                tick_secs = self.tick_secs,
                "starting master election"
            );
        } else {
            debug!(
                name = %self.name,
                identity = self.identity().unwrap_or(""),
                tick_secs = self.tick_secs,
                "starting master election"
            );
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let (ack_tx, mut ack_rx) = mpsc::channel::<()>(1);

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let _ = quit.recv().await;
            if node.verbose {
                info!(name = %node.name, identity = node.identity().unwrap_or(""), "termination requested");
            } else {
                debug!(name = %node.name, identity = node.identity().unwrap_or(""), "termination requested");
            }

            // Two-phase: stop the engine, wait for it to actually exit.
            let _ = stop_tx.send(()).await;
            let _ = ack_rx.recv().await;

            if node.verbose {
                info!(name = %node.name, identity = node.identity().unwrap_or(""), "termination complete");
            } else {
                debug!(name = %node.name, identity = node.identity().unwrap_or(""), "termination complete");
            }
            let _ = done.send(()).await;
        });

        let ctx = master_ctx.unwrap_or_else(|| Arc::new(()) as MasterContext);
        self.spawn_engine(on_master, ctx, stop_rx, ack_tx);

        Ok(())
    }

    fn spawn_engine(
        self: &Arc<Self>,
        on_master: Option<MasterCallback>,
        ctx: MasterContext,
        mut stop_rx: mpsc::Receiver<()>,
        ack_tx: mpsc::Sender<()>,
    ) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            // First election happens before the ticker is armed, so a
            // quit can never preempt the initial attempt.
            node.run_cycle(on_master.as_ref(), &ctx).await;

            let mut ticker = tokio::time::interval(Duration::from_secs(node.tick_secs));
            // Drop ticks missed during a slow cycle; one attempt per tick,
            // never a burst of catch-up cycles.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick; that cycle already ran

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        node.run_cycle(on_master.as_ref(), &ctx).await;
                    }
                    _ = stop_rx.recv() => {
                        // No final release; the lock's expiry is the cleanup.
                        let _ = ack_tx.send(()).await;
                        return;
                    }
                }
            }
        });
    }

    /// One work cycle: attempt the lock, update the role, and while
    /// master run the callback exactly once.
    async fn run_cycle(&self, on_master: Option<&MasterCallback>, ctx: &MasterContext) {
        match self.lock.acquire().await {
            Ok(()) => {
                self.set_role(Role::Master);
                if self.verbose {
                    info!(name = %self.name, identity = self.identity().unwrap_or(""), "set to master");
                } else {
                    debug!(name = %self.name, identity = self.identity().unwrap_or(""), "set to master");
                }

                if let Some(cb) = on_master {
                    if let Err(err) = cb(Arc::clone(ctx)).await {
                        error!(
                            name = %self.name,
                            identity = self.identity().unwrap_or(""),
                            error = %err,
                            "master callback failed"
                        );
                    }
                }
            }
            Err(err) => {
                // Expected steady state while another node holds the lock.
                self.set_role(Role::Worker);
                if self.verbose {
                    info!(name = %self.name, identity = self.identity().unwrap_or(""), reason = %err, "set to worker");
                } else {
                    debug!(name = %self.name, identity = self.identity().unwrap_or(""), reason = %err, "set to worker");
                }
            }
        }
    }

    fn set_role(&self, role: Role) {
        let is_master = role == Role::Master;
        let was_master = self.master.swap(is_master, Ordering::SeqCst);
        let _ = self.role_tx.send(role);

        if was_master != is_master {
            let transition = if is_master {
                "became master"
            } else {
                "stepped down to worker"
            };
            if self.verbose {
                info!(name = %self.name, identity = self.identity().unwrap_or(""), "{transition}");
            } else {
                debug!(name = %self.name, identity = self.identity().unwrap_or(""), "{transition}");
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("verbose", &self.verbose)
            .field("tick_secs", &self.tick_secs)
            .field("master", &self.is_master())
            .field("role", &self.role())
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
