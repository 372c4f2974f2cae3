//! The emulated server: shared state behind one lock, and the public handle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::blocking::BlockingRegistry;
use crate::config::ServerConfig;
use crate::expiry;
use crate::pubsub::PubSubRegistry;
use crate::scripting::{LuaExecutor, ScriptCache, ScriptExecutor};
use crate::session::Session;
use crate::storage::{Database, Key};

/// Unix milliseconds that never run backwards.
#[derive(Debug, Default)]
struct Clock {
    last: i64,
}

impl Clock {
    fn now(&mut self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        self.last = self.last.max(wall);
        self.last
    }
}

/// Everything guarded by the server lock.
pub(crate) struct ServerState {
    pub dbs: Vec<Database>,
    pub pubsub: PubSubRegistry,
    pub blocking: BlockingRegistry,
    /// Unix seconds of the last SAVE/BGSAVE.
    pub lastsave: i64,
    clock: Clock,
}

impl ServerState {
    fn new(config: &ServerConfig) -> Self {
        let versions = Arc::new(AtomicU64::new(0));
        let mut clock = Clock::default();
        let lastsave = clock.now() / 1000;
        ServerState {
            dbs: (0..config.databases.max(1))
                .map(|_| Database::new(versions.clone()))
                .collect(),
            pubsub: PubSubRegistry::default(),
            blocking: BlockingRegistry::default(),
            lastsave,
            clock,
        }
    }

    pub fn now(&mut self) -> i64 {
        self.clock.now()
    }

    /// Hands freshly written keys to parked sessions until nothing changes.
    pub fn serve_blocked(&mut self, now: i64) {
        loop {
            let mut seen = HashSet::new();
            let mut touched: Vec<(usize, Key)> = Vec::new();
            for (index, db) in self.dbs.iter_mut().enumerate() {
                for key in db.take_touched() {
                    if seen.insert((index, key.clone())) {
                        touched.push((index, key));
                    }
                }
            }
            if touched.is_empty() || self.blocking.is_empty() {
                return;
            }
            for (index, key) in touched {
                self.blocking.serve_key(&mut self.dbs, index, &key, now);
            }
        }
    }
}

/// State shared by every handle and session of one server.
pub(crate) struct Shared {
    state: Mutex<ServerState>,
    pub config: ServerConfig,
    pub scripts: ScriptCache,
    pub executor: Arc<dyn ScriptExecutor>,
    connected: AtomicBool,
    next_session: AtomicU64,
}

impl Shared {
    /// Commands apply atomically, so a poisoned lock still holds
    /// consistent state.
    pub fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Handle to one emulated server. Clones share the same instance.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Shared>,
}

impl Server {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// A new client connection, starting on database 0.
    pub fn open_session(&self) -> Session {
        Session::new(self.inner.clone())
    }

    /// Fault injection: while disconnected every command fails with a
    /// connection error before any other validation.
    pub fn set_connected(&self, connected: bool) {
        if !connected {
            warn!("server marked disconnected, commands will fail");
        }
        self.inner.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Runs one active-expiry pass now; returns how many keys it removed.
    pub fn run_expiry_sweep(&self) -> usize {
        let mut state = self.inner.lock();
        let now = state.now();
        expiry::sweep_once(&mut state, self.inner.config.expiry_sample_size, now)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ServerBuilder {
    config: ServerConfig,
    executor: Option<Arc<dyn ScriptExecutor>>,
    active_expiry: bool,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            config: ServerConfig::default(),
            executor: None,
            active_expiry: true,
        }
    }
}

impl ServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default Lua executor.
    pub fn executor<E: ScriptExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Whether to start the background expiry task (needs a tokio runtime).
    pub fn active_expiry(mut self, enabled: bool) -> Self {
        self.active_expiry = enabled;
        self
    }

    pub fn build(self) -> Server {
        let state = ServerState::new(&self.config);
        let inner = Arc::new(Shared {
            state: Mutex::new(state),
            scripts: ScriptCache::new(),
            executor: self.executor.unwrap_or_else(|| Arc::new(LuaExecutor::new())),
            connected: AtomicBool::new(true),
            next_session: AtomicU64::new(0),
            config: self.config,
        });
        info!(
            "server started with {} databases",
            inner.config.databases.max(1)
        );
        if self.active_expiry {
            expiry::spawn(&inner);
        }
        Server { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_never_goes_back() {
        let mut clock = Clock { last: i64::MAX - 1 };
        assert_eq!(clock.now(), i64::MAX - 1);
        let mut fresh = Clock::default();
        let a = fresh.now();
        let b = fresh.now();
        assert!(b >= a && a > 0);
    }

    #[test]
    fn builds_without_runtime() {
        let server = Server::builder()
            .config(ServerConfig {
                databases: 3,
                ..ServerConfig::default()
            })
            .build();
        assert_eq!(server.inner.lock().dbs.len(), 3);
        assert!(server.is_connected());
        assert_eq!(server.run_expiry_sweep(), 0);
    }
}
