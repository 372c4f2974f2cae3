use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// Commands refused from inside a script by default: anything that blocks,
/// changes connection state or manages transactions and subscriptions.
pub const DEFAULT_SCRIPT_DENIED: &[&str] = &[
    "blpop",
    "brpop",
    "brpoplpush",
    "blmove",
    "bzpopmin",
    "bzpopmax",
    "multi",
    "exec",
    "discard",
    "watch",
    "unwatch",
    "subscribe",
    "unsubscribe",
    "psubscribe",
    "punsubscribe",
    "eval",
    "evalsha",
    "script",
    "select",
    "swapdb",
    "quit",
    "save",
    "bgsave",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub databases: usize,
    /// Pause between two active-expiry passes.
    pub expiry_interval: Duration,
    /// Keys sampled per database per pass.
    pub expiry_sample_size: usize,
    /// Lower-case command names `redis.call` may not run.
    pub script_denied_commands: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            databases: 16,
            expiry_interval: Duration::from_millis(100),
            expiry_sample_size: 20,
            script_denied_commands: DEFAULT_SCRIPT_DENIED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `REDUST_DATABASES`, `REDUST_EXPIRY_INTERVAL_MS`,
    /// `REDUST_EXPIRY_SAMPLE_SIZE` and `REDUST_SCRIPT_DENY` (comma separated,
    /// added to the default deny list).
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();

        if let Some(n) = env_parse::<usize>("REDUST_DATABASES") {
            if n == 0 {
                warn!("REDUST_DATABASES must be positive, keeping {}", config.databases);
            } else {
                config.databases = n;
            }
        }
        if let Some(ms) = env_parse::<u64>("REDUST_EXPIRY_INTERVAL_MS") {
            config.expiry_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = env_parse::<usize>("REDUST_EXPIRY_SAMPLE_SIZE") {
            config.expiry_sample_size = n;
        }
        if let Ok(list) = env::var("REDUST_SCRIPT_DENY") {
            for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let name = name.to_ascii_lowercase();
                if !config.script_denied_commands.contains(&name) {
                    config.script_denied_commands.push(name);
                }
            }
        }

        config
    }

    pub fn denies_in_script(&self, name: &str) -> bool {
        self.script_denied_commands.iter().any(|d| d == name)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

/// Installs an `env_logger` honouring `RUST_LOG` (default `info`). Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
