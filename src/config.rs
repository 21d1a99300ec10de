// src/config.rs

/// Runtime configuration, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port to bind; 0 asks the kernel for an ephemeral port.
    pub port: u16,
    /// Enable a 1-second linger on the listening socket.
    pub enable_linger: bool,
    /// Pin worker i to CPU i.
    pub enable_thread_affinity: bool,
    /// Idle ticks (seconds) before a keep-alive connection is closed.
    pub keep_alive_timeout: u32,
    /// Worker count override; defaults to the online CPU count, minimum 2.
    pub workers: Option<usize>,
    /// Cap on the descriptor budget. The process limit is still raised; this
    /// only bounds the slot table and the per-worker quota.
    pub fd_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            enable_linger: false,
            enable_thread_affinity: false,
            keep_alive_timeout: 15,
            workers: None,
            fd_limit: None,
        }
    }
}

impl Config {
    /// Environment-driven configuration for the stock binary.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("SKUA_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(secs) = std::env::var("SKUA_KEEP_ALIVE") {
            if let Ok(secs) = secs.parse() {
                config.keep_alive_timeout = secs;
            }
        }
        if let Ok(n) = std::env::var("SKUA_WORKERS") {
            if let Ok(n) = n.parse() {
                config.workers = Some(n);
            }
        }
        config
    }
}
