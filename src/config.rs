//! Hub configuration, read from environment variables. Every setting has a
//! default so the hub starts with no configuration at all.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Env: `HUB_ADDR`
    pub addr: SocketAddr,

    /// SQLite URL for the durable store. Without one the hub keeps everything
    /// in memory.
    /// Env: `DATABASE_URL`
    pub database_url: Option<String>,

    /// Env: `HUB_TLS_CERT` and `HUB_TLS_KEY`, both required.
    pub tls: Option<TlsPaths>,

    /// Env: `HUB_STATIC_DIR`
    pub static_dir: PathBuf,

    /// Env: `HUB_MAX_MESSAGE_LENGTH`
    pub max_message_length: usize,

    /// Env: `HUB_HISTORY_LIMIT`
    pub history_default_limit: usize,

    /// Env: `HUB_HISTORY_MAX_LIMIT`
    pub history_max_limit: usize,

    /// Inbound events a single connection may have waiting before further
    /// frames are shed.
    /// Env: `HUB_EVENT_QUEUE_DEPTH`
    pub event_queue_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            addr: ([0, 0, 0, 0], 2052).into(),
            database_url: None,
            tls: None,
            static_dir: PathBuf::from("public"),
            max_message_length: 4000,
            history_default_limit: 50,
            history_max_limit: 200,
            event_queue_depth: 64,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HUB_ADDR", &mut config.addr);
        parse_into(&lookup, "HUB_MAX_MESSAGE_LENGTH", &mut config.max_message_length);
        parse_into(&lookup, "HUB_HISTORY_LIMIT", &mut config.history_default_limit);
        parse_into(&lookup, "HUB_HISTORY_MAX_LIMIT", &mut config.history_max_limit);
        parse_into(&lookup, "HUB_EVENT_QUEUE_DEPTH", &mut config.event_queue_depth);

        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            config.database_url = Some(url);
        }

        if let Some(dir) = lookup("HUB_STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }

        match (lookup("HUB_TLS_CERT"), lookup("HUB_TLS_KEY")) {
            (Some(cert), Some(key)) => {
                config.tls = Some(TlsPaths {
                    cert: PathBuf::from(cert),
                    key: PathBuf::from(key),
                });
            }
            (None, None) => {}
            _ => warn!("HUB_TLS_CERT and HUB_TLS_KEY must be set together, serving without TLS"),
        }

        if config.history_default_limit > config.history_max_limit {
            warn!(
                "HUB_HISTORY_LIMIT {} exceeds HUB_HISTORY_MAX_LIMIT {}, clamping",
                config.history_default_limit, config.history_max_limit
            );
            config.history_default_limit = config.history_max_limit;
        }

        if config.event_queue_depth == 0 {
            warn!("HUB_EVENT_QUEUE_DEPTH must be positive, using default");
            config.event_queue_depth = Self::default().event_queue_depth;
        }

        config
    }

    /// Resolve a client-requested history size.
    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.history_default_limit)
            .clamp(1, self.history_max_limit.max(1))
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => warn!("Invalid {} value {:?}, using default", key, raw),
    }
}
