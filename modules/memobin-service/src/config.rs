use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    Sqlite,
}

impl SessionBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub db_path: String,
    pub template_dir: PathBuf,
    pub static_dir: PathBuf,
    /// Show error detail and traces in 500 responses. Never enable in production.
    pub debug: bool,
    pub session_backend: SessionBackend,
    pub session_lifetime_hours: i64,
    pub session_sweep_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            db_path: "./memobin.db".to_string(),
            template_dir: PathBuf::from("./ui/html"),
            static_dir: PathBuf::from("./ui/static"),
            debug: false,
            session_backend: SessionBackend::Sqlite,
            session_lifetime_hours: 12,
            session_sweep_secs: 300,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            addr: env::var("MEMOBIN_ADDR").unwrap_or(defaults.addr),
            db_path: env::var("MEMOBIN_DB_PATH").unwrap_or(defaults.db_path),
            template_dir: env::var("MEMOBIN_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            static_dir: env::var("MEMOBIN_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            debug: env::var("MEMOBIN_DEBUG")
                .ok()
                .map(|s| parse_flag(&s))
                .unwrap_or(defaults.debug),
            session_backend: env::var("MEMOBIN_SESSION_STORE")
                .ok()
                .and_then(|s| SessionBackend::parse(&s))
                .unwrap_or(defaults.session_backend),
            session_lifetime_hours: env::var("MEMOBIN_SESSION_LIFETIME_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|h| *h > 0)
                .unwrap_or(defaults.session_lifetime_hours),
            session_sweep_secs: env::var("MEMOBIN_SESSION_SWEEP_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.session_sweep_secs),
        }
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
