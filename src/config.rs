// Configuration module for flowtrust
// Reads from environment variables with sensible defaults

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection pool size (FLOWTRUST_POOL_SIZE)
    pub pool_size: u32,

    /// Database connection pool minimum idle connections (FLOWTRUST_POOL_MIN_IDLE)
    pub pool_min_idle: u32,

    /// Longest path the traversal extends, in edges (FLOWTRUST_MAX_HOPS)
    pub max_hops: usize,

    /// Names settled before a traversal gives up (FLOWTRUST_MAX_VISITED)
    pub max_visited: usize,

    /// Wall-clock budget per reachability request in milliseconds (FLOWTRUST_TIMEOUT_MS)
    pub timeout_ms: u64,

    /// Implementation-class prefixes, comma separated (FLOWTRUST_CLASS_PREFIXES)
    pub class_prefixes: Vec<String>,

    /// Edges at or below this confidence are weak evidence (FLOWTRUST_WEAK_THRESHOLD)
    pub weak_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 10,
            pool_min_idle: 2,
            max_hops: 50,
            max_visited: 10_000,
            timeout_ms: 5_000,
            class_prefixes: vec!["T".to_string()],
            weak_threshold: 0.1,
        }
    }
}

fn read_var<T>(name: &str, target: &mut T)
where
    T: FromStr + std::fmt::Display,
{
    let Ok(val) = env::var(name) else {
        return;
    };
    match val.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!(
            "Invalid {} value: {}, using default: {}",
            name,
            val,
            target
        ),
    }
}

pub fn parse_prefixes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let mut config = Config::default();

        read_var("FLOWTRUST_POOL_SIZE", &mut config.pool_size);
        read_var("FLOWTRUST_POOL_MIN_IDLE", &mut config.pool_min_idle);
        read_var("FLOWTRUST_MAX_HOPS", &mut config.max_hops);
        read_var("FLOWTRUST_MAX_VISITED", &mut config.max_visited);
        read_var("FLOWTRUST_TIMEOUT_MS", &mut config.timeout_ms);
        read_var("FLOWTRUST_WEAK_THRESHOLD", &mut config.weak_threshold);

        if let Ok(val) = env::var("FLOWTRUST_CLASS_PREFIXES") {
            config.class_prefixes = parse_prefixes(&val);
        }

        config
    }

    /// Get the global configuration instance
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(Config::from_env)
    }
}
