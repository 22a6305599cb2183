use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_KEY_PREFIX: &str = "inbox:";
const DEFAULT_SIGNATURE_HEADER: &str = "zenflows-sign";

// Default timeouts
const DEFAULT_AUTH_TIMEOUT_MS: u64 = 5000;
const DEFAULT_KEY_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

pub const SECONDS_PER_DAY: i64 = 86400;

/// Maximum accepted HTTP request body (2 MB)
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Which `MessageStore` implementation backs the inbox
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Redis sets, destructive read
    Redis,
    /// Postgres rows, non-destructive read
    Postgres,
    /// In-process set-store (development only, not persistent)
    MemorySet,
    /// In-process table-store (development only, not persistent)
    MemoryTable,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" | "set" => Ok(Self::Redis),
            "postgres" | "postgresql" | "pg" | "table" => Ok(Self::Postgres),
            "memory-set" | "memory" => Ok(Self::MemorySet),
            "memory-table" => Ok(Self::MemoryTable),
            _ => anyhow::bail!(
                "Invalid STORE_BACKEND: {}. Must be one of redis, postgres, memory-set, memory-table",
                s
            ),
        }
    }
}

/// Storage backend configuration
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Prefix of the per-receiver set key: "{prefix}{receiver}"
    pub redis_key_prefix: String,
    /// TTL for pending messages in the set-store; 0 disables expiry
    pub message_ttl_days: i64,
    pub database_url: Option<String>,
    pub db: DbConfig,
}

/// Database connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool (seconds)
    pub acquire_timeout_secs: u64,
}

/// Request authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// GraphQL endpoint of the public key directory
    pub key_directory_url: Option<String>,
    /// Fixed identity -> public key map, used instead of the directory when set
    pub static_public_keys: HashMap<String, String>,
    pub key_cache_ttl_secs: u64,
    /// Out-of-process signature evaluator; in-process Ed25519 when unset
    pub verifier_url: Option<String>,
    /// Upper bound for each authorization step (key lookup, verification)
    pub timeout_ms: u64,
    /// Header carrying the detached request signature
    pub signature_header: String,
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub enable_user_identifiers: bool,
    pub hash_salt: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    /// Include per-receiver delivered/failed lists in send responses
    pub delivery_details: bool,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend: StoreBackend = var("STORE_BACKEND")
            .unwrap_or_else(|| "redis".to_string())
            .parse()?;

        let database_url = var("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when STORE_BACKEND=postgres");
        }

        let static_public_keys = match var("STATIC_PUBLIC_KEYS") {
            Some(raw) => parse_key_map(&raw).context("Invalid STATIC_PUBLIC_KEYS")?,
            None => HashMap::new(),
        };
        // Legacy deployments point ZENFLOWS at the directory's GraphQL endpoint
        let key_directory_url = var("KEY_DIRECTORY_URL").or_else(|| var("ZENFLOWS"));
        if key_directory_url.is_none() && static_public_keys.is_empty() {
            anyhow::bail!("KEY_DIRECTORY_URL or STATIC_PUBLIC_KEYS must be set");
        }

        // A random salt keeps hashes unlinkable across restarts
        let hash_salt = var("LOG_HASH_SALT").unwrap_or_else(random_salt);

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(var("PORT"), DEFAULT_PORT, "PORT")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            delivery_details: parse_or(var("INBOX_DELIVERY_DETAILS"), false, "INBOX_DELIVERY_DETAILS")?,
            store: StoreConfig {
                backend,
                redis_url: var("REDIS_URL")
                    .or_else(|| var("REDIS").map(|addr| normalize_redis_url(&addr)))
                    .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
                redis_key_prefix: var("REDIS_KEY_PREFIX")
                    .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string()),
                message_ttl_days: parse_or(var("MESSAGE_TTL_DAYS"), 0, "MESSAGE_TTL_DAYS")?,
                database_url,
                db: DbConfig {
                    max_connections: parse_or(
                        var("DB_MAX_CONNECTIONS"),
                        DEFAULT_DB_MAX_CONNECTIONS,
                        "DB_MAX_CONNECTIONS",
                    )?,
                    acquire_timeout_secs: parse_or(
                        var("DB_ACQUIRE_TIMEOUT_SECS"),
                        DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
                        "DB_ACQUIRE_TIMEOUT_SECS",
                    )?,
                },
            },
            auth: AuthConfig {
                key_directory_url,
                static_public_keys,
                key_cache_ttl_secs: parse_or(
                    var("KEY_CACHE_TTL_SECS"),
                    DEFAULT_KEY_CACHE_TTL_SECS,
                    "KEY_CACHE_TTL_SECS",
                )?,
                verifier_url: var("VERIFIER_URL"),
                timeout_ms: parse_or(var("AUTH_TIMEOUT_MS"), DEFAULT_AUTH_TIMEOUT_MS, "AUTH_TIMEOUT_MS")?,
                signature_header: var("SIGNATURE_HEADER")
                    .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string())
                    .to_lowercase(),
            },
            logging: LoggingConfig {
                enable_user_identifiers: parse_or(
                    var("LOG_USER_IDENTIFIERS"),
                    false,
                    "LOG_USER_IDENTIFIERS",
                )?,
                hash_salt,
            },
        })
    }
}

fn parse_or<T>(value: Option<String>, default: T, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}={}: {}", name, raw, e)),
        None => Ok(default),
    }
}

/// Accepts a bare "host:port" the way the legacy REDIS variable was set
fn normalize_redis_url(addr: &str) -> String {
    if addr.starts_with("redis://") || addr.starts_with("rediss://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

/// Parses "alice=KEY,bob=KEY"
fn parse_key_map(raw: &str) -> Result<HashMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (identity, key) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected identity=key, got '{}'", entry))?;
            Ok((identity.trim().to_string(), key.trim().to_string()))
        })
        .collect()
}

fn random_salt() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[(
            "KEY_DIRECTORY_URL",
            "http://zenflows.local/api",
        )]))
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(config.store.redis_key_prefix, "inbox:");
        assert_eq!(config.auth.signature_header, "zenflows-sign");
        assert_eq!(config.auth.timeout(), Duration::from_millis(5000));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(!config.delivery_details);
        assert!(!config.logging.hash_salt.is_empty());
    }

    #[test]
    fn test_legacy_variables() {
        let config = Config::from_lookup(lookup(&[
            ("ZENFLOWS", "http://zenflows.local/api"),
            ("REDIS", "cache:6379"),
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(
            config.auth.key_directory_url.as_deref(),
            Some("http://zenflows.local/api")
        );
        assert_eq!(config.store.redis_url, "redis://cache:6379");
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let result = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "postgres"),
            ("KEY_DIRECTORY_URL", "http://zenflows.local/api"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_directory_or_static_keys_required() {
        assert!(Config::from_lookup(lookup(&[])).is_err());

        let config = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory-table"),
            ("STATIC_PUBLIC_KEYS", "alice=AAAA, bob=BBBB"),
        ]))
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::MemoryTable);
        assert_eq!(config.auth.static_public_keys.len(), 2);
        assert_eq!(config.auth.static_public_keys["bob"], "BBBB");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = [("KEY_DIRECTORY_URL", "http://zenflows.local/api")];

        let mut vars = base.to_vec();
        vars.push(("PORT", "not-a-port"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("STORE_BACKEND", "mongodb"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());

        let mut vars = base.to_vec();
        vars.push(("STATIC_PUBLIC_KEYS", "alice"));
        assert!(Config::from_lookup(lookup(&vars)).is_err());
    }
}
