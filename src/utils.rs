use sha2::{Digest, Sha256};

use crate::config::LoggingConfig;

/// Salted, truncated SHA-256 of an identity, safe to put in logs
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hash[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

/// The form of `identity` that may appear in logs under `logging`
pub fn loggable_id(identity: &str, logging: &LoggingConfig) -> String {
    if logging.enable_user_identifiers {
        identity.to_string()
    } else {
        log_safe_id(identity, &logging.hash_salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_safe_id_is_stable_and_salted() {
        let a = log_safe_id("alice", "salt-1");
        assert_eq!(a.len(), 8);
        assert_eq!(a, log_safe_id("alice", "salt-1"));
        assert_ne!(a, log_safe_id("alice", "salt-2"));
        assert_ne!(a, log_safe_id("bob", "salt-1"));
    }

    #[test]
    fn test_loggable_id_respects_config() {
        let mut logging = LoggingConfig {
            enable_user_identifiers: false,
            hash_salt: "salt".to_string(),
        };
        assert_eq!(loggable_id("alice", &logging), log_safe_id("alice", "salt"));

        logging.enable_user_identifiers = true;
        assert_eq!(loggable_id("alice", &logging), "alice");
    }
}
