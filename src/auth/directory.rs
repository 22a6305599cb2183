// ============================================================================
// Public Key Directory
// ============================================================================
//
// Resolves an identity to the public key it signs requests with.
//
// - HttpKeyDirectory: queries the person directory over GraphQL and caches
//   resolved keys for a configurable TTL
// - StaticKeyDirectory: fixed identity -> key map
//
// Unknown identities are never cached, so a freshly registered person can
// authenticate immediately.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Returns `Ok(None)` when the directory has no key for `identity`
    async fn resolve_public_key(&self, identity: &str) -> Result<Option<String>>;
}

const PERSON_KEY_QUERY: &str = "query($id: ID!) { person(id: $id) { eddsaPublicKey } }";

/// GraphQL-backed directory with an in-process key cache
pub struct HttpKeyDirectory {
    url: String,
    http_client: reqwest::Client,
    cache: RwLock<HashMap<String, CachedPublicKey>>,
    cache_ttl: Duration,
}

#[derive(Clone)]
struct CachedPublicKey {
    public_key: String,
    fetched_at: Instant,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<PersonData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct PersonData {
    person: Option<Person>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    eddsa_public_key: Option<String>,
}

#[derive(Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

/// Only a clean answer without a person (or without a key) means "unknown";
/// an error answer without a person is a directory failure
fn public_key_from(body: GraphQlResponse) -> Result<Option<String>> {
    let person = body.data.and_then(|data| data.person);
    if person.is_none() && !body.errors.is_empty() {
        let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
        anyhow::bail!("Key directory answered with errors: {}", messages.join("; "));
    }

    Ok(person
        .and_then(|person| person.eddsa_public_key)
        .filter(|key| !key.is_empty()))
}

impl HttpKeyDirectory {
    pub fn new(url: impl Into<String>, timeout: Duration, cache_ttl: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for key directory")?;

        Ok(Self {
            url: url.into(),
            http_client,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        })
    }

    fn cached(&self, identity: &str) -> Option<String> {
        match self.cache.read() {
            Ok(cache) => cache
                .get(identity)
                .filter(|cached| cached.fetched_at.elapsed() < self.cache_ttl)
                .map(|cached| cached.public_key.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire read lock on public key cache");
                None
            }
        }
    }

    fn remember(&self, identity: &str, public_key: &str) {
        match self.cache.write() {
            Ok(mut cache) => {
                cache.insert(
                    identity.to_string(),
                    CachedPublicKey {
                        public_key: public_key.to_string(),
                        fetched_at: Instant::now(),
                    },
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to update public key cache (non-critical)");
            }
        }
    }

    async fn fetch_public_key(&self, identity: &str) -> Result<Option<String>> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&json!({
                "query": PERSON_KEY_QUERY,
                "variables": { "id": identity },
            }))
            .send()
            .await
            .context("Key directory request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Key directory returned HTTP {}", response.status());
        }

        let body: GraphQlResponse = response
            .json()
            .await
            .context("Key directory returned malformed JSON")?;

        public_key_from(body)
    }

    /// Drops every cached key (key rotation)
    pub fn clear(&self) {
        match self.cache.write() {
            Ok(mut cache) => cache.clear(),
            Err(e) => tracing::error!(error = %e, "Failed to clear public key cache"),
        }
    }
}

#[async_trait]
impl KeyDirectory for HttpKeyDirectory {
    async fn resolve_public_key(&self, identity: &str) -> Result<Option<String>> {
        if let Some(public_key) = self.cached(identity) {
            return Ok(Some(public_key));
        }

        let public_key = self.fetch_public_key(identity).await?;
        if let Some(key) = &public_key {
            self.remember(identity, key);
        }
        Ok(public_key)
    }
}

/// Directory backed by a fixed map
#[derive(Debug, Default, Clone)]
pub struct StaticKeyDirectory {
    keys: HashMap<String, String>,
}

impl StaticKeyDirectory {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    pub fn with_key(mut self, identity: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.keys.insert(identity.into(), public_key.into());
        self
    }
}

#[async_trait]
impl KeyDirectory for StaticKeyDirectory {
    async fn resolve_public_key(&self, identity: &str) -> Result<Option<String>> {
        Ok(self.keys.get(identity).cloned())
    }
}
