#![allow(dead_code)]

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey};
use inbox_server::{build_inbox, config::Config, context::AppContext, routes::create_router};
use rand::rngs::OsRng;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const SIGNATURE_HEADER: &str = "zenflows-sign";

/// A person known to the key directory
pub struct Identity {
    pub id: String,
    pub signing_key: SigningKey,
}

impl Identity {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn sign(&self, body: &[u8]) -> String {
        BASE64.encode(self.signing_key.sign(body).to_bytes())
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub alice: Identity,
    pub bob: Identity,
    pub carol: Identity,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// POSTs `body` exactly as given, signed by `signer`
    pub async fn post_signed(
        &self,
        path: &str,
        body: &Value,
        signer: Option<&Identity>,
    ) -> reqwest::Response {
        let bytes = serde_json::to_vec(body).unwrap();
        let mut request = self
            .client
            .post(self.url(path))
            .header("content-type", "application/json");
        if let Some(signer) = signer {
            request = request.header(SIGNATURE_HEADER, signer.sign(&bytes));
        }
        request.body(bytes).send().await.unwrap()
    }
}

/// Spawns the real router on an ephemeral port over an in-memory store
///
/// `backend` is a STORE_BACKEND value: "memory-set" or "memory-table".
pub async fn spawn_app(backend: &str) -> TestApp {
    spawn_app_with(backend, &[]).await
}

pub async fn spawn_app_with(backend: &str, extra: &[(&str, &str)]) -> TestApp {
    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let carol = Identity::new("carol");

    let static_keys = format!(
        "alice={},bob={},carol={}",
        alice.public_key(),
        bob.public_key(),
        carol.public_key()
    );
    let mut vars: Vec<(String, String)> = vec![
        ("STORE_BACKEND".to_string(), backend.to_string()),
        ("STATIC_PUBLIC_KEYS".to_string(), static_keys),
        ("LOG_HASH_SALT".to_string(), "test-salt".to_string()),
    ];
    vars.extend(
        extra
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string())),
    );

    let config = Config::from_lookup(|name| {
        vars.iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    })
    .expect("Failed to build test config");

    let inbox = build_inbox(&config)
        .await
        .expect("Failed to build inbox service");
    let app_context = Arc::new(AppContext::new(inbox, Arc::new(config)));
    let app = create_router(app_context);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
        alice,
        bob,
        carol,
    }
}
