// ============================================================================
// Signature Verification
// ============================================================================
//
// The verifier answers one question: does `signature` over `payload` verify
// against `public_key`? It returns:
// - Ok(true)  signature is valid
// - Ok(false) signature is malformed or does not verify
// - Err(_)    the verifier itself failed (bad key material, evaluator down)
//
// Two implementations:
// - Ed25519Verifier: in-process, base64 Ed25519 keys and signatures
// - RemoteVerifier:  out-of-process evaluator reached over HTTP
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, payload: &[u8], signature: &str, public_key: &str) -> Result<bool>;
}

/// In-process Ed25519 verification
///
/// Runs on the blocking pool so a flood of verifications cannot stall the
/// request executor.
#[derive(Debug, Default, Clone)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(&self, payload: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let payload = payload.to_vec();
        let signature = signature.to_string();
        let public_key = public_key.to_string();

        tokio::task::spawn_blocking(move || verify_ed25519(&payload, &signature, &public_key))
            .await
            .context("Signature verification task failed")?
    }
}

fn verify_ed25519(payload: &[u8], signature_b64: &str, public_key_b64: &str) -> Result<bool> {
    let verifying_key = decode_public_key(public_key_b64)?;

    // A signature the client cannot even encode properly is simply invalid
    let signature_bytes = match BASE64.decode(signature_b64.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(false),
    };
    let signature_array: [u8; 64] = match signature_bytes.try_into() {
        Ok(array) => array,
        Err(_) => return Ok(false),
    };
    let signature = Signature::from_bytes(&signature_array);

    Ok(verifying_key.verify(payload, &signature).is_ok())
}

fn decode_public_key(public_key_b64: &str) -> Result<VerifyingKey> {
    let public_key_bytes = BASE64
        .decode(public_key_b64.trim())
        .context("Public key is not valid base64")?;

    let public_key_array: [u8; 32] = public_key_bytes.try_into().map_err(|bytes: Vec<u8>| {
        anyhow::anyhow!("Public key must be 32 bytes, got {}", bytes.len())
    })?;

    VerifyingKey::from_bytes(&public_key_array).context("Invalid Ed25519 public key")
}

// ============================================================================
// Remote evaluator
// ============================================================================

#[derive(Serialize)]
struct VerifyRequest<'a> {
    /// Base64 of the exact signed bytes
    payload: String,
    signature: &'a str,
    public_key: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Delegates verification to an external sandboxed evaluator
///
/// Contract: `POST {url}` with `{"payload", "signature", "public_key"}`,
/// answered by `{"valid": bool}`. Anything else is a verifier fault.
pub struct RemoteVerifier {
    url: String,
    http_client: reqwest::Client,
}

impl RemoteVerifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client for signature verifier")?;

        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl SignatureVerifier for RemoteVerifier {
    async fn verify(&self, payload: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let request = VerifyRequest {
            payload: BASE64.encode(payload),
            signature,
            public_key,
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Verifier request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Verifier returned HTTP {}", response.status());
        }

        let body: VerifyResponse = response
            .json()
            .await
            .context("Verifier returned a malformed response")?;

        Ok(body.valid)
    }
}
