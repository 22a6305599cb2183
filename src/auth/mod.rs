// ============================================================================
// Request Authorization
// ============================================================================
//
// Every inbox operation is signed by the identity it acts for (the sender
// for send, the receiver for everything else). The gate:
//
// 1. rejects requests without a signature (no network round-trip)
// 2. resolves the identity's public key from the directory
// 3. verifies the signature over the exact request body bytes
//
// Step 2 always completes before step 3 starts. Every step is bounded by a
// timeout and any failure denies the request.
//
// ============================================================================

pub mod directory;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use directory::{HttpKeyDirectory, KeyDirectory, StaticKeyDirectory};
pub use verifier::{Ed25519Verifier, RemoteVerifier, SignatureVerifier};

use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Request signature is missing")]
    MissingSignature,

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Key directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Signature verifier unavailable: {0}")]
    VerifierFault(String),
}

impl AuthError {
    /// Infrastructure failures, as opposed to a bad request
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            AuthError::DirectoryUnavailable(_) | AuthError::VerifierFault(_)
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingSignature => "MISSING_SIGNATURE",
            AuthError::IdentityNotFound(_) => "IDENTITY_NOT_FOUND",
            AuthError::SignatureInvalid => "SIGNATURE_INVALID",
            AuthError::DirectoryUnavailable(_) => "DIRECTORY_UNAVAILABLE",
            AuthError::VerifierFault(_) => "VERIFIER_FAULT",
        }
    }
}

/// What is being authorized: who claims to act, over which bytes, with
/// which detached signature
#[derive(Debug, Clone, Copy)]
pub struct AuthContext<'a> {
    pub identity: &'a str,
    pub payload: &'a [u8],
    pub signature: Option<&'a str>,
}

impl<'a> AuthContext<'a> {
    pub fn new(identity: &'a str, payload: &'a [u8], signature: Option<&'a str>) -> Self {
        Self {
            identity,
            payload,
            signature,
        }
    }
}

#[derive(Clone)]
pub struct AuthGate {
    directory: Arc<dyn KeyDirectory>,
    verifier: Arc<dyn SignatureVerifier>,
    timeout: Duration,
}

impl AuthGate {
    pub fn new(
        directory: Arc<dyn KeyDirectory>,
        verifier: Arc<dyn SignatureVerifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            directory,
            verifier,
            timeout,
        }
    }

    pub async fn authorize(&self, ctx: AuthContext<'_>) -> Result<(), AuthError> {
        let result = self.check(ctx).await;
        if let Err(e) = &result {
            metrics::AUTH_FAILURES_TOTAL
                .with_label_values(&[e.error_code()])
                .inc();
        }
        result
    }

    async fn check(&self, ctx: AuthContext<'_>) -> Result<(), AuthError> {
        let signature = match ctx.signature.map(str::trim) {
            Some(sig) if !sig.is_empty() => sig,
            _ => return Err(AuthError::MissingSignature),
        };

        let public_key =
            match tokio::time::timeout(self.timeout, self.directory.resolve_public_key(ctx.identity))
                .await
            {
                Ok(Ok(Some(key))) => key,
                Ok(Ok(None)) => return Err(AuthError::IdentityNotFound(ctx.identity.to_string())),
                Ok(Err(e)) => return Err(AuthError::DirectoryUnavailable(format!("{:#}", e))),
                Err(_) => {
                    return Err(AuthError::DirectoryUnavailable(format!(
                        "no answer within {}ms",
                        self.timeout.as_millis()
                    )));
                }
            };

        match tokio::time::timeout(
            self.timeout,
            self.verifier.verify(ctx.payload, signature, &public_key),
        )
        .await
        {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(AuthError::SignatureInvalid),
            Ok(Err(e)) => Err(AuthError::VerifierFault(format!("{:#}", e))),
            Err(_) => Err(AuthError::VerifierFault(format!(
                "no answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingVerifier {
        calls: AtomicUsize,
        answer: Option<bool>,
    }

    #[async_trait]
    impl SignatureVerifier for CountingVerifier {
        async fn verify(&self, _: &[u8], _: &str, _: &str) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .ok_or_else(|| anyhow::anyhow!("evaluator crashed"))
        }
    }

    struct SlowDirectory;

    #[async_trait]
    impl KeyDirectory for SlowDirectory {
        async fn resolve_public_key(&self, _: &str) -> anyhow::Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some("KEY".to_string()))
        }
    }

    fn counting(answer: Option<bool>) -> Arc<CountingVerifier> {
        Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
            answer,
        })
    }

    fn gate_with(verifier: Arc<CountingVerifier>) -> AuthGate {
        let directory = StaticKeyDirectory::default().with_key("alice", "KEY");
        AuthGate::new(Arc::new(directory), verifier, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_authorize_with_real_signature() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let directory = StaticKeyDirectory::default()
            .with_key("alice", BASE64.encode(signing_key.verifying_key().as_bytes()));
        let gate = AuthGate::new(
            Arc::new(directory),
            Arc::new(Ed25519Verifier::new()),
            Duration::from_secs(1),
        );

        let payload = br#"{"receiver":"alice"}"#;
        let signature = BASE64.encode(signing_key.sign(payload).to_bytes());

        assert_eq!(
            gate.authorize(AuthContext::new("alice", payload, Some(&signature)))
                .await,
            Ok(())
        );
        assert_eq!(
            gate.authorize(AuthContext::new("alice", b"other", Some(&signature)))
                .await,
            Err(AuthError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_missing_signature_short_circuits() {
        let verifier = counting(Some(true));
        let gate = gate_with(verifier.clone());

        for signature in [None, Some(""), Some("   ")] {
            let result = gate
                .authorize(AuthContext::new("alice", b"{}", signature))
                .await;
            assert_eq!(result, Err(AuthError::MissingSignature));
        }
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_identity_skips_verification() {
        let verifier = counting(Some(true));
        let gate = gate_with(verifier.clone());

        let result = gate
            .authorize(AuthContext::new("mallory", b"{}", Some("sig")))
            .await;
        assert_eq!(
            result,
            Err(AuthError::IdentityNotFound("mallory".to_string()))
        );
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_verifier_answers() {
        let gate = gate_with(counting(Some(false)));
        assert_eq!(
            gate.authorize(AuthContext::new("alice", b"{}", Some("sig")))
                .await,
            Err(AuthError::SignatureInvalid)
        );

        let gate = gate_with(counting(None));
        let result = gate
            .authorize(AuthContext::new("alice", b"{}", Some("sig")))
            .await;
        assert!(matches!(result, Err(AuthError::VerifierFault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_timeout_fails_closed() {
        let verifier = counting(Some(true));
        let gate = AuthGate::new(
            Arc::new(SlowDirectory),
            verifier.clone(),
            Duration::from_millis(100),
        );

        let result = gate
            .authorize(AuthContext::new("alice", b"{}", Some("sig")))
            .await;
        assert!(matches!(result, Err(AuthError::DirectoryUnavailable(_))));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }
}
