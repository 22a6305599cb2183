// ============================================================================
// Inbox Service
// ============================================================================
//
// Every operation runs the same pipeline:
//
//   parse + validate body -> capability check -> AuthGate -> MessageStore
//
// Nothing reaches the store unless the gate accepted the identity the
// operation acts for: the sender for send, the receiver for everything else.
// The signed payload is always the exact body bytes as received.
//
// ============================================================================

use std::sync::Arc;

use crate::auth::{AuthContext, AuthGate};
use crate::config::LoggingConfig;
use crate::error::{AppError, AppResult};
use crate::message::{
    AckResponse, CountResponse, CountUnreadRequest, DeleteRequest, Message, ReadRequest,
    ReadResponse, SendResponse, SetReadRequest, parse_body,
};
use crate::metrics;
use crate::store::{MessageStore, StoreCapabilities, StoreError};
use crate::utils::loggable_id;

#[derive(Clone)]
pub struct InboxService {
    gate: AuthGate,
    store: Arc<dyn MessageStore>,
    logging: LoggingConfig,
    /// Expose per-receiver outcomes in send responses
    delivery_details: bool,
}

impl InboxService {
    pub fn new(
        gate: AuthGate,
        store: Arc<dyn MessageStore>,
        logging: LoggingConfig,
        delivery_details: bool,
    ) -> Self {
        Self {
            gate,
            store,
            logging,
            delivery_details,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.store.capabilities()
    }

    pub async fn ping(&self) -> AppResult<()> {
        Ok(self.store.ping().await?)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn send(&self, body: &[u8], signature: Option<&str>) -> AppResult<SendResponse> {
        let result = self.do_send(body, signature).await;
        observe("send", &result);
        result
    }

    pub async fn read(&self, body: &[u8], signature: Option<&str>) -> AppResult<ReadResponse> {
        let result = self.do_read(body, signature).await;
        observe("read", &result);
        result
    }

    pub async fn set_read(&self, body: &[u8], signature: Option<&str>) -> AppResult<AckResponse> {
        let result = self.do_set_read(body, signature).await;
        observe("set_read", &result);
        result
    }

    pub async fn count_unread(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CountResponse> {
        let result = self.do_count_unread(body, signature).await;
        observe("count_unread", &result);
        result
    }

    pub async fn delete(&self, body: &[u8], signature: Option<&str>) -> AppResult<AckResponse> {
        let result = self.do_delete(body, signature).await;
        observe("delete", &result);
        result
    }

    async fn do_send(&self, body: &[u8], signature: Option<&str>) -> AppResult<SendResponse> {
        let message = parse_body::<Message>(body)?.validate()?;
        self.authorize(&message.sender, body, signature).await?;

        let report = self.store.send(&message).await;
        let delivered = report.delivered_count();
        let failed = report.outcomes.len() - delivered;
        metrics::MESSAGES_DELIVERED_TOTAL.inc_by(delivered as u64);
        metrics::DELIVERY_FAILURES_TOTAL.inc_by(failed as u64);

        tracing::info!(
            sender = %loggable_id(&message.sender, &self.logging),
            receivers = report.outcomes.len(),
            delivered,
            failed,
            "Message sent"
        );

        let (delivered_to, failed_for) = if self.delivery_details {
            (Some(report.delivered()), Some(report.failed()))
        } else {
            (None, None)
        };

        Ok(SendResponse {
            success: true,
            count: delivered,
            delivered: delivered_to,
            failed: failed_for,
        })
    }

    async fn do_read(&self, body: &[u8], signature: Option<&str>) -> AppResult<ReadResponse> {
        let request = parse_body::<ReadRequest>(body)?.validate()?;
        self.authorize(&request.receiver, body, signature).await?;

        let messages = self.store.read(&request.receiver, request.only_unread).await?;
        metrics::MESSAGES_READ_TOTAL.inc_by(messages.len() as u64);

        tracing::info!(
            receiver = %loggable_id(&request.receiver, &self.logging),
            count = messages.len(),
            destructive = self.store.capabilities().destructive_read,
            "Inbox read"
        );

        Ok(ReadResponse {
            success: true,
            request_id: request.request_id,
            messages,
        })
    }

    async fn do_set_read(&self, body: &[u8], signature: Option<&str>) -> AppResult<AckResponse> {
        let request = parse_body::<SetReadRequest>(body)?.validate()?;
        self.require_addressable("set-read")?;
        self.authorize(&request.receiver, body, signature).await?;

        self.store
            .set_read(&request.receiver, request.message_id, request.read)
            .await?;

        tracing::debug!(
            receiver = %loggable_id(&request.receiver, &self.logging),
            message_id = request.message_id,
            "Message marked as read"
        );
        Ok(AckResponse::ok())
    }

    async fn do_count_unread(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CountResponse> {
        let request = parse_body::<CountUnreadRequest>(body)?.validate()?;
        self.authorize(&request.receiver, body, signature).await?;

        let count = self.store.count_unread(&request.receiver).await?;
        Ok(CountResponse {
            success: true,
            count,
        })
    }

    async fn do_delete(&self, body: &[u8], signature: Option<&str>) -> AppResult<AckResponse> {
        let request = parse_body::<DeleteRequest>(body)?.validate()?;
        self.require_addressable("delete")?;
        self.authorize(&request.receiver, body, signature).await?;

        self.store
            .delete(&request.receiver, request.message_id)
            .await?;

        tracing::info!(
            receiver = %loggable_id(&request.receiver, &self.logging),
            message_id = request.message_id,
            "Message deleted"
        );
        Ok(AckResponse::ok())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn authorize(
        &self,
        identity: &str,
        body: &[u8],
        signature: Option<&str>,
    ) -> AppResult<()> {
        self.gate
            .authorize(AuthContext::new(identity, body, signature))
            .await
            .map_err(|e| {
                tracing::warn!(
                    identity = %loggable_id(identity, &self.logging),
                    reason = e.error_code(),
                    "Request denied"
                );
                AppError::from(e)
            })
    }

    fn require_addressable(&self, operation: &'static str) -> AppResult<()> {
        if self.store.capabilities().addressable {
            return Ok(());
        }
        Err(StoreError::Unsupported {
            backend: self.store.backend(),
            operation,
        }
        .into())
    }
}

fn observe<T>(operation: &str, result: &AppResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.error_code(),
    };
    metrics::OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}
