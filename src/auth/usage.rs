//! Best-effort usage logging. Events go onto a bounded queue drained by a
//! single writer task; a full queue drops the event and a failed write is
//! traced and forgotten. Nothing on this path can fail a request.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::store::{Store, UsageLogRecord};

#[derive(Clone)]
pub struct UsageLogger {
    tx: mpsc::Sender<UsageLogRecord>,
}

impl UsageLogger {
    /// Start the writer task and return the sending handle.
    pub fn spawn(store: Arc<dyn Store>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<UsageLogRecord>(capacity);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Some(key_id) = event.api_key_id {
                    if let Err(e) = store.touch_api_key_usage(key_id).await {
                        tracing::debug!(key_id = %key_id, "failed to touch last_used_at: {}", e);
                    }
                }
                if let Err(e) = store.insert_usage_log(&event).await {
                    tracing::warn!(endpoint = %event.endpoint, "failed to write usage log: {}", e);
                }
            }
        });

        Self { tx }
    }

    /// Non-blocking enqueue; drops the event when the queue is full.
    pub fn record(&self, event: UsageLogRecord) {
        if self.tx.try_send(event).is_err() {
            tracing::debug!("usage log queue full, dropping event");
        }
    }

    /// Key-scoped usage event emitted by the verification pipeline.
    pub fn record_key_usage(&self, api_key_id: Uuid, endpoint: &str) {
        self.record(UsageLogRecord {
            id: Uuid::new_v4(),
            request_id: None,
            api_key_id: Some(api_key_id),
            endpoint: endpoint.to_string(),
            method: None,
            status_code: None,
            duration_ms: None,
            error_message: None,
            created_at: Utc::now(),
        });
    }

    /// Request-scoped event emitted by the logging middleware.
    #[allow(clippy::too_many_arguments)]
    pub fn record_request(
        &self,
        request_id: Uuid,
        endpoint: &str,
        method: &str,
        status_code: i16,
        duration_ms: i32,
        error_message: Option<String>,
    ) {
        self.record(UsageLogRecord {
            id: Uuid::new_v4(),
            request_id: Some(request_id),
            api_key_id: None,
            endpoint: endpoint.to_string(),
            method: Some(method.to_string()),
            status_code: Some(status_code),
            duration_ms: Some(duration_ms),
            error_message,
            created_at: Utc::now(),
        });
    }
}
