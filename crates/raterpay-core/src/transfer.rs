use async_trait::async_trait;
use uuid::Uuid;

/// One outbound transfer for a claimed batch of payouts. The idempotency key
/// is derived from the batch so a retried call cannot move money twice.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination_account: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
    pub payout_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transfer_id: String,
}

#[async_trait]
pub trait TransferProvider: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> anyhow::Result<TransferReceipt>;
}
