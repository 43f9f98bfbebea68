use anyhow::{Context, Result};
use async_trait::async_trait;
use raterpay_core::{TransferProvider, TransferReceipt, TransferRequest};
use serde::Deserialize;

/// Transfer client for the external money-movement provider. One
/// form-encoded POST per claimed batch; the provider deduplicates on the
/// `Idempotency-Key` header so retries after an ambiguous failure are safe.
pub struct HttpTransferClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl HttpTransferClient {
    pub fn new(api_base: &str, api_key: &str, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build transfer http client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
}

#[async_trait]
impl TransferProvider for HttpTransferClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        let payout_ids = request
            .payout_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let amount = request.amount_cents.to_string();
        let params = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("destination", request.destination_account.as_str()),
            ("description", request.description.as_str()),
            ("metadata[payout_ids]", payout_ids.as_str()),
        ];

        let response = self
            .http
            .post(format!("{}/v1/transfers", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&params)
            .send()
            .await
            .context("transfer request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("transfer rejected with {status}: {body}");
        }

        let payload: TransferResponse = response
            .json()
            .await
            .context("transfer response was not valid JSON")?;

        Ok(TransferReceipt {
            transfer_id: payload.id,
        })
    }
}
