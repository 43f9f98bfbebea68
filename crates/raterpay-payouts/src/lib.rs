//! Payout processing: drives pending contributor payouts through
//! `PENDING -> PROCESSING -> PAID | FAILED`.
//!
//! The conditional claim (`UPDATE ... WHERE status = 'PENDING' RETURNING`)
//! is the only concurrency primitive; whichever run claims a user's rows
//! owns that batch, and a second concurrent run claims zero rows and moves
//! on. A reclaim pass returns rows stranded in `PROCESSING` by a crashed
//! run to `PENDING` before new claims are made.

pub mod provider;

use anyhow::Result;
use chrono::{Duration, Utc};
use raterpay_core::{PayoutAccount, TransferProvider, TransferRequest};
use raterpay_platform::{PayoutRunSummary, SettlementConfig};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

const PAYOUT_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    NoPayoutAccount,
    TransfersDisabled,
    BelowMinimum,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::NoPayoutAccount => "no payout account",
            ReleaseReason::TransfersDisabled => "transfers not enabled",
            ReleaseReason::BelowMinimum => "below minimum payout",
        }
    }
}

/// Eligibility gate for a claimed batch. Releasing is not an error: the
/// rows simply wait for a future run (account finished onboarding, or more
/// earnings accumulated past the minimum).
pub fn decide_batch<'a>(
    account: Option<&'a PayoutAccount>,
    total_cents: i64,
    min_payout_cents: i64,
) -> Result<&'a PayoutAccount, ReleaseReason> {
    let account = account.ok_or(ReleaseReason::NoPayoutAccount)?;
    if !account.transfers_enabled {
        return Err(ReleaseReason::TransfersDisabled);
    }
    if total_cents < min_payout_cents {
        return Err(ReleaseReason::BelowMinimum);
    }
    Ok(account)
}

/// Idempotency token for one claimed batch: the same set of payout rows
/// always produces the same key, so a retried provider call cannot move
/// money twice.
pub fn batch_idempotency_key(payout_ids: &[Uuid]) -> String {
    let mut ids = payout_ids.to_vec();
    ids.sort();

    let mut hasher = blake3::Hasher::new();
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

#[derive(Debug, Clone)]
struct ClaimedPayout {
    id: Uuid,
    amount_cents: i64,
}

/// One payout run. Users are independent: a failure for one user is
/// recorded and the run continues with the next.
pub async fn run_sweep(
    pool: &PgPool,
    provider: &dyn TransferProvider,
    config: &SettlementConfig,
    scope_user: Option<Uuid>,
) -> Result<PayoutRunSummary> {
    let reclaimed = reclaim_stale(pool, config.payout_reclaim_secs).await?;
    if reclaimed > 0 {
        warn!("reclaimed {reclaimed} payouts stuck in processing");
    }

    let user_ids = pending_users(pool, scope_user).await?;
    let mut summary = PayoutRunSummary::default();

    for user_id in user_ids {
        match process_user(pool, provider, config, user_id).await {
            Ok(outcome) => {
                summary.processed += outcome.processed;
                summary.succeeded += outcome.succeeded;
                summary.failed += outcome.failed;
                summary.total_amount_cents += outcome.total_amount_cents;
            }
            Err(err) => {
                // Rows left in PROCESSING are picked up by a later reclaim.
                error!("payout processing failed for user {user_id}: {err:#}");
            }
        }
    }

    Ok(summary)
}

async fn process_user(
    pool: &PgPool,
    provider: &dyn TransferProvider,
    config: &SettlementConfig,
    user_id: Uuid,
) -> Result<PayoutRunSummary> {
    let claimed = claim_pending(pool, user_id).await?;
    if claimed.is_empty() {
        // Another run claimed this user's rows first.
        return Ok(PayoutRunSummary::default());
    }

    let ids: Vec<Uuid> = claimed.iter().map(|payout| payout.id).collect();
    let total: i64 = claimed.iter().map(|payout| payout.amount_cents).sum();
    let account = load_payout_account(pool, user_id).await?;

    let account = match decide_batch(account.as_ref(), total, config.min_payout_cents) {
        Ok(account) => account,
        Err(reason) => {
            release_claim(pool, &ids).await?;
            info!(
                "released {} payouts for user {user_id}: {}",
                ids.len(),
                reason.as_str()
            );
            return Ok(PayoutRunSummary::default());
        }
    };

    let request = TransferRequest {
        destination_account: account.external_account_id.clone(),
        amount_cents: total,
        currency: PAYOUT_CURRENCY.to_string(),
        description: format!("Payout for {} property rating contributions", ids.len()),
        idempotency_key: batch_idempotency_key(&ids),
        payout_ids: ids.clone(),
    };

    let timeout = std::time::Duration::from_secs(config.transfer_timeout_secs);
    let mut summary = PayoutRunSummary {
        processed: ids.len() as i64,
        ..PayoutRunSummary::default()
    };

    match tokio::time::timeout(timeout, provider.transfer(&request)).await {
        Ok(Ok(receipt)) => {
            mark_paid(pool, &ids, &receipt.transfer_id).await?;
            summary.succeeded = ids.len() as i64;
            summary.total_amount_cents = total;
            info!(
                "paid {} payouts ({total} cents) to user {user_id} via transfer {}",
                ids.len(),
                receipt.transfer_id
            );
        }
        Ok(Err(err)) => {
            mark_failed(pool, &ids, &err.to_string()).await?;
            summary.failed = ids.len() as i64;
            warn!("transfer failed for user {user_id}: {err:#}");
        }
        Err(_) => {
            // A timed-out call must not strand the batch in PROCESSING.
            mark_failed(pool, &ids, "transfer timed out").await?;
            summary.failed = ids.len() as i64;
            warn!("transfer timed out for user {user_id}");
        }
    }

    Ok(summary)
}

async fn reclaim_stale(pool: &PgPool, reclaim_secs: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::seconds(reclaim_secs);
    let result = sqlx::query(
        r#"
        UPDATE contributor_payouts
        SET status = 'PENDING', claimed_at = NULL, updated_at = $2
        WHERE status = 'PROCESSING' AND claimed_at < $1
        "#,
    )
    .bind(cutoff)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn pending_users(pool: &PgPool, scope_user: Option<Uuid>) -> Result<Vec<Uuid>> {
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT user_id
        FROM contributor_payouts
        WHERE status = 'PENDING'
          AND ($1::uuid IS NULL OR user_id = $1)
        ORDER BY user_id
        "#,
    )
    .bind(scope_user)
    .fetch_all(pool)
    .await?;

    let mut user_ids = Vec::with_capacity(rows.len());
    for row in rows {
        user_ids.push(row.try_get("user_id")?);
    }
    Ok(user_ids)
}

async fn claim_pending(pool: &PgPool, user_id: Uuid) -> Result<Vec<ClaimedPayout>> {
    let now = Utc::now();
    let rows = sqlx::query(
        r#"
        UPDATE contributor_payouts
        SET status = 'PROCESSING', claimed_at = $2, updated_at = $2
        WHERE user_id = $1 AND status = 'PENDING'
        RETURNING id, payout_amount_cents
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut claimed = Vec::with_capacity(rows.len());
    for row in rows {
        claimed.push(ClaimedPayout {
            id: row.try_get("id")?,
            amount_cents: row.try_get("payout_amount_cents")?,
        });
    }
    Ok(claimed)
}

async fn load_payout_account(pool: &PgPool, user_id: Uuid) -> Result<Option<PayoutAccount>> {
    let row = sqlx::query(
        r#"
        SELECT user_id, external_account_id, status, details_submitted, transfers_enabled, updated_at
        FROM payout_accounts
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(PayoutAccount {
        user_id: row.try_get("user_id")?,
        external_account_id: row.try_get("external_account_id")?,
        status: row.try_get("status")?,
        details_submitted: row.try_get("details_submitted")?,
        transfers_enabled: row.try_get("transfers_enabled")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

async fn release_claim(pool: &PgPool, payout_ids: &[Uuid]) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contributor_payouts
        SET status = 'PENDING', claimed_at = NULL, updated_at = $2
        WHERE id = ANY($1) AND status = 'PROCESSING'
        "#,
    )
    .bind(payout_ids)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

async fn mark_paid(pool: &PgPool, payout_ids: &[Uuid], transfer_reference: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contributor_payouts
        SET status = 'PAID',
            transfer_reference = $2,
            failure_reason = NULL,
            processed_at = $3,
            updated_at = $3,
            claimed_at = NULL
        WHERE id = ANY($1) AND status = 'PROCESSING'
        "#,
    )
    .bind(payout_ids)
    .bind(transfer_reference)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

async fn mark_failed(pool: &PgPool, payout_ids: &[Uuid], reason: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contributor_payouts
        SET status = 'FAILED',
            failure_reason = $2,
            processed_at = $3,
            updated_at = $3,
            claimed_at = NULL
        WHERE id = ANY($1) AND status = 'PROCESSING'
        "#,
    )
    .bind(payout_ids)
    .bind(reason)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(transfers_enabled: bool) -> PayoutAccount {
        PayoutAccount {
            user_id: Uuid::new_v4(),
            external_account_id: "acct_123".to_string(),
            status: "active".to_string(),
            details_submitted: true,
            transfers_enabled,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn batch_requires_an_enabled_account() {
        assert_eq!(
            decide_batch(None, 500, 100).unwrap_err(),
            ReleaseReason::NoPayoutAccount
        );

        let disabled = account(false);
        assert_eq!(
            decide_batch(Some(&disabled), 500, 100).unwrap_err(),
            ReleaseReason::TransfersDisabled
        );
    }

    #[test]
    fn batch_requires_the_minimum_total() {
        let enabled = account(true);
        assert_eq!(
            decide_batch(Some(&enabled), 99, 100).unwrap_err(),
            ReleaseReason::BelowMinimum
        );
        assert!(decide_batch(Some(&enabled), 100, 100).is_ok());
    }

    #[test]
    fn idempotency_key_ignores_claim_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let key_one = batch_idempotency_key(&[a, b, c]);
        let key_two = batch_idempotency_key(&[c, a, b]);
        assert_eq!(key_one, key_two);
        assert_eq!(key_one.len(), 64);
    }

    #[test]
    fn different_batches_get_different_keys() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(batch_idempotency_key(&[a]), batch_idempotency_key(&[b]));
        assert_ne!(
            batch_idempotency_key(&[a]),
            batch_idempotency_key(&[a, b])
        );
    }
}
