use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditReason {
    Purchase,
    AdminAdjustment,
    ReferralBonus,
    Spend,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::Purchase => "PURCHASE",
            CreditReason::AdminAdjustment => "ADMIN_ADJUSTMENT",
            CreditReason::ReferralBonus => "REFERRAL_BONUS",
            CreditReason::Spend => "SPEND",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PURCHASE" => Ok(CreditReason::Purchase),
            "ADMIN_ADJUSTMENT" => Ok(CreditReason::AdminAdjustment),
            "REFERRAL_BONUS" => Ok(CreditReason::ReferralBonus),
            "SPEND" => Ok(CreditReason::Spend),
            other => anyhow::bail!("unsupported credit reason: {other}"),
        }
    }
}

/// Immutable signed credit movement. Balances are always the sum of a user's
/// entries; the cached account row is refreshed in the same transaction as
/// every append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub delta: i64,
    pub reason: CreditReason,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentIntentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::Pending => "PENDING",
            PaymentIntentStatus::Completed => "COMPLETED",
            PaymentIntentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PaymentIntentStatus::Pending),
            "COMPLETED" => Ok(PaymentIntentStatus::Completed),
            "FAILED" => Ok(PaymentIntentStatus::Failed),
            other => anyhow::bail!("unsupported payment intent status: {other}"),
        }
    }
}

/// Purchase record keyed by the processor's session id. The
/// `external_reference` uniqueness constraint plus the status-guarded
/// transition to `Completed` is what makes fulfillment idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub external_reference: String,
    pub package_id: String,
    pub credit_amount: i64,
    pub amount_cents: i64,
    pub status: PaymentIntentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One-time split of a report purchase, created exactly once per
/// (purchase, property) pair. Shares always sum to `total_revenue_cents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueDistribution {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub property_id: Uuid,
    pub total_revenue_cents: i64,
    pub platform_share_cents: i64,
    pub top_contributor_share_cents: i64,
    pub other_contributors_share_cents: i64,
    pub top_contributor_id: Option<Uuid>,
    pub top_contributor_rating_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Processing => "PROCESSING",
            PayoutStatus::Paid => "PAID",
            PayoutStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PayoutStatus::Pending),
            "PROCESSING" => Ok(PayoutStatus::Processing),
            "PAID" => Ok(PayoutStatus::Paid),
            "FAILED" => Ok(PayoutStatus::Failed),
            other => anyhow::bail!("unsupported payout status: {other}"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Paid | PayoutStatus::Failed)
    }
}

/// A contributor's share of one distribution, driven through
/// pending -> processing -> paid|failed by the payout processor.
/// `claimed_at` backs the reclaim pass for crashed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributorPayout {
    pub id: Uuid,
    pub revenue_distribution_id: Uuid,
    pub user_id: Uuid,
    pub payout_amount_cents: i64,
    pub rating_count: i64,
    pub is_top_contributor: bool,
    pub status: PayoutStatus,
    pub transfer_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Eligibility gate owned by the account-linking flow; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub user_id: Uuid,
    pub external_account_id: String,
    pub status: String,
    pub details_submitted: bool,
    pub transfers_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_reason_roundtrips_through_storage_form() {
        for reason in [
            CreditReason::Purchase,
            CreditReason::AdminAdjustment,
            CreditReason::ReferralBonus,
            CreditReason::Spend,
        ] {
            assert_eq!(CreditReason::parse(reason.as_str()).unwrap(), reason);
        }
        assert!(CreditReason::parse("GIFT").is_err());
    }

    #[test]
    fn payout_status_terminality() {
        assert!(!PayoutStatus::Pending.is_terminal());
        assert!(!PayoutStatus::Processing.is_terminal());
        assert!(PayoutStatus::Paid.is_terminal());
        assert!(PayoutStatus::Failed.is_terminal());
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!(
            PayoutStatus::parse(" pending ").unwrap(),
            PayoutStatus::Pending
        );
        assert_eq!(
            PaymentIntentStatus::parse("completed").unwrap(),
            PaymentIntentStatus::Completed
        );
    }
}
