use chrono::{DateTime, Utc};
use raterpay_core::{ContributorPayout, LedgerEntry};
use raterpay_revenue::ContributorStanding;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    /// False when the event was a no-op (non-paid status or an already
    /// fulfilled reference).
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustCreditsRequest {
    pub user_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustCreditsResponse {
    pub ok: bool,
    pub user_id: Uuid,
    pub added: i64,
    pub total_credits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralBonusRequest {
    pub referrer_user_id: Uuid,
    pub referred_user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralBonusResponse {
    pub ok: bool,
    pub referrer_awarded: i64,
    pub referred_awarded: i64,
    pub already_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemItem {
    pub property_id: Uuid,
    /// Attributed raters for this property, supplied by the rating-history
    /// service that validated the underlying ratings.
    #[serde(default)]
    pub contributors: Vec<ContributorStanding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReportsRequest {
    pub user_id: Uuid,
    pub items: Vec<RedeemItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionView {
    pub redemption_id: Uuid,
    pub property_id: Uuid,
    pub revenue_cents: i64,
    pub distribution_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedeemReportsResponse {
    pub ok: bool,
    pub credits_spent: i64,
    pub total_credits: i64,
    pub redemptions: Vec<RedemptionView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributeRequest {
    pub purchase_id: Uuid,
    pub property_id: Uuid,
    pub total_revenue_cents: i64,
    #[serde(default)]
    pub contributors: Vec<ContributorStanding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionView {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub property_id: Uuid,
    pub total_revenue_cents: i64,
    pub platform_share_cents: i64,
    pub top_contributor_share_cents: i64,
    pub other_contributors_share_cents: i64,
    pub top_contributor_id: Option<Uuid>,
    pub top_contributor_rating_count: i64,
    pub payouts_created: i64,
    pub already_existed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceView {
    pub user_id: Uuid,
    pub total_credits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerListResponse {
    pub user_id: Uuid,
    pub total_credits: i64,
    pub items: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPayoutsQuery {
    pub user_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutListResponse {
    pub items: Vec<ContributorPayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRunRequest {
    /// Scope the run to a single contributor; a full sweep otherwise.
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutRunSummary {
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub total_amount_cents: i64,
}

/// Bus message asking the worker to sweep specific users promptly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutsRequestedEvent {
    pub user_ids: Vec<Uuid>,
}
