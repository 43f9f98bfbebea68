pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::{ServiceConfig, SettlementConfig};
pub use contracts::{
    AdjustCreditsRequest, AdjustCreditsResponse, BalanceView, DistributeRequest, DistributionView,
    LedgerListResponse, ListPayoutsQuery, PayoutListResponse, PayoutRunRequest, PayoutRunSummary,
    PayoutsRequestedEvent, RedeemItem, RedeemReportsRequest, RedeemReportsResponse, RedemptionView,
    ReferralBonusRequest, ReferralBonusResponse, WebhookAck,
};
pub use db::connect_database;
pub use redis_bus::{PAYOUTS_REQUESTED_CHANNEL, RedisBus};
