pub mod error;
pub mod events;
pub mod models;
pub mod packages;
pub mod signature;
pub mod transfer;

pub use error::{ADMIN_ADJUSTMENT_LIMIT, CreditError, validate_adjustment};
pub use events::{FulfillmentDecision, PaymentCompletedEvent, PaymentEventStatus, decide_fulfillment};
pub use models::{
    ContributorPayout, CreditReason, LedgerEntry, PaymentIntent, PaymentIntentStatus,
    PayoutAccount, PayoutStatus, RevenueDistribution,
};
pub use packages::{CREDIT_PACKAGES, CreditPackage, find_package};
pub use signature::SignatureError;
pub use transfer::{TransferProvider, TransferReceipt, TransferRequest};
