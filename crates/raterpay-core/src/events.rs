use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::packages::find_package;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentEventStatus {
    Paid,
    #[serde(other)]
    Other,
}

/// Inbound payment-completed event from the external processor. Delivered
/// at least once; the payload shape is closed so unrecognized fields fail
/// deserialization at the boundary instead of leaking into fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentCompletedEvent {
    pub external_reference: String,
    pub payment_status: PaymentEventStatus,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub package_id: Option<String>,
    #[serde(default)]
    pub credit_amount: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentDecision {
    /// Permanent validation failure; the processor must not redeliver.
    Reject { reason: String },
    /// Nothing to do (non-paid status); reported as success.
    Ignore,
    /// Apply the credit grant atomically against the payment intent.
    Credit {
        user_id: Uuid,
        package_id: String,
        credit_amount: i64,
        amount_cents: i64,
    },
}

/// Classify an event before touching storage. Whether the intent is already
/// completed is decided later, under the row lock.
pub fn decide_fulfillment(event: &PaymentCompletedEvent) -> FulfillmentDecision {
    if event.payment_status != PaymentEventStatus::Paid {
        return FulfillmentDecision::Ignore;
    }

    if event.external_reference.trim().is_empty() {
        return reject("external_reference is required");
    }

    let Some(user_id) = event.user_id else {
        return reject("user_id is required");
    };

    let package_id = match event.package_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id,
        _ => return reject("package_id is required"),
    };

    let Some(credit_amount) = event.credit_amount else {
        return reject("credit_amount is required");
    };
    if credit_amount <= 0 {
        return reject("credit_amount must be positive");
    }

    let Some(package) = find_package(package_id) else {
        return reject(&format!("unrecognized package: {package_id}"));
    };
    if credit_amount != package.credits {
        return reject(&format!(
            "credit_amount {credit_amount} does not match package {package_id}"
        ));
    }

    FulfillmentDecision::Credit {
        user_id,
        package_id: package_id.to_string(),
        credit_amount,
        amount_cents: package.price_cents,
    }
}

fn reject(reason: &str) -> FulfillmentDecision {
    FulfillmentDecision::Reject {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paid_event() -> PaymentCompletedEvent {
        PaymentCompletedEvent {
            external_reference: "cs_test_123".to_string(),
            payment_status: PaymentEventStatus::Paid,
            user_id: Some(Uuid::new_v4()),
            package_id: Some("value".to_string()),
            credit_amount: Some(5),
        }
    }

    #[test]
    fn paid_event_with_known_package_credits() {
        let event = paid_event();
        match decide_fulfillment(&event) {
            FulfillmentDecision::Credit {
                user_id,
                package_id,
                credit_amount,
                amount_cents,
            } => {
                assert_eq!(Some(user_id), event.user_id);
                assert_eq!(package_id, "value");
                assert_eq!(credit_amount, 5);
                assert_eq!(amount_cents, 4500);
            }
            other => panic!("expected credit decision, got {other:?}"),
        }
    }

    #[test]
    fn unpaid_status_is_ignored() {
        let mut event = paid_event();
        event.payment_status = PaymentEventStatus::Other;
        assert_eq!(decide_fulfillment(&event), FulfillmentDecision::Ignore);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut event = paid_event();
        event.user_id = None;
        assert!(matches!(
            decide_fulfillment(&event),
            FulfillmentDecision::Reject { .. }
        ));

        let mut event = paid_event();
        event.package_id = Some("  ".to_string());
        assert!(matches!(
            decide_fulfillment(&event),
            FulfillmentDecision::Reject { .. }
        ));

        let mut event = paid_event();
        event.credit_amount = None;
        assert!(matches!(
            decide_fulfillment(&event),
            FulfillmentDecision::Reject { .. }
        ));
    }

    #[test]
    fn unknown_package_is_rejected() {
        let mut event = paid_event();
        event.package_id = Some("mega".to_string());
        assert!(matches!(
            decide_fulfillment(&event),
            FulfillmentDecision::Reject { .. }
        ));
    }

    #[test]
    fn credit_amount_must_match_package() {
        let mut event = paid_event();
        event.credit_amount = Some(7);
        assert!(matches!(
            decide_fulfillment(&event),
            FulfillmentDecision::Reject { .. }
        ));
    }

    #[test]
    fn unknown_payment_status_deserializes_as_other() {
        let event: PaymentCompletedEvent = serde_json::from_str(
            r#"{"external_reference":"cs_1","payment_status":"refunded","user_id":null,"package_id":null,"credit_amount":null}"#,
        )
        .expect("closed union still accepts unknown status strings");
        assert_eq!(event.payment_status, PaymentEventStatus::Other);
    }

    #[test]
    fn unrecognized_fields_fail_at_the_boundary() {
        let parsed: Result<PaymentCompletedEvent, _> = serde_json::from_str(
            r#"{"external_reference":"cs_1","payment_status":"paid","amount_total":999}"#,
        );
        assert!(parsed.is_err());
    }
}
