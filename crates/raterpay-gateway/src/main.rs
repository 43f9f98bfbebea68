use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use raterpay_core::{
    ContributorPayout, CreditError, CreditReason, FulfillmentDecision, LedgerEntry,
    PaymentCompletedEvent, PaymentIntent, PaymentIntentStatus, PayoutStatus, RevenueDistribution,
    decide_fulfillment, signature, validate_adjustment,
};
use raterpay_payouts::{provider::HttpTransferClient, run_sweep};
use raterpay_platform::{
    AdjustCreditsRequest, AdjustCreditsResponse, BalanceView, DistributeRequest, DistributionView,
    LedgerListResponse, ListPayoutsQuery, PAYOUTS_REQUESTED_CHANNEL, PayoutListResponse,
    PayoutRunRequest, PayoutRunSummary, PayoutsRequestedEvent, RedeemReportsRequest,
    RedeemReportsResponse, RedemptionView, RedisBus, ReferralBonusRequest, ReferralBonusResponse,
    ServiceConfig, SettlementConfig, WebhookAck, connect_database,
};
use raterpay_revenue::{DistributionBreakdown, SplitError, SplitFractions, split_revenue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "x-webhook-signature";
const MAX_REDEEM_ITEMS: usize = 10;
const CREDITS_PER_REPORT: i64 = 1;

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    redis: RedisBus,
    settlement: SettlementConfig,
    fractions: SplitFractions,
    transfers: Arc<HttpTransferClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerQuery {
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "raterpay_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let settlement = SettlementConfig::from_env()?;
    let fractions = SplitFractions::new(
        settlement.platform_fraction,
        settlement.top_contributor_fraction,
    )
    .map_err(|err| anyhow::anyhow!("invalid split fractions: {err}"))?;

    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let transfers = Arc::new(HttpTransferClient::new(
        &settlement.transfer_api_base,
        &settlement.transfer_api_key,
        std::time::Duration::from_secs(settlement.transfer_timeout_secs),
    )?);

    let state = AppState {
        pool,
        redis,
        settlement,
        fractions,
        transfers,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/webhooks/payment", post(handle_payment_webhook))
        .route("/credits/adjust", post(adjust_credits))
        .route("/credits/referral-bonus", post(grant_referral_bonus))
        .route("/credits/{user_id}", get(get_balance))
        .route("/credits/{user_id}/ledger", get(list_ledger))
        .route("/payments/{external_reference}", get(get_payment_intent))
        .route("/reports/redeem", post(redeem_reports))
        .route("/distributions", post(create_distribution))
        .route("/payouts", get(list_payouts))
        .route("/payouts/run", post(run_payouts))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Payment-completed webhook from the external processor. Delivery is at
/// least once and signature-verified; a reported success here guarantees
/// the credit was applied exactly once for this reference.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, (StatusCode, Json<Value>)> {
    let Some(signature_header) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        warn!("payment webhook rejected: missing signature header");
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "BAD_SIGNATURE",
            "missing signature header",
        ));
    };

    if let Err(err) = signature::verify(
        &state.settlement.webhook_secret,
        signature_header,
        &body,
        state.settlement.webhook_tolerance_secs,
        Utc::now(),
    ) {
        warn!("payment webhook rejected: {err}");
        return Err(api_error(StatusCode::UNAUTHORIZED, "BAD_SIGNATURE", err));
    }

    let event: PaymentCompletedEvent = serde_json::from_slice(&body).map_err(|err| {
        api_error(
            StatusCode::BAD_REQUEST,
            "BAD_EVENT",
            format!("malformed payment event: {err}"),
        )
    })?;

    let (user_id, package_id, credit_amount, amount_cents) = match decide_fulfillment(&event) {
        FulfillmentDecision::Reject { reason } => {
            return Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "BAD_EVENT",
                reason,
            ));
        }
        FulfillmentDecision::Ignore => {
            return Ok(Json(WebhookAck {
                received: true,
                applied: false,
            }));
        }
        FulfillmentDecision::Credit {
            user_id,
            package_id,
            credit_amount,
            amount_cents,
        } => (user_id, package_id, credit_amount, amount_cents),
    };

    // Any storage failure surfaces as 5xx so the processor redelivers; the
    // reference lock below makes the redelivery a no-op once applied.
    let applied = apply_fulfillment(
        &state.pool,
        &event.external_reference,
        user_id,
        &package_id,
        credit_amount,
        amount_cents,
    )
    .await
    .map_err(internal_error)?;

    if applied {
        info!(
            "credited {credit_amount} credits to user {user_id} for {}",
            event.external_reference
        );
    }

    Ok(Json(WebhookAck {
        received: true,
        applied,
    }))
}

async fn apply_fulfillment(
    pool: &PgPool,
    external_reference: &str,
    user_id: Uuid,
    package_id: &str,
    credit_amount: i64,
    amount_cents: i64,
) -> AnyResult<bool> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let existing = sqlx::query(
        "SELECT id, status, user_id, credit_amount FROM payment_intents WHERE external_reference = $1 FOR UPDATE",
    )
    .bind(external_reference)
    .fetch_optional(&mut *tx)
    .await?;

    // When a checkout record exists it is authoritative for who gets how
    // many credits; the event fields only seed a recovered intent.
    let mut credited_user = user_id;
    let mut credited_amount = credit_amount;

    let intent_id: Uuid = match existing {
        Some(row) => {
            let status: String = row.try_get("status")?;
            if status == PaymentIntentStatus::Completed.as_str() {
                // Redelivery of an already fulfilled payment.
                return Ok(false);
            }
            credited_user = row.try_get("user_id")?;
            credited_amount = row.try_get("credit_amount")?;
            row.try_get("id")?
        }
        None => {
            // Checkout initiation normally creates the intent; recover here
            // so a paid event is never dropped. The unique reference makes
            // a concurrent recovery lose cleanly and retry.
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO payment_intents (
                    id, user_id, external_reference, package_id, credit_amount,
                    amount_cents, status, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $7)
                "#,
            )
            .bind(id)
            .bind(user_id)
            .bind(external_reference)
            .bind(package_id)
            .bind(credit_amount)
            .bind(amount_cents)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            id
        }
    };

    let flipped = sqlx::query(
        "UPDATE payment_intents SET status = 'COMPLETED', updated_at = $2 WHERE id = $1 AND status <> 'COMPLETED'",
    )
    .bind(intent_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    if flipped.rows_affected() == 0 {
        return Ok(false);
    }

    insert_ledger_entry(
        &mut tx,
        credited_user,
        credited_amount,
        CreditReason::Purchase,
        Some(external_reference),
        now,
    )
    .await?;
    credit_balance_upsert(&mut tx, credited_user, credited_amount, now).await?;

    tx.commit().await?;
    Ok(true)
}

/// Bounded operational credit grant. Gated by DEV_GRANT_ENABLED; the
/// increment is a single conditional statement so concurrent adjustments
/// for the same user cannot lose updates or drive the balance negative.
async fn adjust_credits(
    State(state): State<AppState>,
    Json(payload): Json<AdjustCreditsRequest>,
) -> Result<Json<AdjustCreditsResponse>, (StatusCode, Json<Value>)> {
    if !state.settlement.dev_grant_enabled {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "admin credit grants are disabled",
        ));
    }

    if let Err(err) = validate_adjustment(payload.amount) {
        return Err(api_error(StatusCode::BAD_REQUEST, err.code(), err));
    }

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let now = Utc::now();

    let total_credits = if payload.amount > 0 {
        credit_balance_upsert(&mut tx, payload.user_id, payload.amount, now)
            .await
            .map_err(internal_error)?
    } else {
        match credit_balance_debit(&mut tx, payload.user_id, -payload.amount, now)
            .await
            .map_err(internal_error)?
        {
            Some(total) => total,
            None => {
                return Err(api_error(
                    StatusCode::PAYMENT_REQUIRED,
                    CreditError::InsufficientCredits.code(),
                    CreditError::InsufficientCredits,
                ));
            }
        }
    };

    insert_ledger_entry(
        &mut tx,
        payload.user_id,
        payload.amount,
        CreditReason::AdminAdjustment,
        None,
        now,
    )
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(AdjustCreditsResponse {
        ok: true,
        user_id: payload.user_id,
        added: payload.amount,
        total_credits,
    }))
}

/// Sign-up referral bonuses for both parties. Granted at most once per
/// referred user; the partial unique index on the ledger reference turns a
/// duplicate grant into a clean no-op.
async fn grant_referral_bonus(
    State(state): State<AppState>,
    Json(payload): Json<ReferralBonusRequest>,
) -> Result<Json<ReferralBonusResponse>, (StatusCode, Json<Value>)> {
    if payload.referrer_user_id == payload.referred_user_id {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "BAD_REFERRAL",
            "self-referral is not allowed",
        ));
    }

    let referrer_bonus = state.settlement.referral_bonus_referrer;
    let referred_bonus = state.settlement.referral_bonus_referred;
    let marker_reference = format!("referral:{}:referrer", payload.referred_user_id);

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let now = Utc::now();

    let inserted = sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, user_id, delta, reason, reference, created_at)
        VALUES ($1, $2, $3, 'REFERRAL_BONUS', $4, $5)
        ON CONFLICT (reference) WHERE reason = 'REFERRAL_BONUS' DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.referrer_user_id)
    .bind(referrer_bonus)
    .bind(&marker_reference)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    if inserted.rows_affected() == 0 {
        return Ok(Json(ReferralBonusResponse {
            ok: true,
            referrer_awarded: 0,
            referred_awarded: 0,
            already_granted: true,
        }));
    }

    insert_ledger_entry(
        &mut tx,
        payload.referred_user_id,
        referred_bonus,
        CreditReason::ReferralBonus,
        Some(&format!("referral:{}:referred", payload.referred_user_id)),
        now,
    )
    .await
    .map_err(internal_error)?;

    credit_balance_upsert(&mut tx, payload.referrer_user_id, referrer_bonus, now)
        .await
        .map_err(internal_error)?;
    credit_balance_upsert(&mut tx, payload.referred_user_id, referred_bonus, now)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    Ok(Json(ReferralBonusResponse {
        ok: true,
        referrer_awarded: referrer_bonus,
        referred_awarded: referred_bonus,
        already_granted: false,
    }))
}

/// Redeem credits for property reports. The debit, the redemption records,
/// the spend entries and the per-property revenue distributions commit as
/// one unit; on any failure the user keeps their credits.
async fn redeem_reports(
    State(state): State<AppState>,
    Json(payload): Json<RedeemReportsRequest>,
) -> Result<Json<RedeemReportsResponse>, (StatusCode, Json<Value>)> {
    if payload.items.is_empty() || payload.items.len() > MAX_REDEEM_ITEMS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "BAD_INPUT",
            format!("between 1 and {MAX_REDEEM_ITEMS} properties per redemption"),
        ));
    }

    let revenue_cents = CREDITS_PER_REPORT * state.settlement.revenue_per_credit_cents;
    let mut breakdowns: Vec<DistributionBreakdown> = Vec::with_capacity(payload.items.len());
    for item in &payload.items {
        let breakdown = split_revenue(revenue_cents, &state.fractions, &item.contributors)
            .map_err(split_error)?;
        breakdowns.push(breakdown);
    }

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let now = Utc::now();
    let credits_needed = CREDITS_PER_REPORT * payload.items.len() as i64;

    let Some(total_credits) =
        credit_balance_debit(&mut tx, payload.user_id, credits_needed, now)
            .await
            .map_err(internal_error)?
    else {
        return Err(api_error(
            StatusCode::PAYMENT_REQUIRED,
            CreditError::InsufficientCredits.code(),
            CreditError::InsufficientCredits,
        ));
    };

    let mut redemptions = Vec::with_capacity(payload.items.len());
    let mut contributor_ids: Vec<Uuid> = Vec::new();

    for (item, breakdown) in payload.items.iter().zip(&breakdowns) {
        let redemption_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO report_redemptions (id, user_id, property_id, credits_used, revenue_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(redemption_id)
        .bind(payload.user_id)
        .bind(item.property_id)
        .bind(CREDITS_PER_REPORT)
        .bind(revenue_cents)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

        insert_ledger_entry(
            &mut tx,
            payload.user_id,
            -CREDITS_PER_REPORT,
            CreditReason::Spend,
            Some(&redemption_id.to_string()),
            now,
        )
        .await
        .map_err(internal_error)?;

        let view = persist_distribution(&mut tx, redemption_id, item.property_id, breakdown, now)
            .await
            .map_err(internal_error)?;

        contributor_ids.extend(breakdown.payouts.iter().map(|payout| payout.user_id));
        redemptions.push(RedemptionView {
            redemption_id,
            property_id: item.property_id,
            revenue_cents,
            distribution_id: view.id,
        });
    }

    tx.commit().await.map_err(internal_error)?;

    notify_payouts_requested(&state, contributor_ids).await;

    Ok(Json(RedeemReportsResponse {
        ok: true,
        credits_spent: credits_needed,
        total_credits,
        redemptions,
    }))
}

/// Direct distribution trigger, one call per property line item of a
/// completed purchase. Idempotent per (purchase, property): a pre-existing
/// distribution is returned unchanged with no new payout rows.
async fn create_distribution(
    State(state): State<AppState>,
    Json(payload): Json<DistributeRequest>,
) -> Result<Json<DistributionView>, (StatusCode, Json<Value>)> {
    let breakdown = split_revenue(
        payload.total_revenue_cents,
        &state.fractions,
        &payload.contributors,
    )
    .map_err(split_error)?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let now = Utc::now();
    let view = persist_distribution(
        &mut tx,
        payload.purchase_id,
        payload.property_id,
        &breakdown,
        now,
    )
    .await
    .map_err(internal_error)?;
    tx.commit().await.map_err(internal_error)?;

    if !view.already_existed {
        let contributor_ids = breakdown
            .payouts
            .iter()
            .map(|payout| payout.user_id)
            .collect();
        notify_payouts_requested(&state, contributor_ids).await;
    }

    Ok(Json(view))
}

/// Purchase status probe for the checkout success screen and for
/// operators chasing a missing credit grant.
async fn get_payment_intent(
    State(state): State<AppState>,
    Path(external_reference): Path<String>,
) -> Result<Json<PaymentIntent>, (StatusCode, Json<Value>)> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, external_reference, package_id, credit_amount,
               amount_cents, status, created_at, updated_at
        FROM payment_intents
        WHERE external_reference = $1
        "#,
    )
    .bind(&external_reference)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("no payment intent for {external_reference}"),
        ));
    };

    let status: String = row.try_get("status").map_err(internal_error)?;
    Ok(Json(PaymentIntent {
        id: row.try_get("id").map_err(internal_error)?,
        user_id: row.try_get("user_id").map_err(internal_error)?,
        external_reference: row.try_get("external_reference").map_err(internal_error)?,
        package_id: row.try_get("package_id").map_err(internal_error)?,
        credit_amount: row.try_get("credit_amount").map_err(internal_error)?,
        amount_cents: row.try_get("amount_cents").map_err(internal_error)?,
        status: PaymentIntentStatus::parse(&status).map_err(internal_error)?,
        created_at: row.try_get("created_at").map_err(internal_error)?,
        updated_at: row.try_get("updated_at").map_err(internal_error)?,
    }))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceView>, (StatusCode, Json<Value>)> {
    let total_credits = load_balance(&state.pool, user_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(BalanceView {
        user_id,
        total_credits,
    }))
}

async fn list_ledger(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerListResponse>, (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let rows = sqlx::query(
        r#"
        SELECT id, user_id, delta, reason, reference, created_at
        FROM ledger_entries
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let reason: String = row.try_get("reason").map_err(internal_error)?;
        items.push(LedgerEntry {
            id: row.try_get("id").map_err(internal_error)?,
            user_id: row.try_get("user_id").map_err(internal_error)?,
            delta: row.try_get("delta").map_err(internal_error)?,
            reason: CreditReason::parse(&reason).map_err(internal_error)?,
            reference: row.try_get("reference").map_err(internal_error)?,
            created_at: row.try_get("created_at").map_err(internal_error)?,
        });
    }

    let total_credits = load_balance(&state.pool, user_id)
        .await
        .map_err(internal_error)?;

    Ok(Json(LedgerListResponse {
        user_id,
        total_credits,
        items,
    }))
}

async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<ListPayoutsQuery>,
) -> Result<Json<PayoutListResponse>, (StatusCode, Json<Value>)> {
    let status = query
        .status
        .as_deref()
        .map(PayoutStatus::parse)
        .transpose()
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, "BAD_STATUS", err))?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);

    let rows = sqlx::query(
        r#"
        SELECT id, revenue_distribution_id, user_id, payout_amount_cents, rating_count,
               is_top_contributor, status, transfer_reference, failure_reason,
               claimed_at, processed_at, created_at, updated_at
        FROM contributor_payouts
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY created_at DESC, id DESC
        LIMIT $3
        "#,
    )
    .bind(query.user_id)
    .bind(status.map(|status| status.as_str()))
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let status: String = row.try_get("status").map_err(internal_error)?;
        items.push(ContributorPayout {
            id: row.try_get("id").map_err(internal_error)?,
            revenue_distribution_id: row
                .try_get("revenue_distribution_id")
                .map_err(internal_error)?,
            user_id: row.try_get("user_id").map_err(internal_error)?,
            payout_amount_cents: row.try_get("payout_amount_cents").map_err(internal_error)?,
            rating_count: row.try_get("rating_count").map_err(internal_error)?,
            is_top_contributor: row.try_get("is_top_contributor").map_err(internal_error)?,
            status: PayoutStatus::parse(&status).map_err(internal_error)?,
            transfer_reference: row.try_get("transfer_reference").map_err(internal_error)?,
            failure_reason: row.try_get("failure_reason").map_err(internal_error)?,
            claimed_at: row.try_get("claimed_at").map_err(internal_error)?,
            processed_at: row.try_get("processed_at").map_err(internal_error)?,
            created_at: row.try_get("created_at").map_err(internal_error)?,
            updated_at: row.try_get("updated_at").map_err(internal_error)?,
        });
    }

    Ok(Json(PayoutListResponse { items }))
}

/// On-demand payout run, optionally scoped to one contributor. The same
/// sweep the ops worker runs on its schedule.
async fn run_payouts(
    State(state): State<AppState>,
    Json(payload): Json<PayoutRunRequest>,
) -> Result<Json<PayoutRunSummary>, (StatusCode, Json<Value>)> {
    let summary = run_sweep(
        &state.pool,
        state.transfers.as_ref(),
        &state.settlement,
        payload.user_id,
    )
    .await
    .map_err(internal_error)?;

    Ok(Json(summary))
}

async fn persist_distribution(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    purchase_id: Uuid,
    property_id: Uuid,
    breakdown: &DistributionBreakdown,
    now: DateTime<Utc>,
) -> AnyResult<DistributionView> {
    if let Some(existing) = fetch_distribution(tx, purchase_id, property_id).await? {
        return Ok(existing_distribution_view(existing));
    }

    let distribution_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO revenue_distributions (
            id, purchase_id, property_id, total_revenue_cents, platform_share_cents,
            top_contributor_share_cents, other_contributors_share_cents,
            top_contributor_id, top_contributor_rating_count, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (purchase_id, property_id) DO NOTHING
        "#,
    )
    .bind(distribution_id)
    .bind(purchase_id)
    .bind(property_id)
    .bind(breakdown.total_revenue_cents)
    .bind(breakdown.platform_share_cents)
    .bind(breakdown.top_contributor_share_cents)
    .bind(breakdown.other_contributors_share_cents)
    .bind(breakdown.top_contributor_id)
    .bind(breakdown.top_contributor_rating_count)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if inserted.rows_affected() == 0 {
        // Lost a concurrent race for this (purchase, property) pair.
        let existing = fetch_distribution(tx, purchase_id, property_id).await?;
        return existing
            .map(existing_distribution_view)
            .ok_or_else(|| anyhow::anyhow!("distribution vanished after conflict"));
    }

    for payout in &breakdown.payouts {
        sqlx::query(
            r#"
            INSERT INTO contributor_payouts (
                id, revenue_distribution_id, user_id, payout_amount_cents, rating_count,
                is_top_contributor, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(distribution_id)
        .bind(payout.user_id)
        .bind(payout.amount_cents)
        .bind(payout.rating_count)
        .bind(payout.is_top_contributor)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    Ok(DistributionView {
        id: distribution_id,
        purchase_id,
        property_id,
        total_revenue_cents: breakdown.total_revenue_cents,
        platform_share_cents: breakdown.platform_share_cents,
        top_contributor_share_cents: breakdown.top_contributor_share_cents,
        other_contributors_share_cents: breakdown.other_contributors_share_cents,
        top_contributor_id: breakdown.top_contributor_id,
        top_contributor_rating_count: breakdown.top_contributor_rating_count,
        payouts_created: breakdown.payouts.len() as i64,
        already_existed: false,
        created_at: now,
    })
}

async fn fetch_distribution(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    purchase_id: Uuid,
    property_id: Uuid,
) -> AnyResult<Option<RevenueDistribution>> {
    let row = sqlx::query(
        r#"
        SELECT id, purchase_id, property_id, total_revenue_cents, platform_share_cents,
               top_contributor_share_cents, other_contributors_share_cents,
               top_contributor_id, top_contributor_rating_count, created_at
        FROM revenue_distributions
        WHERE purchase_id = $1 AND property_id = $2
        "#,
    )
    .bind(purchase_id)
    .bind(property_id)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(RevenueDistribution {
        id: row.try_get("id")?,
        purchase_id: row.try_get("purchase_id")?,
        property_id: row.try_get("property_id")?,
        total_revenue_cents: row.try_get("total_revenue_cents")?,
        platform_share_cents: row.try_get("platform_share_cents")?,
        top_contributor_share_cents: row.try_get("top_contributor_share_cents")?,
        other_contributors_share_cents: row.try_get("other_contributors_share_cents")?,
        top_contributor_id: row.try_get("top_contributor_id")?,
        top_contributor_rating_count: row.try_get("top_contributor_rating_count")?,
        created_at: row.try_get("created_at")?,
    }))
}

fn existing_distribution_view(distribution: RevenueDistribution) -> DistributionView {
    DistributionView {
        id: distribution.id,
        purchase_id: distribution.purchase_id,
        property_id: distribution.property_id,
        total_revenue_cents: distribution.total_revenue_cents,
        platform_share_cents: distribution.platform_share_cents,
        top_contributor_share_cents: distribution.top_contributor_share_cents,
        other_contributors_share_cents: distribution.other_contributors_share_cents,
        top_contributor_id: distribution.top_contributor_id,
        top_contributor_rating_count: distribution.top_contributor_rating_count,
        payouts_created: 0,
        already_existed: true,
        created_at: distribution.created_at,
    }
}

async fn insert_ledger_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    delta: i64,
    reason: CreditReason,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> AnyResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (id, user_id, delta, reason, reference, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(delta)
    .bind(reason.as_str())
    .bind(reference)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Atomic increment of the cached balance; creates the account row on
/// first credit. Only positive deltas come through here.
async fn credit_balance_upsert(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    delta: i64,
    now: DateTime<Utc>,
) -> AnyResult<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO credit_accounts (user_id, credits, updated_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET credits = credit_accounts.credits + EXCLUDED.credits,
            updated_at = EXCLUDED.updated_at
        RETURNING credits
        "#,
    )
    .bind(user_id)
    .bind(delta)
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.try_get("credits")?)
}

/// Conditional single-statement debit; returns None (and changes nothing)
/// when the balance cannot cover `amount`, including when the user has no
/// account row yet.
async fn credit_balance_debit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    amount: i64,
    now: DateTime<Utc>,
) -> AnyResult<Option<i64>> {
    let row = sqlx::query(
        r#"
        UPDATE credit_accounts
        SET credits = credits - $2, updated_at = $3
        WHERE user_id = $1 AND credits >= $2
        RETURNING credits
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("credits")?)),
        None => Ok(None),
    }
}

async fn load_balance(pool: &PgPool, user_id: Uuid) -> AnyResult<i64> {
    let credits = sqlx::query_scalar::<_, i64>(
        "SELECT credits FROM credit_accounts WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(credits.unwrap_or(0))
}

/// Nudge the worker to sweep the affected users. Best effort: the
/// scheduled sweep picks the payouts up anyway if the bus is down.
async fn notify_payouts_requested(state: &AppState, mut user_ids: Vec<Uuid>) {
    user_ids.sort();
    user_ids.dedup();
    if user_ids.is_empty() {
        return;
    }

    let event = PayoutsRequestedEvent { user_ids };
    if let Err(err) = state
        .redis
        .publish_json(PAYOUTS_REQUESTED_CHANNEL, &event)
        .await
    {
        error!("failed to publish payout request: {err:#}");
    }
}

fn split_error(err: SplitError) -> (StatusCode, Json<Value>) {
    match err {
        SplitError::Unreconciled => internal_error(err),
        _ => api_error(StatusCode::BAD_REQUEST, "BAD_SPLIT", err),
    }
}

fn api_error(
    status: StatusCode,
    code: &str,
    message: impl std::fmt::Display,
) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({ "error": code, "message": message.to_string() })),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<Value>) {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err)
}
