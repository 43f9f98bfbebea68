use anyhow::{Context, Result};
use futures_util::StreamExt;
use raterpay_payouts::{provider::HttpTransferClient, run_sweep};
use raterpay_platform::{
    PAYOUTS_REQUESTED_CHANNEL, PayoutsRequestedEvent, RedisBus, ServiceConfig, SettlementConfig,
    connect_database,
};
use redis::Msg;
use sqlx::PgPool;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "raterpay_ops=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let settlement = SettlementConfig::from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;
    let transfers = HttpTransferClient::new(
        &settlement.transfer_api_base,
        &settlement.transfer_api_key,
        std::time::Duration::from_secs(settlement.transfer_timeout_secs),
    )?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(PAYOUTS_REQUESTED_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        settlement.payout_sweep_interval_secs,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        "payout worker subscribed to {PAYOUTS_REQUESTED_CHANNEL}, sweeping every {}s",
        settlement.payout_sweep_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_sweep(&pool, &transfers, &settlement, None).await {
                    Ok(summary) => {
                        if summary.processed > 0 {
                            info!(
                                "scheduled sweep resolved {} payouts ({} paid, {} failed, {} cents transferred)",
                                summary.processed,
                                summary.succeeded,
                                summary.failed,
                                summary.total_amount_cents
                            );
                        }
                    }
                    Err(err) => error!("scheduled payout sweep failed: {err:#}"),
                }
            }
            msg = messages.next() => {
                let msg = msg.context("payout request stream ended unexpectedly")?;
                if let Err(err) = handle_message(&pool, &transfers, &settlement, msg).await {
                    error!("failed to process payout request: {err:#}");
                }
            }
        }
    }
}

async fn handle_message(
    pool: &PgPool,
    transfers: &HttpTransferClient,
    settlement: &SettlementConfig,
    msg: Msg,
) -> Result<()> {
    let payload: String = msg.get_payload()?;
    let event: PayoutsRequestedEvent = serde_json::from_str(&payload)?;

    for user_id in event.user_ids {
        let summary = run_sweep(pool, transfers, settlement, Some(user_id)).await?;
        if summary.processed > 0 {
            info!(
                "on-demand sweep for user {user_id}: {} paid, {} failed",
                summary.succeeded, summary.failed
            );
        }
    }

    Ok(())
}
