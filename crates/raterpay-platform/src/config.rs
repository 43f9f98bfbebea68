use anyhow::{Context, Result};
use rust_decimal::Decimal;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub http_addr: String,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr =
            std::env::var("HTTP_ADDR").unwrap_or_else(|_| default_http_addr.to_string());

        Ok(Self {
            database_url,
            redis_url,
            http_addr,
        })
    }

    pub fn worker_from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is required")?;
        let redis_url = std::env::var("REDIS_URL").context("REDIS_URL is required")?;

        Ok(Self {
            database_url,
            redis_url,
            http_addr: String::new(),
        })
    }
}

/// Settlement tunables shared by the gateway and the payout worker. All of
/// these have operational defaults except the two external secrets.
#[derive(Clone, Debug)]
pub struct SettlementConfig {
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub platform_fraction: Decimal,
    pub top_contributor_fraction: Decimal,
    pub revenue_per_credit_cents: i64,
    pub min_payout_cents: i64,
    pub payout_reclaim_secs: i64,
    pub transfer_timeout_secs: u64,
    pub payout_sweep_interval_secs: u64,
    pub transfer_api_base: String,
    pub transfer_api_key: String,
    pub dev_grant_enabled: bool,
    pub referral_bonus_referrer: i64,
    pub referral_bonus_referred: i64,
}

impl SettlementConfig {
    pub fn from_env() -> Result<Self> {
        let webhook_secret =
            std::env::var("PAYMENT_WEBHOOK_SECRET").context("PAYMENT_WEBHOOK_SECRET is required")?;
        let transfer_api_base =
            std::env::var("TRANSFER_API_BASE").context("TRANSFER_API_BASE is required")?;
        let transfer_api_key =
            std::env::var("TRANSFER_API_KEY").context("TRANSFER_API_KEY is required")?;

        Ok(Self {
            webhook_secret,
            webhook_tolerance_secs: env_parse("WEBHOOK_TOLERANCE_SECS", 300)?,
            platform_fraction: env_fraction("PLATFORM_FRACTION", "0.80")?,
            top_contributor_fraction: env_fraction("TOP_CONTRIBUTOR_FRACTION", "0.50")?,
            revenue_per_credit_cents: env_parse("REVENUE_PER_CREDIT_CENTS", 1000)?,
            min_payout_cents: env_parse("MIN_PAYOUT_CENTS", 100)?,
            payout_reclaim_secs: env_parse("PAYOUT_RECLAIM_SECS", 900)?,
            transfer_timeout_secs: env_parse("TRANSFER_TIMEOUT_SECS", 30)?,
            payout_sweep_interval_secs: env_parse("PAYOUT_SWEEP_INTERVAL_SECS", 600)?,
            transfer_api_base,
            transfer_api_key,
            dev_grant_enabled: env_flag("DEV_GRANT_ENABLED"),
            referral_bonus_referrer: env_parse("REFERRAL_BONUS_REFERRER", 20)?,
            referral_bonus_referred: env_parse("REFERRAL_BONUS_REFERRED", 10)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} is not a valid value")),
        Err(_) => Ok(default),
    }
}

fn env_fraction(key: &str, default: &str) -> Result<Decimal> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    parse_fraction(&raw).with_context(|| format!("{key} must be a fraction within [0, 1]"))
}

fn parse_fraction(value: &str) -> Result<Decimal> {
    let fraction: Decimal = value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("not a decimal: {value}"))?;
    if fraction < Decimal::ZERO || fraction > Decimal::ONE {
        anyhow::bail!("fraction out of range: {value}");
    }
    Ok(fraction)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
