//! Revenue split for a purchased property report.
//!
//! All arithmetic is in integer minor-currency units. The configured
//! platform fraction is taken off the top; the remainder pool is split
//! between the top contributor and the other contributors, proportionally
//! to rating counts with largest-remainder rounding so every cent of the
//! total is accounted for.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A user whose ratings back the purchased report, as supplied by the
/// rating-history collaborator. `first_rated_at` breaks top-contributor
/// ties; absent timestamps lose the tie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorStanding {
    pub user_id: Uuid,
    pub rating_count: i64,
    #[serde(default)]
    pub first_rated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitFractions {
    /// Fraction of total revenue retained by the platform.
    pub platform: Decimal,
    /// Fraction of the non-platform pool granted to the top contributor.
    pub top_contributor: Decimal,
}

impl SplitFractions {
    pub fn new(platform: Decimal, top_contributor: Decimal) -> Result<Self, SplitError> {
        for fraction in [platform, top_contributor] {
            if fraction < Decimal::ZERO || fraction > Decimal::ONE {
                return Err(SplitError::FractionOutOfRange);
            }
        }
        Ok(Self {
            platform,
            top_contributor,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("total revenue must be positive")]
    NonPositiveRevenue,
    #[error("split fractions must lie within [0, 1]")]
    FractionOutOfRange,
    #[error("contributor rating counts must be positive")]
    NonPositiveRatingCount,
    #[error("duplicate contributor {0}")]
    DuplicateContributor(Uuid),
    #[error("computed shares do not reconcile with total revenue")]
    Unreconciled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutShare {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub rating_count: i64,
    pub is_top_contributor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionBreakdown {
    pub total_revenue_cents: i64,
    pub platform_share_cents: i64,
    pub top_contributor_share_cents: i64,
    pub other_contributors_share_cents: i64,
    pub top_contributor_id: Option<Uuid>,
    pub top_contributor_rating_count: i64,
    /// One entry per contributor owed a non-zero amount; the sum equals
    /// `top_contributor_share_cents + other_contributors_share_cents`.
    pub payouts: Vec<PayoutShare>,
}

pub fn split_revenue(
    total_revenue_cents: i64,
    fractions: &SplitFractions,
    contributors: &[ContributorStanding],
) -> Result<DistributionBreakdown, SplitError> {
    if total_revenue_cents <= 0 {
        return Err(SplitError::NonPositiveRevenue);
    }
    for (index, contributor) in contributors.iter().enumerate() {
        if contributor.rating_count <= 0 {
            return Err(SplitError::NonPositiveRatingCount);
        }
        if contributors[..index]
            .iter()
            .any(|earlier| earlier.user_id == contributor.user_id)
        {
            return Err(SplitError::DuplicateContributor(contributor.user_id));
        }
    }

    let mut platform_share = take_fraction(total_revenue_cents, fractions.platform);
    let pool = total_revenue_cents - platform_share;

    // No one to pay; the whole pool reverts to the platform.
    let Some(top) = select_top_contributor(contributors) else {
        return finish(
            total_revenue_cents,
            total_revenue_cents,
            0,
            0,
            None,
            0,
            Vec::new(),
        );
    };

    let top_share = take_fraction(pool, fractions.top_contributor);

    let others: Vec<&ContributorStanding> = contributors
        .iter()
        .filter(|contributor| contributor.user_id != top.user_id)
        .collect();

    let mut payouts = Vec::with_capacity(contributors.len());
    let other_share = if others.is_empty() {
        // Sole contributor keeps only the top share; the rest of the pool
        // reverts to the platform.
        platform_share += pool - top_share;
        0
    } else {
        pool - top_share
    };

    if top_share > 0 {
        payouts.push(PayoutShare {
            user_id: top.user_id,
            amount_cents: top_share,
            rating_count: top.rating_count,
            is_top_contributor: true,
        });
    }
    payouts.extend(apportion_by_rating_count(other_share, &others));

    finish(
        total_revenue_cents,
        platform_share,
        top_share,
        other_share,
        Some(top.user_id),
        top.rating_count,
        payouts,
    )
}

fn finish(
    total: i64,
    platform: i64,
    top: i64,
    other: i64,
    top_contributor_id: Option<Uuid>,
    top_contributor_rating_count: i64,
    payouts: Vec<PayoutShare>,
) -> Result<DistributionBreakdown, SplitError> {
    if platform + top + other != total {
        return Err(SplitError::Unreconciled);
    }
    let paid: i64 = payouts.iter().map(|payout| payout.amount_cents).sum();
    if paid != top + other {
        return Err(SplitError::Unreconciled);
    }

    Ok(DistributionBreakdown {
        total_revenue_cents: total,
        platform_share_cents: platform,
        top_contributor_share_cents: top,
        other_contributors_share_cents: other,
        top_contributor_id,
        top_contributor_rating_count,
        payouts,
    })
}

fn take_fraction(amount_cents: i64, fraction: Decimal) -> i64 {
    (Decimal::from(amount_cents) * fraction)
        .trunc()
        .to_i64()
        .unwrap_or(0)
}

/// Highest rating count wins; ties go to the earliest first rating, then to
/// the smaller user id so the outcome never depends on input order.
fn select_top_contributor(contributors: &[ContributorStanding]) -> Option<&ContributorStanding> {
    contributors.iter().reduce(|best, candidate| {
        if outranks(candidate, best) {
            candidate
        } else {
            best
        }
    })
}

fn outranks(candidate: &ContributorStanding, best: &ContributorStanding) -> bool {
    if candidate.rating_count != best.rating_count {
        return candidate.rating_count > best.rating_count;
    }
    match (candidate.first_rated_at, best.first_rated_at) {
        (Some(a), Some(b)) if a != b => a < b,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        _ => candidate.user_id < best.user_id,
    }
}

/// Largest-remainder apportionment: floor each proportional share, then hand
/// the leftover cents to the largest fractional remainders (user id breaks
/// remainder ties). Contributors rounding to zero get no payout row.
fn apportion_by_rating_count(
    amount_cents: i64,
    contributors: &[&ContributorStanding],
) -> Vec<PayoutShare> {
    if amount_cents <= 0 || contributors.is_empty() {
        return Vec::new();
    }

    let total_weight: i128 = contributors
        .iter()
        .map(|contributor| i128::from(contributor.rating_count))
        .sum();

    let mut shares: Vec<(usize, i64, i128)> = Vec::with_capacity(contributors.len());
    let mut assigned: i64 = 0;
    for (index, contributor) in contributors.iter().enumerate() {
        let scaled = i128::from(amount_cents) * i128::from(contributor.rating_count);
        let base = (scaled / total_weight) as i64;
        let remainder = scaled % total_weight;
        assigned += base;
        shares.push((index, base, remainder));
    }

    let mut leftover = amount_cents - assigned;
    shares.sort_by(|a, b| {
        b.2.cmp(&a.2)
            .then_with(|| contributors[a.0].user_id.cmp(&contributors[b.0].user_id))
    });
    for share in shares.iter_mut() {
        if leftover == 0 {
            break;
        }
        share.1 += 1;
        leftover -= 1;
    }
    shares.sort_by_key(|share| share.0);

    shares
        .into_iter()
        .filter(|share| share.1 > 0)
        .map(|(index, amount, _)| PayoutShare {
            user_id: contributors[index].user_id,
            amount_cents: amount,
            rating_count: contributors[index].rating_count,
            is_top_contributor: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fractions(platform: &str, top: &str) -> SplitFractions {
        SplitFractions::new(platform.parse().unwrap(), top.parse().unwrap()).unwrap()
    }

    fn user(n: u8) -> Uuid {
        Uuid::from_u128(u128::from(n))
    }

    fn contributor(n: u8, rating_count: i64) -> ContributorStanding {
        ContributorStanding {
            user_id: user(n),
            rating_count,
            first_rated_at: None,
        }
    }

    #[test]
    fn standard_three_way_split() {
        let contributors = [contributor(1, 5), contributor(2, 3), contributor(3, 2)];
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &contributors).unwrap();

        assert_eq!(breakdown.platform_share_cents, 800);
        assert_eq!(breakdown.top_contributor_share_cents, 100);
        assert_eq!(breakdown.other_contributors_share_cents, 100);
        assert_eq!(breakdown.top_contributor_id, Some(user(1)));
        assert_eq!(breakdown.top_contributor_rating_count, 5);

        let amounts: Vec<(Uuid, i64)> = breakdown
            .payouts
            .iter()
            .map(|payout| (payout.user_id, payout.amount_cents))
            .collect();
        assert_eq!(
            amounts,
            vec![(user(1), 100), (user(2), 60), (user(3), 40)]
        );
        assert!(breakdown.payouts[0].is_top_contributor);
        assert!(!breakdown.payouts[1].is_top_contributor);
    }

    #[test]
    fn no_contributors_reverts_everything_to_platform() {
        let breakdown = split_revenue(1000, &fractions("0.80", "0.50"), &[]).unwrap();
        assert_eq!(breakdown.platform_share_cents, 1000);
        assert_eq!(breakdown.top_contributor_share_cents, 0);
        assert_eq!(breakdown.other_contributors_share_cents, 0);
        assert_eq!(breakdown.top_contributor_id, None);
        assert!(breakdown.payouts.is_empty());
    }

    #[test]
    fn sole_contributor_gets_only_the_top_share() {
        let contributors = [contributor(1, 4)];
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &contributors).unwrap();
        assert_eq!(breakdown.platform_share_cents, 900);
        assert_eq!(breakdown.top_contributor_share_cents, 100);
        assert_eq!(breakdown.other_contributors_share_cents, 0);
        assert_eq!(breakdown.payouts.len(), 1);
        assert_eq!(breakdown.payouts[0].amount_cents, 100);
    }

    #[test]
    fn tie_breaks_on_earliest_first_rating_then_user_id() {
        let early = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let mut a = contributor(2, 5);
        a.first_rated_at = Some(late);
        let mut b = contributor(1, 5);
        b.first_rated_at = Some(early);
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &[a, b]).unwrap();
        assert_eq!(breakdown.top_contributor_id, Some(user(1)));

        // Identical timestamps fall through to the user id.
        let mut c = contributor(4, 5);
        c.first_rated_at = Some(early);
        let mut d = contributor(3, 5);
        d.first_rated_at = Some(early);
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &[c, d]).unwrap();
        assert_eq!(breakdown.top_contributor_id, Some(user(3)));

        // A known timestamp outranks an unknown one.
        let mut e = contributor(6, 5);
        e.first_rated_at = Some(late);
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &[contributor(5, 5), e])
                .unwrap();
        assert_eq!(breakdown.top_contributor_id, Some(user(6)));
    }

    #[test]
    fn remainders_are_assigned_largest_first() {
        // Pool 200, top share 100, 100 cents split 1:1:1 over three others.
        let contributors = [
            contributor(1, 9),
            contributor(2, 1),
            contributor(3, 1),
            contributor(4, 1),
        ];
        let breakdown =
            split_revenue(1000, &fractions("0.80", "0.50"), &contributors).unwrap();
        let others: Vec<i64> = breakdown
            .payouts
            .iter()
            .filter(|payout| !payout.is_top_contributor)
            .map(|payout| payout.amount_cents)
            .collect();
        // 100/3 = 33 each; equal remainders, so the smallest user id gets
        // the leftover cent.
        assert_eq!(others, vec![34, 33, 33]);
        assert_eq!(breakdown.other_contributors_share_cents, 100);
    }

    #[test]
    fn every_split_reconciles_exactly() {
        let cases: &[(i64, &[(u8, i64)])] = &[
            (999, &[(1, 7), (2, 3)]),
            (101, &[(1, 1), (2, 1), (3, 1), (4, 1), (5, 1)]),
            (1, &[(1, 10), (2, 20)]),
            (123_457, &[(1, 13), (2, 7), (3, 91), (4, 2)]),
        ];
        let fractions = fractions("0.80", "0.50");

        for (total, raters) in cases {
            let contributors: Vec<ContributorStanding> = raters
                .iter()
                .map(|(id, count)| contributor(*id, *count))
                .collect();
            let breakdown = split_revenue(*total, &fractions, &contributors).unwrap();

            assert_eq!(
                breakdown.platform_share_cents
                    + breakdown.top_contributor_share_cents
                    + breakdown.other_contributors_share_cents,
                *total,
                "shares must sum to the total for {total}"
            );
            let paid: i64 = breakdown
                .payouts
                .iter()
                .map(|payout| payout.amount_cents)
                .sum();
            assert_eq!(
                paid,
                breakdown.top_contributor_share_cents
                    + breakdown.other_contributors_share_cents
            );
            assert!(breakdown.payouts.iter().all(|p| p.amount_cents > 0));
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let fractions_ok = fractions("0.80", "0.50");
        assert_eq!(
            split_revenue(0, &fractions_ok, &[]),
            Err(SplitError::NonPositiveRevenue)
        );
        assert_eq!(
            split_revenue(-5, &fractions_ok, &[]),
            Err(SplitError::NonPositiveRevenue)
        );
        assert_eq!(
            split_revenue(100, &fractions_ok, &[contributor(1, 0)]),
            Err(SplitError::NonPositiveRatingCount)
        );
        assert_eq!(
            split_revenue(100, &fractions_ok, &[contributor(1, 2), contributor(1, 3)]),
            Err(SplitError::DuplicateContributor(user(1)))
        );
        assert_eq!(
            SplitFractions::new(Decimal::new(15, 1), Decimal::ONE),
            Err(SplitError::FractionOutOfRange)
        );
        assert_eq!(
            SplitFractions::new(Decimal::ONE, Decimal::NEGATIVE_ONE),
            Err(SplitError::FractionOutOfRange)
        );
    }
}
