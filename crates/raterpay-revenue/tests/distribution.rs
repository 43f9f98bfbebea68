use chrono::{TimeZone, Utc};
use raterpay_revenue::{ContributorStanding, SplitFractions, split_revenue};
use uuid::Uuid;

fn standard_fractions() -> SplitFractions {
    SplitFractions::new("0.80".parse().unwrap(), "0.50".parse().unwrap())
        .expect("default fractions are valid")
}

fn contributor(id: u128, rating_count: i64) -> ContributorStanding {
    ContributorStanding {
        user_id: Uuid::from_u128(id),
        rating_count,
        first_rated_at: None,
    }
}

#[test]
fn report_purchase_pays_the_raters_behind_it() {
    // A $10.00 report redeemed against a property rated by three users.
    let first_rating = Utc.with_ymd_and_hms(2025, 2, 1, 12, 0, 0).unwrap();
    let mut heavy_rater = contributor(1, 18);
    heavy_rater.first_rated_at = Some(first_rating);
    let contributors = vec![heavy_rater, contributor(2, 4), contributor(3, 2)];

    let breakdown = split_revenue(1000, &standard_fractions(), &contributors)
        .expect("valid split inputs");

    assert_eq!(breakdown.platform_share_cents, 800);
    assert_eq!(breakdown.top_contributor_share_cents, 100);
    assert_eq!(breakdown.other_contributors_share_cents, 100);
    assert_eq!(breakdown.top_contributor_id, Some(Uuid::from_u128(1)));

    // 100 cents over ratings 4:2 -> 67/33 (remainder to the heavier rater).
    let other_amounts: Vec<i64> = breakdown
        .payouts
        .iter()
        .filter(|payout| !payout.is_top_contributor)
        .map(|payout| payout.amount_cents)
        .collect();
    assert_eq!(other_amounts, vec![67, 33]);
}

#[test]
fn shares_reconcile_across_awkward_totals_and_pools() {
    let fractions = standard_fractions();
    let rosters: Vec<Vec<ContributorStanding>> = vec![
        vec![],
        vec![contributor(1, 1)],
        vec![contributor(1, 3), contributor(2, 3)],
        vec![
            contributor(1, 11),
            contributor(2, 7),
            contributor(3, 7),
            contributor(4, 1),
            contributor(5, 1),
        ],
    ];

    for total in [1, 3, 99, 100, 101, 997, 1000, 55_555] {
        for roster in &rosters {
            let breakdown = split_revenue(total, &fractions, roster)
                .unwrap_or_else(|err| panic!("split({total}) failed: {err}"));

            assert_eq!(
                breakdown.platform_share_cents
                    + breakdown.top_contributor_share_cents
                    + breakdown.other_contributors_share_cents,
                total,
                "no cent may be lost for total {total} with {} raters",
                roster.len()
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
            assert!(breakdown.platform_share_cents >= 0);
        }
    }
}

#[test]
fn splitting_twice_is_deterministic() {
    let contributors = vec![contributor(9, 2), contributor(4, 2), contributor(7, 5)];
    let first = split_revenue(997, &standard_fractions(), &contributors).unwrap();
    let second = split_revenue(997, &standard_fractions(), &contributors).unwrap();
    assert_eq!(first, second);

    // Input order must not matter for who is crowned top contributor.
    let mut reversed = contributors.clone();
    reversed.reverse();
    let third = split_revenue(997, &standard_fractions(), &reversed).unwrap();
    assert_eq!(first.top_contributor_id, third.top_contributor_id);
    assert_eq!(
        first.top_contributor_share_cents,
        third.top_contributor_share_cents
    );
}

#[test]
fn generous_contributor_fraction_still_reconciles() {
    // Platform keeps nothing, top contributor takes the whole pool.
    let fractions =
        SplitFractions::new("0".parse().unwrap(), "1".parse().unwrap()).unwrap();
    let contributors = vec![contributor(1, 5), contributor(2, 1)];
    let breakdown = split_revenue(500, &fractions, &contributors).unwrap();

    assert_eq!(breakdown.platform_share_cents, 0);
    assert_eq!(breakdown.top_contributor_share_cents, 500);
    assert_eq!(breakdown.other_contributors_share_cents, 0);
    assert_eq!(breakdown.payouts.len(), 1);
}
