//! Property tests for score bounds and gate consistency

use chrono::{Duration, NaiveDate};
use expense_anomaly::anomaly_detection::{AnomalyDetector, FeatureBreakdown, FeatureScore};
use expense_anomaly::Expense;
use proptest::prelude::*;
use rust_decimal::Decimal;

const CATEGORIES: [&str; 4] = ["Meals", "Travel", "Office", ""];
const MERCHANTS: [&str; 4] = ["Corner Deli", "City Cab", "Paper & Co", "Corner Deli Express"];

fn arb_expense() -> impl Strategy<Value = Expense> {
    (0i64..1_000_000, 0i64..120, 0u32..24, 0usize..4, 0usize..4).prop_map(
        |(cents, day, hour, category, merchant)| {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day);
            Expense::new(
                "prop-user",
                Decimal::new(cents, 2),
                date,
                date.and_hms_opt(hour, 0, 0).unwrap(),
            )
            .with_category(CATEGORIES[category])
            .with_merchant(MERCHANTS[merchant])
        },
    )
}

fn arb_feature() -> impl Strategy<Value = FeatureScore> {
    (any::<bool>(), -1.0f64..2.0).prop_map(|(triggered, score)| FeatureScore::new(triggered, score))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn score_is_bounded(candidate in arb_expense(), history in prop::collection::vec(arb_expense(), 0..40)) {
        let detector = AnomalyDetector::default();

        let score = detector.calculate_anomaly_score(&candidate, &history);
        prop_assert!((0.0..=1.0).contains(&score));

        if history.len() < 10 {
            prop_assert_eq!(score, 0.0);
            prop_assert!(!detector.is_anomalous(&candidate, &history));
        } else {
            let anomalies = detector.detect_anomalies(&candidate, &history);
            prop_assert_eq!(detector.is_anomalous(&candidate, &history), !anomalies.is_empty());
        }
    }

    #[test]
    fn composite_is_bounded(
        amount in arb_feature(),
        time in arb_feature(),
        frequency in arb_feature(),
        category in arb_feature(),
        merchant in arb_feature(),
    ) {
        let detector = AnomalyDetector::default();
        let features = FeatureBreakdown { amount, time, frequency, category, merchant };

        let score = detector.composite_score(&features);
        prop_assert!((0.0..=1.0).contains(&score));
    }
}
