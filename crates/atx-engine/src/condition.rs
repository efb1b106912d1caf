//! Trigger condition evaluation.
//!
//! A conditional order's conditions are ANDed: the order activates only
//! when every condition holds against the latest snapshot of its asset. A
//! condition whose snapshot or indicator is missing counts as not met; the
//! order simply stays pending until the next cycle.

use std::collections::HashMap;

use atx_core::types::{Condition, ConditionKind, MarketSnapshot};

/// Value a condition compares, or `None` when the snapshot lacks it.
pub fn observed_value(condition: &Condition, snapshot: &MarketSnapshot) -> Option<f64> {
    match condition.kind {
        ConditionKind::PriceThreshold => Some(snapshot.price),
        ConditionKind::IndicatorThreshold(kind) => {
            snapshot.indicator(kind, condition.timeframe.as_deref())
        }
    }
}

/// Whether a single condition holds.
pub fn condition_met(condition: &Condition, snapshot: &MarketSnapshot) -> bool {
    observed_value(condition, snapshot)
        .is_some_and(|v| v.is_finite() && condition.operator.apply(v, condition.value))
}

/// Whether every condition holds. Snapshots are keyed by asset.
///
/// An empty condition list is never satisfied; conditional orders are
/// refused at acceptance without one.
pub fn all_met(conditions: &[Condition], snapshots: &HashMap<String, MarketSnapshot>) -> bool {
    !conditions.is_empty()
        && conditions.iter().all(|c| {
            snapshots
                .get(&c.asset)
                .is_some_and(|snapshot| condition_met(c, snapshot))
        })
}

/// Indicator keys the conditions read that are absent from an otherwise
/// available snapshot, e.g. a timeframe the feed does not publish.
pub fn missing_indicators(
    conditions: &[Condition],
    snapshots: &HashMap<String, MarketSnapshot>,
) -> Vec<String> {
    conditions
        .iter()
        .filter_map(|c| {
            let ConditionKind::IndicatorThreshold(kind) = c.kind else {
                return None;
            };
            let snapshot = snapshots.get(&c.asset)?;
            observed_value(c, snapshot)
                .is_none()
                .then(|| format!("{}:{}", c.asset, kind.key(c.timeframe.as_deref())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atx_core::types::{ComparisonOperator, IndicatorKind};

    fn snapshots(price: f64, rsi_1h: Option<f64>) -> HashMap<String, MarketSnapshot> {
        let mut snap = MarketSnapshot::spot("ETHUSDC", price, 0);
        if let Some(rsi) = rsi_1h {
            snap.indicators.insert(IndicatorKind::Rsi.key(Some("1h")), rsi);
        }
        HashMap::from([("ETHUSDC".to_string(), snap)])
    }

    fn price_and_rsi() -> Vec<Condition> {
        vec![
            Condition::price("ETHUSDC", ComparisonOperator::Gt, 2000.0),
            Condition::indicator(
                "ETHUSDC",
                IndicatorKind::Rsi,
                Some("1h"),
                ComparisonOperator::Lt,
                30.0,
            ),
        ]
    }

    #[test]
    fn conditions_are_anded() {
        let conditions = price_and_rsi();
        assert!(!all_met(&conditions, &snapshots(2100.0, Some(40.0))));
        assert!(!all_met(&conditions, &snapshots(1900.0, Some(20.0))));
        assert!(all_met(&conditions, &snapshots(2100.0, Some(20.0))));
    }

    #[test]
    fn missing_data_is_not_met() {
        let conditions = price_and_rsi();
        assert!(!all_met(&conditions, &snapshots(2100.0, None)));
        assert!(!all_met(&conditions, &HashMap::new()));
        assert!(!all_met(&[], &snapshots(2100.0, Some(20.0))));
    }

    #[test]
    fn timeframe_scopes_indicator_lookup() {
        let mut snaps = snapshots(2100.0, Some(20.0));
        snaps
            .get_mut("ETHUSDC")
            .unwrap()
            .indicators
            .insert(IndicatorKind::Rsi.key(None), 80.0);
        let unscoped = Condition::indicator(
            "ETHUSDC",
            IndicatorKind::Rsi,
            None,
            ComparisonOperator::Lt,
            30.0,
        );
        assert!(!condition_met(&unscoped, &snaps["ETHUSDC"]));
        assert!(condition_met(&price_and_rsi()[1], &snaps["ETHUSDC"]));
    }

    #[test]
    fn reports_unpublished_indicators() {
        let snaps = snapshots(2100.0, Some(20.0));
        let weekly = Condition::indicator(
            "ETHUSDC",
            IndicatorKind::Rsi,
            Some("1w"),
            ComparisonOperator::Lt,
            30.0,
        );
        let conditions = vec![price_and_rsi()[1].clone(), weekly];
        assert_eq!(missing_indicators(&conditions, &snaps), vec!["ETHUSDC:rsi@1w".to_string()]);
        // no snapshot at all is a fetch problem, not a missing indicator
        assert!(missing_indicators(&conditions, &HashMap::new()).is_empty());
    }
}
