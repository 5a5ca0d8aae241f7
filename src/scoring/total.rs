use super::{ScoreError, ScoringRule};
use crate::receipt::{parse_amount, Receipt};

const ROUND_DOLLAR_POINTS: i64 = 50;
const QUARTER_MULTIPLE_POINTS: i64 = 25;

fn parse_total(receipt: &Receipt) -> Result<f64, ScoreError> {
    parse_amount(&receipt.total).ok_or_else(|| ScoreError::malformed("total", &receipt.total))
}

/// +50 when the total has no cents.
pub struct RoundDollarRule;

impl ScoringRule for RoundDollarRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        let total = parse_total(receipt)?;
        Ok(if total % 1.0 == 0.0 {
            ROUND_DOLLAR_POINTS
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "Round Dollar"
    }
}

/// +25 when the total is a multiple of 0.25. Fires alongside
/// `RoundDollarRule` for round totals.
pub struct QuarterMultipleRule;

impl ScoringRule for QuarterMultipleRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        let total = parse_total(receipt)?;
        Ok(if total % 0.25 == 0.0 {
            QUARTER_MULTIPLE_POINTS
        } else {
            0
        })
    }

    fn name(&self) -> &str {
        "Quarter Multiple"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_total(total: &str) -> Receipt {
        Receipt {
            id: "t".to_string(),
            retailer: "Shop".to_string(),
            purchase_date: "2022-01-02".to_string(),
            purchase_time: "10:00".to_string(),
            items: Vec::new(),
            total: total.to_string(),
        }
    }

    fn both(total: &str) -> i64 {
        let receipt = with_total(total);
        RoundDollarRule.score(&receipt).unwrap() + QuarterMultipleRule.score(&receipt).unwrap()
    }

    #[test]
    fn test_total_bonuses_are_additive() {
        assert_eq!(both("9.00"), 75);
        assert_eq!(both("0"), 75);
        assert_eq!(both("9.25"), 25);
        assert_eq!(both("9.50"), 25);
        assert_eq!(both("35.35"), 0);
    }

    #[test]
    fn test_round_dollar_alone() {
        assert_eq!(RoundDollarRule.score(&with_total("12")), Ok(50));
        assert_eq!(RoundDollarRule.score(&with_total("12.75")), Ok(0));
        assert_eq!(QuarterMultipleRule.score(&with_total("12.75")), Ok(25));
    }

    #[test]
    fn test_unparsable_total() {
        assert!(RoundDollarRule.score(&with_total("$9.00")).is_err());
        assert!(QuarterMultipleRule.score(&with_total("$9.00")).is_err());
    }
}
