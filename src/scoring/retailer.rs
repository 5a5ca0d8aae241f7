use super::{ScoreError, ScoringRule};
use crate::receipt::Receipt;

/// One point for every letter or digit in the retailer name.
pub struct RetailerNameRule;

impl ScoringRule for RetailerNameRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        let count = receipt
            .retailer
            .chars()
            .filter(|c| c.is_alphanumeric())
            .count();
        Ok(count as i64)
    }

    fn name(&self) -> &str {
        "Retailer Name"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_retailer(retailer: &str) -> Receipt {
        Receipt {
            id: "r".to_string(),
            retailer: retailer.to_string(),
            purchase_date: "2022-01-02".to_string(),
            purchase_time: "10:00".to_string(),
            items: Vec::new(),
            total: "1.00".to_string(),
        }
    }

    #[test]
    fn test_counts_letters_and_digits_only() {
        assert_eq!(RetailerNameRule.score(&with_retailer("Target")), Ok(6));
        assert_eq!(
            RetailerNameRule.score(&with_retailer("M&M Corner Market")),
            Ok(14)
        );
        assert_eq!(RetailerNameRule.score(&with_retailer("7-Eleven")), Ok(7));
        assert_eq!(RetailerNameRule.score(&with_retailer(" & - ")), Ok(0));
    }
}
