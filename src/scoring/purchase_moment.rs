use super::{ScoreError, ScoringRule};
use crate::receipt::Receipt;

const ODD_DAY_POINTS: i64 = 6;
const AFTERNOON_POINTS: i64 = 10;
const AFTERNOON_START_HOUR: u32 = 14;
const AFTERNOON_END_HOUR: u32 = 16;

/// Purchase date and time bonuses, reported together: six points for an
/// odd day of month, ten for a purchase between 14:00 and 15:59.
pub struct PurchaseMomentRule;

impl PurchaseMomentRule {
    fn day_points(purchase_date: &str) -> Result<i64, ScoreError> {
        let day = purchase_date
            .split('-')
            .nth(2)
            .and_then(|d| d.parse::<u32>().ok())
            .ok_or_else(|| ScoreError::malformed("purchase day", purchase_date))?;
        Ok(if day % 2 == 1 { ODD_DAY_POINTS } else { 0 })
    }

    fn time_points(purchase_time: &str) -> Result<i64, ScoreError> {
        let hour = purchase_time
            .split(':')
            .next()
            .and_then(|h| h.parse::<u32>().ok())
            .ok_or_else(|| ScoreError::malformed("purchase hour", purchase_time))?;
        Ok(
            if (AFTERNOON_START_HOUR..AFTERNOON_END_HOUR).contains(&hour) {
                AFTERNOON_POINTS
            } else {
                0
            },
        )
    }
}

impl ScoringRule for PurchaseMomentRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        let day = Self::day_points(&receipt.purchase_date)?;
        let time = Self::time_points(&receipt.purchase_time)?;
        Ok(day + time)
    }

    fn name(&self) -> &str {
        "Purchase Moment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_day() {
        assert_eq!(PurchaseMomentRule::day_points("2022-01-01"), Ok(6));
        assert_eq!(PurchaseMomentRule::day_points("2022-3-9"), Ok(6));
        assert_eq!(PurchaseMomentRule::day_points("2022-03-20"), Ok(0));
        assert!(PurchaseMomentRule::day_points("2022-03").is_err());
    }

    #[test]
    fn test_afternoon_window_is_half_open() {
        assert_eq!(PurchaseMomentRule::time_points("13:59"), Ok(0));
        assert_eq!(PurchaseMomentRule::time_points("14:00"), Ok(10));
        assert_eq!(PurchaseMomentRule::time_points("15:59"), Ok(10));
        assert_eq!(PurchaseMomentRule::time_points("16:00"), Ok(0));
        assert!(PurchaseMomentRule::time_points("two:30").is_err());
    }
}
