use super::{ScoreError, ScoringRule};
use crate::receipt::{parse_amount, Receipt};

const POINTS_PER_ITEM_PAIR: i64 = 5;
const DESCRIPTION_PRICE_MULTIPLIER: f64 = 0.2;

/// Five points for every two items; an odd item out earns nothing.
pub struct ItemCountRule;

impl ScoringRule for ItemCountRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        Ok((receipt.items.len() / 2) as i64 * POINTS_PER_ITEM_PAIR)
    }

    fn name(&self) -> &str {
        "Item Count"
    }
}

/// Items whose trimmed description length is a multiple of three earn
/// `ceil(price * 0.2)`.
pub struct ItemDescriptionRule;

impl ScoringRule for ItemDescriptionRule {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        let mut points: i64 = 0;
        for item in &receipt.items {
            // Byte length of the trimmed text
            if item.short_description.trim().len() % 3 != 0 {
                continue;
            }
            let out_of_range = || ScoreError::malformed("item price", &item.price);
            let price = parse_amount(&item.price).ok_or_else(out_of_range)?;
            let bonus = (price * DESCRIPTION_PRICE_MULTIPLIER).ceil();
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            if !(i64::MIN as f64..i64::MAX as f64).contains(&bonus) {
                return Err(out_of_range());
            }
            points = points
                .checked_add(bonus as i64)
                .ok_or_else(out_of_range)?;
        }
        Ok(points)
    }

    fn name(&self) -> &str {
        "Item Descriptions"
    }
}
