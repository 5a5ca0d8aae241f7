pub mod items;
pub mod purchase_moment;
pub mod retailer;
pub mod total;

use crate::receipt::Receipt;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("malformed numeric value in {field}: '{value}'")]
    MalformedNumeric { field: &'static str, value: String },
    #[error("points overflow after rule '{rule}'")]
    PointsOverflow { rule: String },
}

impl ScoreError {
    pub(crate) fn malformed(field: &'static str, value: &str) -> Self {
        ScoreError::MalformedNumeric {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleScore {
    pub rule_name: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsBreakdown {
    pub scores: Vec<RuleScore>,
    pub total_points: i64,
}

/// One independent contribution to a receipt's points.
pub trait ScoringRule: Send + Sync {
    fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError>;
    fn name(&self) -> &str;
}

/// Sums every rule. Any rule error aborts the whole evaluation.
pub struct ScoringEngine {
    rules: Vec<Box<dyn ScoringRule>>,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(retailer::RetailerNameRule),
                Box::new(total::RoundDollarRule),
                Box::new(total::QuarterMultipleRule),
                Box::new(items::ItemCountRule),
                Box::new(items::ItemDescriptionRule),
                Box::new(purchase_moment::PurchaseMomentRule),
            ],
        }
    }

    pub fn evaluate(&self, receipt: &Receipt) -> Result<PointsBreakdown, ScoreError> {
        let mut scores = Vec::with_capacity(self.rules.len());
        let mut total_points: i64 = 0;

        for rule in &self.rules {
            let points = rule.score(receipt)?;
            total_points = total_points.checked_add(points).ok_or_else(|| {
                ScoreError::PointsOverflow {
                    rule: rule.name().to_string(),
                }
            })?;
            scores.push(RuleScore {
                rule_name: rule.name().to_string(),
                points,
            });
        }

        log::debug!("Receipt {} scored {total_points} points", receipt.id);

        Ok(PointsBreakdown {
            scores,
            total_points,
        })
    }

    pub fn score(&self, receipt: &Receipt) -> Result<i64, ScoreError> {
        self.evaluate(receipt).map(|breakdown| breakdown.total_points)
    }
}

/// Score a receipt with the standard rule set.
pub fn score(receipt: &Receipt) -> Result<i64, ScoreError> {
    ScoringEngine::new().score(receipt)
}
