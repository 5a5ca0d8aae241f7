use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    // Four digit year, month and day with optional leading zeros
    static ref DATE_SHAPE: Regex = Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap();
    static ref TIME_SHAPE: Regex = Regex::new(r"^(\d{1,2}):(\d{1,2})$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Item {
    #[serde(rename = "shortDescription")]
    pub short_description: String,
    pub price: String,
}

/// The body a client posts to `/receipts/process`.
///
/// Decoding is strict: every field must be present and a JSON string, and
/// any field not listed here is rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiptSubmission {
    pub retailer: String,
    #[serde(rename = "purchaseDate")]
    pub purchase_date: String,
    #[serde(rename = "purchaseTime")]
    pub purchase_time: String,
    pub items: Vec<Item>,
    pub total: String,
}

/// An accepted receipt. This is also the queue and store encoding, with the
/// identifier under `"Id"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "Id")]
    pub id: String,
    pub retailer: String,
    #[serde(rename = "purchaseDate")]
    pub purchase_date: String,
    #[serde(rename = "purchaseTime")]
    pub purchase_time: String,
    pub items: Vec<Item>,
    pub total: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("field '{0}' must not be empty")]
    MissingField(&'static str),
    #[error("receipt must contain at least one item")]
    NoItems,
    #[error("purchaseDate '{0}' is not a valid YYYY-MM-DD date")]
    InvalidDate(String),
    #[error("purchaseTime '{0}' is not a valid HH:MM time")]
    InvalidTime(String),
    #[error("total '{0}' is not a valid amount")]
    InvalidTotal(String),
    #[error("item {index} has an empty shortDescription")]
    EmptyDescription { index: usize },
    #[error("item {index} has an empty price")]
    EmptyPrice { index: usize },
    #[error("item {index} price '{price}' is not a valid amount")]
    InvalidPrice { index: usize, price: String },
}

impl ReceiptSubmission {
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Check every field against its format rule. A submission that fails
    /// here is never assigned an id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.retailer.is_empty() {
            return Err(ValidationError::MissingField("retailer"));
        }
        if self.purchase_date.is_empty() {
            return Err(ValidationError::MissingField("purchaseDate"));
        }
        if self.purchase_time.is_empty() {
            return Err(ValidationError::MissingField("purchaseTime"));
        }
        if self.total.is_empty() {
            return Err(ValidationError::MissingField("total"));
        }
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }

        if !is_valid_date(&self.purchase_date) {
            return Err(ValidationError::InvalidDate(self.purchase_date.clone()));
        }
        if !is_valid_time(&self.purchase_time) {
            return Err(ValidationError::InvalidTime(self.purchase_time.clone()));
        }
        if parse_amount(&self.total).is_none() {
            return Err(ValidationError::InvalidTotal(self.total.clone()));
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.short_description.is_empty() {
                return Err(ValidationError::EmptyDescription { index });
            }
            if item.price.is_empty() {
                return Err(ValidationError::EmptyPrice { index });
            }
            match parse_amount(&item.price) {
                Some(price) if price >= 0.0 => {}
                _ => {
                    return Err(ValidationError::InvalidPrice {
                        index,
                        price: item.price.clone(),
                    })
                }
            }
        }

        Ok(())
    }

    pub fn into_receipt(self, id: String) -> Receipt {
        Receipt {
            id,
            retailer: self.retailer,
            purchase_date: self.purchase_date,
            purchase_time: self.purchase_time,
            items: self.items,
            total: self.total,
        }
    }
}

impl Receipt {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Parse a decimal amount. Non-finite values (`inf`, `NaN`) are refused.
pub fn parse_amount(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_valid_date(value: &str) -> bool {
    let Some(caps) = DATE_SHAPE.captures(value) else {
        return false;
    };
    let year = caps[1].parse::<i32>();
    let month = caps[2].parse::<u32>();
    let day = caps[3].parse::<u32>();
    match (year, month, day) {
        (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d).is_some(),
        _ => false,
    }
}

fn is_valid_time(value: &str) -> bool {
    let Some(caps) = TIME_SHAPE.captures(value) else {
        return false;
    };
    match (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
        (Ok(hour), Ok(minute)) => hour < 24 && minute < 60,
        _ => false,
    }
}
