//! Expense records as handed to the engine by the storage layer.
//!
//! The engine never loads or persists these itself; callers pass the candidate
//! expense and a slice of the same user's history.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single submitted expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub user_id: String,
    /// Exact decimal amount as entered by the user
    pub amount: Decimal,
    /// Calendar date the expense was incurred
    pub expense_date: NaiveDate,
    /// Wall-clock time the expense was recorded (user local time)
    pub created_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Expense {
    /// Create an expense with no category, merchant or description.
    pub fn new(
        user_id: impl Into<String>,
        amount: Decimal,
        expense_date: NaiveDate,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            amount,
            expense_date,
            created_at,
            category: None,
            merchant_name: None,
            description: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant_name = Some(merchant.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Category name, `None` when absent or blank.
    pub fn category_name(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }

    /// Merchant name, `None` when absent or blank.
    pub fn merchant(&self) -> Option<&str> {
        non_blank(self.merchant_name.as_deref())
    }

    /// Description, `None` when absent or blank.
    pub fn description_text(&self) -> Option<&str> {
        non_blank(self.description.as_deref())
    }

    /// Hour of day (0-23) the expense was recorded.
    pub fn hour(&self) -> u32 {
        self.created_at.hour()
    }

    /// Amount as `f64`, `None` if the decimal cannot be represented.
    pub fn amount_f64(&self) -> Option<f64> {
        self.amount.to_f64().filter(|v| v.is_finite())
    }

    /// True when both expenses carry the same (non-blank) category name.
    pub fn same_category(&self, other: &Expense) -> bool {
        match (self.category_name(), other.category_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Expense {
        Expense::new(
            "user-1",
            Decimal::new(1250, 2),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(14, 30, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_blank_optionals_are_absent() {
        let expense = sample()
            .with_category("   ")
            .with_merchant("")
            .with_description("lunch");

        assert_eq!(expense.category_name(), None);
        assert_eq!(expense.merchant(), None);
        assert_eq!(expense.description_text(), Some("lunch"));
    }

    #[test]
    fn test_hour_and_amount() {
        let expense = sample();
        assert_eq!(expense.hour(), 14);
        assert_eq!(expense.amount_f64(), Some(12.5));
    }

    #[test]
    fn test_same_category_requires_both() {
        let a = sample().with_category("Meals");
        let b = sample().with_category("Meals");
        let c = sample();

        assert!(a.same_category(&b));
        assert!(!a.same_category(&c));
        assert!(!c.same_category(&c.clone()));
    }

    #[test]
    fn test_serde_skips_missing_optionals() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("merchant_name"));

        let back: Expense = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample().with_id(back.id));
    }
}
