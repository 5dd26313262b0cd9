use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Column headers of the Expenses sheet, in row order.
pub const SHEET_HEADERS: [&str; 6] = [
    "Date",
    "Amount",
    "Category",
    "Description",
    "Payment Method",
    "Created At",
];

// Sheet row number of the first data row (row 1 holds the headers).
const FIRST_DATA_ROW: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(pub i64);

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExpenseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(ExpenseId)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

/// Fields supplied by the user when recording an expense.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewExpense {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payment_method: String,
}

impl NewExpense {
    pub fn validate(&self) -> Result<()> {
        validate_fields(self.amount, &self.category)
    }
}

/// Partial update applied to a stored expense. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseUpdate {
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
}

impl ExpenseUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ExpenseUpdate::default()
    }

    /// Merge into `expense`. Any local edit invalidates a previous remote write.
    pub fn apply_to(&self, expense: &mut Expense) -> Result<()> {
        let amount = self.amount.unwrap_or(expense.amount);
        let category = self.category.as_deref().unwrap_or(&expense.category);
        validate_fields(amount, category)?;

        if let Some(date) = self.date {
            expense.date = date;
        }
        expense.amount = amount;
        if let Some(category) = &self.category {
            expense.category = category.clone();
        }
        if let Some(description) = &self.description {
            expense.description = description.clone();
        }
        if let Some(payment_method) = &self.payment_method {
            expense.payment_method = payment_method.clone();
        }
        expense.synced = false;

        Ok(())
    }
}

fn validate_fields(amount: Decimal, category: &str) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(AppError::InvalidExpense(format!(
            "amount must not be negative, got {}",
            amount
        )));
    }
    if category.trim().is_empty() {
        return Err(AppError::InvalidExpense("category is required".to_string()));
    }
    Ok(())
}

impl Expense {
    pub(crate) fn from_new(id: ExpenseId, input: NewExpense, created_at: DateTime<Utc>) -> Self {
        Expense {
            id,
            date: input.date,
            amount: input.amount,
            category: input.category,
            description: input.description,
            payment_method: input.payment_method,
            created_at,
            synced: false,
        }
    }

    /// Cells for one sheet row, ordered as [`SHEET_HEADERS`].
    pub fn to_sheet_row(&self) -> Vec<Value> {
        let amount = self
            .amount
            .to_f64()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(self.amount.to_string()));

        vec![
            Value::String(self.date.format("%Y-%m-%d").to_string()),
            amount,
            Value::String(self.category.clone()),
            Value::String(self.description.clone()),
            Value::String(self.payment_method.clone()),
            Value::String(self.created_at.to_rfc3339()),
        ]
    }
}

pub trait FromSheetRows: Sized {
    /// Convert data rows (header row excluded) into records.
    fn from_sheet_rows(rows: &[Vec<Value>]) -> Vec<Self>;
}

impl FromSheetRows for Expense {
    fn from_sheet_rows(rows: &[Vec<Value>]) -> Vec<Self> {
        rows.iter()
            .enumerate()
            .filter(|(_, row)| !is_blank_row(row))
            .map(|(idx, row)| expense_from_row(FIRST_DATA_ROW + idx as i64, row))
            .collect()
    }
}

fn is_blank_row(row: &[Value]) -> bool {
    row.iter().all(|cell| cell_to_string(cell).trim().is_empty())
}

fn expense_from_row(row_number: i64, row: &[Value]) -> Expense {
    let cell = |idx: usize| row.get(idx).map(cell_to_string).unwrap_or_default();

    let created_at = DateTime::parse_from_rfc3339(cell(5).trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok();
    let date = match row.first().and_then(date_from_cell) {
        Some(date) => date,
        None => {
            warn!(row = row_number, value = %cell(0), "Sheet row has no readable date");
            created_at.unwrap_or_else(Utc::now).date_naive()
        }
    };
    let amount = cell(1).trim().parse::<Decimal>().unwrap_or(Decimal::ZERO);

    Expense {
        // Row-position id; only stable while no rows are removed or reordered.
        id: ExpenseId(row_number),
        date,
        amount,
        category: cell(2),
        description: cell(3),
        payment_method: cell(4),
        created_at: created_at.unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc()),
        synced: true,
    }
}

// Days in a spreadsheet serial date are counted from 1899-12-30.
fn serial_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

fn date_from_cell(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => {
            let days = n.as_f64()?.floor() as i64;
            serial_epoch()?.checked_add_signed(Duration::days(days))
        }
        Value::String(s) => {
            let s = s.trim();
            ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .or_else(|| s.parse::<f64>().ok().and_then(|n| date_from_cell(&Value::from(n))))
        }
        _ => None,
    }
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use rust_decimal::prelude::dec;
    use serde_json::json;

    #[test]
    fn test_to_sheet_row() {
        let expense = mock_expense(1, dec!(12.5), "Food & Dining", mock_date(2024, 1, 5));
        let row = expense.to_sheet_row();
        assert_eq!(
            row,
            vec![
                json!("2024-01-05"),
                json!(12.5),
                json!("Food & Dining"),
                json!("mock expense: Food & Dining"),
                json!("Card"),
                json!("2024-01-05T10:00:00+00:00"),
            ]
        );
    }

    #[test]
    fn test_from_sheet_rows_assigns_row_ids() {
        let rows = vec![
            vec![
                json!("2024-01-05"),
                json!(12.5),
                json!("Food & Dining"),
                json!("lunch"),
                json!("Cash"),
                json!("2024-01-05T12:00:00Z"),
            ],
            vec![json!("2024-01-06"), json!("7"), json!("Transportation")],
        ];

        let expenses = Expense::from_sheet_rows(&rows);
        assert_eq!(expenses.len(), 2);

        assert_eq!(expenses[0].id, ExpenseId(2));
        assert_eq!(expenses[0].amount, dec!(12.5));
        assert_eq!(expenses[0].payment_method, "Cash");
        assert!(expenses[0].synced);

        // Missing trailing columns default to empty values.
        assert_eq!(expenses[1].id, ExpenseId(3));
        assert_eq!(expenses[1].amount, dec!(7));
        assert_eq!(expenses[1].description, "");
        assert_eq!(expenses[1].payment_method, "");
        assert_eq!(
            expenses[1].created_at,
            mock_date(2024, 1, 6).and_time(NaiveTime::MIN).and_utc()
        );
    }

    #[test]
    fn test_from_sheet_rows_unparseable_amount_is_zero() {
        let rows = vec![vec![json!("2024-02-01"), json!("n/a"), json!("Other")]];
        let expenses = Expense::from_sheet_rows(&rows);
        assert_eq!(expenses[0].amount, Decimal::ZERO);
    }

    #[test]
    fn test_from_sheet_rows_skips_blank_rows_keeping_positions() {
        let rows = vec![
            vec![],
            vec![json!(""), json!(null)],
            vec![json!("2024-02-01"), json!(3), json!("Other")],
        ];
        let expenses = Expense::from_sheet_rows(&rows);
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].id, ExpenseId(4));
    }

    #[test]
    fn test_from_sheet_rows_reads_serial_and_text_dates() {
        let rows = vec![
            vec![json!(45296), json!(12.5), json!("Food & Dining")],
            vec![json!("1/5/2024"), json!(4), json!("Other")],
            vec![json!("45296"), json!(1), json!("Other")],
        ];
        let expenses = Expense::from_sheet_rows(&rows);
        assert_eq!(expenses.len(), 3);
        for expense in &expenses {
            assert_eq!(expense.date, mock_date(2024, 1, 5));
        }
    }

    #[test]
    fn test_from_sheet_rows_keeps_rows_without_a_date() {
        let rows = vec![
            vec![json!(""), json!(3), json!("Other"), json!("no date")],
            vec![
                json!("someday"),
                json!(2),
                json!("Other"),
                json!(""),
                json!(""),
                json!("2024-03-09T08:00:00Z"),
            ],
        ];
        let expenses = Expense::from_sheet_rows(&rows);
        assert_eq!(expenses.len(), 2);
        assert_eq!(expenses[0].description, "no date");
        assert_eq!(expenses[0].amount, dec!(3));
        assert_eq!(expenses[1].date, mock_date(2024, 3, 9));
    }

    #[test]
    fn test_validate_rejects_negative_amount() {
        let input = mock_new_expense(dec!(-1), "Other", mock_date(2024, 1, 1));
        assert!(matches!(input.validate(), Err(AppError::InvalidExpense(_))));
    }

    #[test]
    fn test_validate_requires_category() {
        let input = mock_new_expense(dec!(1), "  ", mock_date(2024, 1, 1));
        assert!(matches!(input.validate(), Err(AppError::InvalidExpense(_))));
    }

    #[test]
    fn test_update_resets_synced() {
        let mut expense = mock_expense(1, dec!(5), "Shopping", mock_date(2024, 3, 1));
        expense.synced = true;

        let update = ExpenseUpdate {
            amount: Some(dec!(6)),
            ..Default::default()
        };
        update.apply_to(&mut expense).unwrap();

        assert_eq!(expense.amount, dec!(6));
        assert_eq!(expense.category, "Shopping");
        assert!(!expense.synced);
    }

    #[test]
    fn test_expense_json_uses_camel_case() {
        let expense = mock_expense(42, dec!(1.25), "Travel", mock_date(2024, 4, 2));
        let json = serde_json::to_value(&expense).unwrap();
        assert_eq!(json["id"], json!(42));
        assert_eq!(json["paymentMethod"], json!("Card"));
        assert_eq!(json["synced"], json!(false));
        assert!(json.get("createdAt").is_some());
    }
}
