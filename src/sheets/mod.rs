mod client;
mod formatting;
mod types;

pub use client::{SheetsClient, spreadsheet_url};

use crate::error::Result;
use crate::models::Expense;
use async_trait::async_trait;

/// Name of the sheet (tab) holding one expense per row.
pub const SHEET_NAME: &str = "Expenses";

#[async_trait]
pub trait SheetOperations: Send + Sync {
    fn spreadsheet_id(&self) -> Option<String>;

    fn set_spreadsheet_id(&self, spreadsheet_id: &str);

    /// Create a spreadsheet with a formatted Expenses sheet and use it from now on.
    async fn create_spreadsheet(&self, title: &str) -> Result<String>;

    /// Add the Expenses sheet to the current spreadsheet if it is missing.
    async fn ensure_sheet(&self) -> Result<()>;

    async fn append_expense(&self, expense: &Expense) -> Result<()>;

    async fn read_expenses(&self) -> Result<Vec<Expense>>;
}
