pub mod expense;
pub mod settings;
pub mod stats;

pub use expense::{Expense, ExpenseId, ExpenseUpdate, FromSheetRows, NewExpense, SHEET_HEADERS};
pub use settings::Settings;
pub use stats::{ExpenseFilter, Statistics};
