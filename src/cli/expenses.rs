use crate::error::{AppError, Result};
use crate::models::{Expense, ExpenseFilter, ExpenseId, ExpenseUpdate, NewExpense};
use crate::sync::ExpenseService;
use chrono::{NaiveDate, Utc};
use clap::Args;
use dialoguer::Confirm;
use rust_decimal::Decimal;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Amount spent
    amount: Decimal,

    #[arg(short, long)]
    category: String,

    /// Date of the expense (YYYY-MM-DD), today when omitted
    #[arg(short, long)]
    date: Option<NaiveDate>,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(short, long, default_value = "")]
    payment_method: String,
}

impl AddArgs {
    pub async fn execute(&self, service: &ExpenseService) -> Result<()> {
        let input = NewExpense {
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            amount: self.amount,
            category: self.category.clone(),
            description: self.description.clone(),
            payment_method: self.payment_method.clone(),
        };

        let expense = service.add_expense(input).await?;
        info!(id = %expense.id, synced = expense.synced, "Expense added");

        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only expenses on or after this date
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Only expenses on or before this date
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(short, long)]
    category: Option<String>,

    /// Print JSON instead of log lines
    #[arg(long)]
    json: bool,
}

impl ListArgs {
    pub async fn execute(&self, service: &ExpenseService) -> Result<()> {
        let filter = ExpenseFilter {
            from: self.from,
            to: self.to,
            category: self.category.clone(),
        };
        let expenses = filter.apply(service.get_expenses().await);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&expenses)?);
            return Ok(());
        }

        for expense in &expenses {
            log_expense(expense);
        }
        info!(count = expenses.len(), "Listed expenses");

        Ok(())
    }
}

pub(super) fn log_expense(expense: &Expense) {
    info!(
        id = %expense.id,
        date = %expense.date,
        amount = %expense.amount,
        category = %expense.category,
        description = %expense.description,
        payment_method = %expense.payment_method,
        synced = expense.synced,
        "Expense"
    );
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    id: ExpenseId,

    #[arg(long)]
    amount: Option<Decimal>,

    #[arg(short, long)]
    category: Option<String>,

    #[arg(short, long)]
    date: Option<NaiveDate>,

    #[arg(long)]
    description: Option<String>,

    #[arg(short, long)]
    payment_method: Option<String>,
}

impl UpdateArgs {
    pub fn execute(&self, service: &ExpenseService) -> Result<()> {
        let update = ExpenseUpdate {
            date: self.date,
            amount: self.amount,
            category: self.category.clone(),
            description: self.description.clone(),
            payment_method: self.payment_method.clone(),
        };
        if update.is_empty() {
            return Err(AppError::InvalidExpense("nothing to update".to_string()));
        }

        let expense = service.update_expense(self.id, &update)?;
        log_expense(&expense);
        info!("Expense updated locally, the spreadsheet row is unchanged");

        Ok(())
    }
}

pub fn delete(service: &ExpenseService, id: ExpenseId) -> Result<()> {
    match service.delete_expense(id) {
        true => info!(%id, "Expense deleted locally"),
        false => warn!(%id, "No such expense"),
    }
    Ok(())
}

pub fn clear(service: &ExpenseService, yes: bool) -> Result<()> {
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Delete all local expenses? Google Sheets is not affected")
            .default(false)
            .interact()
            .map_err(|e| AppError::Other(e.into()))?;
        if !confirmed {
            info!("Nothing deleted");
            return Ok(());
        }
    }

    service.clear_all_data();
    Ok(())
}
