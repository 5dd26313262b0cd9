use super::Expense;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

const RECENT_EXPENSES: usize = 5;
const UNCATEGORISED: &str = "Other";

/// Dashboard summary over a set of expenses.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_expenses: usize,
    pub total_amount: Decimal,
    pub monthly_expenses: usize,
    pub monthly_amount: Decimal,
    pub category_totals: BTreeMap<String, Decimal>,
    /// Most recently recorded first.
    pub recent_expenses: Vec<Expense>,
}

impl Statistics {
    /// Summarise `expenses`, treating the calendar month of `today` as the current month.
    pub fn compute(expenses: &[Expense], today: NaiveDate) -> Self {
        let monthly: Vec<&Expense> = expenses
            .iter()
            .filter(|e| e.date.year() == today.year() && e.date.month() == today.month())
            .collect();

        Statistics {
            total_expenses: expenses.len(),
            total_amount: expenses.iter().map(|e| e.amount).sum(),
            monthly_expenses: monthly.len(),
            monthly_amount: monthly.iter().map(|e| e.amount).sum(),
            category_totals: category_totals(expenses),
            recent_expenses: expenses.iter().rev().take(RECENT_EXPENSES).cloned().collect(),
        }
    }

    /// Share of the grand total per category, in percent. Empty when nothing was spent.
    pub fn category_percentages(&self) -> BTreeMap<String, Decimal> {
        let grand_total: Decimal = self.category_totals.values().copied().sum();
        if grand_total.is_zero() {
            return BTreeMap::new();
        }

        self.category_totals
            .iter()
            .map(|(category, amount)| {
                let share = (*amount / grand_total * Decimal::ONE_HUNDRED).round_dp(2);
                (category.clone(), share)
            })
            .collect()
    }
}

fn category_totals(expenses: &[Expense]) -> BTreeMap<String, Decimal> {
    let mut totals = BTreeMap::new();
    for expense in expenses {
        let category = match expense.category.trim() {
            "" => UNCATEGORISED,
            c => c,
        };
        *totals.entry(category.to_string()).or_insert(Decimal::ZERO) += expense.amount;
    }
    totals
}

/// Narrows an expense list the way the list view does.
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category: Option<String>,
}

impl ExpenseFilter {
    pub fn matches(&self, expense: &Expense) -> bool {
        if self.from.is_some_and(|from| expense.date < from) {
            return false;
        }
        if self.to.is_some_and(|to| expense.date > to) {
            return false;
        }
        match &self.category {
            Some(category) => expense.category.eq_ignore_ascii_case(category),
            None => true,
        }
    }

    pub fn apply(&self, expenses: Vec<Expense>) -> Vec<Expense> {
        expenses.into_iter().filter(|e| self.matches(e)).collect()
    }
}
