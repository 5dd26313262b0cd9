use super::KeyValueStore;
use crate::error::{AppError, Result};
use crate::models::{Expense, ExpenseId, ExpenseUpdate, NewExpense, Settings};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

const EXPENSES_KEY: &str = "expenses";
const SETTINGS_KEY: &str = "settings";

/// Durable local cache of expense records and settings.
///
/// Every mutation rewrites the whole expense list, so a read issued after a
/// write always observes it. Read failures and corrupt data degrade to an
/// empty list; only `add`/`insert` and `update` report errors.
pub struct LocalStore {
    backend: Arc<dyn KeyValueStore>,
    // Held for each read-modify-write cycle; stores the last id handed out.
    last_id: Mutex<i64>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            last_id: Mutex::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, i64> {
        self.last_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_blob<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let contents = match self.backend.get(key) {
            Ok(contents) => contents?,
            Err(e) => {
                warn!(key, error = %e, "Failed to read local storage");
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring corrupt local storage entry");
                None
            }
        }
    }

    fn write_blob<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let contents = serde_json::to_string(value)?;
        self.backend.set(key, &contents)
    }

    fn read_expenses(&self) -> Vec<Expense> {
        self.read_blob(EXPENSES_KEY).unwrap_or_default()
    }

    fn write_expenses_logged(&self, expenses: &[Expense]) {
        if let Err(e) = self.write_blob(EXPENSES_KEY, expenses) {
            warn!(error = %e, "Failed to write expenses to local storage");
        }
    }

    /// All stored expenses in insertion order.
    pub fn get_all(&self) -> Vec<Expense> {
        let _guard = self.lock();
        self.read_expenses()
    }

    /// Validate `input` and allocate an id and creation time without storing it.
    pub fn prepare(&self, input: NewExpense) -> Result<Expense> {
        input.validate()?;

        let mut last_id = self.lock();
        let highest_stored = self
            .read_expenses()
            .iter()
            .map(|e| e.id.0)
            .max()
            .unwrap_or(0);

        let now = Utc::now();
        let id = now
            .timestamp_millis()
            .max(*last_id + 1)
            .max(highest_stored + 1);
        *last_id = id;

        Ok(Expense::from_new(ExpenseId(id), input, now))
    }

    /// Append a prepared expense and persist the list.
    pub fn insert(&self, expense: Expense) -> Result<Expense> {
        let _guard = self.lock();
        let mut expenses = self.read_expenses();
        expenses.push(expense.clone());
        self.write_blob(EXPENSES_KEY, &expenses)?;

        debug!(id = %expense.id, synced = expense.synced, "Stored expense locally");
        Ok(expense)
    }

    pub fn add(&self, input: NewExpense) -> Result<Expense> {
        let expense = self.prepare(input)?;
        self.insert(expense)
    }

    pub fn update(&self, id: ExpenseId, update: &ExpenseUpdate) -> Result<Expense> {
        let _guard = self.lock();
        let mut expenses = self.read_expenses();
        let expense = expenses
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(AppError::NotFound(id))?;

        update.apply_to(expense)?;
        let updated = expense.clone();
        self.write_blob(EXPENSES_KEY, &expenses)?;

        Ok(updated)
    }

    /// Remove the expense with `id`. Returns whether anything was removed.
    pub fn delete(&self, id: ExpenseId) -> bool {
        let _guard = self.lock();
        let mut expenses = self.read_expenses();
        let before = expenses.len();
        expenses.retain(|e| e.id != id);

        let removed = expenses.len() != before;
        if removed {
            self.write_expenses_logged(&expenses);
        }
        removed
    }

    pub fn get_unsynced(&self) -> Vec<Expense> {
        self.get_all().into_iter().filter(|e| !e.synced).collect()
    }

    pub fn mark_synced(&self, ids: &HashSet<ExpenseId>) {
        if ids.is_empty() {
            return;
        }

        let _guard = self.lock();
        let mut expenses = self.read_expenses();
        for expense in expenses.iter_mut().filter(|e| ids.contains(&e.id)) {
            expense.synced = true;
        }
        self.write_expenses_logged(&expenses);
    }

    /// Overwrite the whole expense list.
    pub fn replace_all(&self, expenses: &[Expense]) {
        let _guard = self.lock();
        self.write_expenses_logged(expenses);
    }

    /// Remove every expense. Settings are kept.
    pub fn clear(&self) {
        let _guard = self.lock();
        if let Err(e) = self.backend.remove(EXPENSES_KEY) {
            warn!(error = %e, "Failed to clear local expenses");
        }
    }

    pub fn get_settings(&self) -> Settings {
        self.read_blob(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save_settings(&self, settings: &Settings) {
        if let Err(e) = self.write_blob(SETTINGS_KEY, settings) {
            warn!(error = %e, "Failed to save settings");
        }
    }
}
