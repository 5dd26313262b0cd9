use serde::{Deserialize, Serialize};

const DEFAULT_CATEGORIES: [&str; 8] = [
    "Food & Dining",
    "Transportation",
    "Shopping",
    "Entertainment",
    "Bills & Utilities",
    "Healthcare",
    "Travel",
    "Other",
];

/// User preferences stored next to the expense list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_sync: bool,
    pub default_currency: String,
    pub categories: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_sync: false,
            default_currency: "USD".to_string(),
            categories: DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}
