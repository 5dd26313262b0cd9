use crate::error::Result;
use crate::sync::ExpenseService;
use clap::{Subcommand, ValueEnum};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    /// Show the stored settings
    Show,
    /// Push new expenses in the background after signing in
    AutoSync {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Toggle {
    On,
    Off,
}

impl SettingsAction {
    pub fn execute(&self, service: &ExpenseService) -> Result<()> {
        match self {
            SettingsAction::Show => {
                let settings = service.settings();
                info!(
                    auto_sync = service.auto_sync_enabled(),
                    currency = %settings.default_currency,
                    categories = %settings.categories.join(", "),
                    "Settings"
                );
            }
            SettingsAction::AutoSync { state } => {
                let enabled = matches!(state, Toggle::On);
                service.set_auto_sync(enabled);
                info!(auto_sync = enabled, "Settings saved");
            }
        }
        Ok(())
    }
}
