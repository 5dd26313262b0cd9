mod auth;
mod expenses;
mod settings;
mod show;
mod sync;

use crate::config::Config;
use crate::error::Result;
use crate::storage::FileStore;
use crate::sync::ExpenseService;
use clap::{Parser, Subcommand};
use std::sync::Arc;

pub use auth::AuthAction;
pub use expenses::{AddArgs, ListArgs, UpdateArgs};
pub use settings::SettingsAction;
pub use show::ShowResource;

#[derive(Parser, Debug)]
#[command(name = "expense-tracker")]
#[command(about = "Track personal expenses locally and sync them to Google Sheets", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Show { resource } => resource.execute().await,
            Commands::Tracker(command) => {
                let config = Config::load()?;
                let backend = Arc::new(FileStore::new(Config::data_dir()?));
                let service = ExpenseService::initialize(&config, backend).await;

                let result = command.execute(&service).await;
                service.wait_for_background_sync().await;
                result
            }
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Show {
        #[command(subcommand)]
        resource: ShowResource,
    },
    #[command(flatten)]
    Tracker(TrackerCommand),
}

/// Commands that work against the expense store.
#[derive(Subcommand, Debug)]
pub enum TrackerCommand {
    /// Record an expense
    Add(AddArgs),
    /// List expenses
    List(ListArgs),
    /// Edit a recorded expense (local only)
    Update(UpdateArgs),
    /// Delete a recorded expense (local only)
    Delete {
        id: crate::models::ExpenseId,
    },
    /// Delete all local expenses
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Push unsynced expenses to Google Sheets
    Sync,
    /// Show the sync status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show spending statistics
    Stats,
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

impl TrackerCommand {
    async fn execute(&self, service: &ExpenseService) -> Result<()> {
        match self {
            Self::Add(args) => args.execute(service).await,
            Self::List(args) => args.execute(service).await,
            Self::Update(args) => args.execute(service),
            Self::Delete { id } => expenses::delete(service, *id),
            Self::Clear { yes } => expenses::clear(service, *yes),
            Self::Sync => sync::sync(service).await,
            Self::Status { json } => sync::status(service, *json),
            Self::Stats => sync::stats(service).await,
            Self::Auth { action } => action.execute(service).await,
            Self::Settings { action } => action.execute(service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_show_parses_without_tracker_commands() {
        let cli = Cli::try_parse_from(["expense-tracker", "show", "paths"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { .. }));

        let cli = Cli::try_parse_from(["expense-tracker", "delete", "42"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Tracker(TrackerCommand::Delete { .. })
        ));
    }
}
