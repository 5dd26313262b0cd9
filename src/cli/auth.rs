use crate::error::Result;
use crate::sync::ExpenseService;
use clap::Subcommand;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Sign in to Google Sheets
    Login,
    /// Forget stored Google credentials. Local expenses are kept
    Logout,
    /// Show the authentication state
    Status,
}

impl AuthAction {
    pub async fn execute(&self, service: &ExpenseService) -> Result<()> {
        match self {
            AuthAction::Login => {
                service.sign_in().await?;
                info!("Google Sheets authentication verified");
            }
            AuthAction::Logout => {
                service.sign_out().await?;
                info!("Signed out of Google Sheets");
            }
            AuthAction::Status => {
                let status = service.auth_status();
                info!(
                    principal = ?status.principal,
                    state = ?status.state,
                    authenticated = status.authenticated,
                    expiry_time = ?status.expiry_time,
                    spreadsheet_id = status.spreadsheet_id.as_deref().unwrap_or("-"),
                    "Authentication status"
                );
            }
        }
        Ok(())
    }
}
