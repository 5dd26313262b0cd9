use crate::error::Result;
use crate::sheets::spreadsheet_url;
use crate::sync::ExpenseService;
use tracing::info;

pub async fn sync(service: &ExpenseService) -> Result<()> {
    let report = service.sync_to_remote(None).await?;
    let url = service.spreadsheet_id().map(|id| spreadsheet_url(&id));

    info!(
        synced = report.synced,
        failed = report.failed,
        url = url.as_deref().unwrap_or("-"),
        "Sync completed"
    );

    Ok(())
}

pub fn status(service: &ExpenseService, json: bool) -> Result<()> {
    let status = service.get_sync_status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    info!(
        status = %status.status,
        mode = ?service.mode(),
        total = status.total_expenses,
        pending = status.pending_expenses,
        google_sheets = status.google_sheets_available,
        user_authenticated = status.user_authenticated,
        service_account = status.service_account_enabled,
        spreadsheet = status.has_spreadsheet,
        auto_sync = status.auto_sync_enabled,
        "Sync status"
    );
    if let Some(id) = service.spreadsheet_id() {
        info!(url = %spreadsheet_url(&id), "Spreadsheet");
    }

    Ok(())
}

pub async fn stats(service: &ExpenseService) -> Result<()> {
    // Refresh the cache from the spreadsheet when it is authoritative
    service.get_expenses().await;
    let stats = service.statistics();

    info!(
        count = stats.total_expenses,
        total = %stats.total_amount,
        month_count = stats.monthly_expenses,
        month_total = %stats.monthly_amount,
        "Totals"
    );

    let percentages = stats.category_percentages();
    for (category, amount) in &stats.category_totals {
        let share = percentages.get(category).copied().unwrap_or_default();
        info!(%category, %amount, percent = %share, "Category");
    }

    for expense in &stats.recent_expenses {
        super::expenses::log_expense(expense);
    }

    Ok(())
}
