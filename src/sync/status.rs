use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Synced,
    Pending,
    NotAuthenticated,
    NoSpreadsheet,
    NotConfigured,
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
            SyncState::NotAuthenticated => "not_authenticated",
            SyncState::NoSpreadsheet => "no_spreadsheet",
            SyncState::NotConfigured => "not_configured",
            SyncState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Connection summary shown to the user. Field names are part of the JSON
/// output of `status --json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub status: SyncState,
    pub total_expenses: usize,
    pub pending_expenses: usize,
    pub google_sheets_available: bool,
    pub user_authenticated: bool,
    pub service_account_enabled: bool,
    pub has_spreadsheet: bool,
    pub auto_sync_enabled: bool,
}

impl SyncStatus {
    /// Pick the coarse state from the individual flags. `remote_configured`
    /// says whether credentials were present at startup, whether or not the
    /// remote could be initialized from them.
    pub(super) fn state(&self, remote_configured: bool) -> SyncState {
        if !remote_configured {
            SyncState::NotConfigured
        } else if !self.google_sheets_available {
            SyncState::Error
        } else if !self.user_authenticated && !self.service_account_enabled {
            SyncState::NotAuthenticated
        } else if !self.has_spreadsheet {
            SyncState::NoSpreadsheet
        } else if self.pending_expenses > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> SyncStatus {
        SyncStatus {
            status: SyncState::Error,
            total_expenses: 3,
            pending_expenses: 0,
            google_sheets_available: true,
            user_authenticated: true,
            service_account_enabled: false,
            has_spreadsheet: true,
            auto_sync_enabled: false,
        }
    }

    #[test]
    fn test_state_precedence() {
        let mut s = status();
        assert_eq!(s.state(true), SyncState::Synced);

        s.pending_expenses = 1;
        assert_eq!(s.state(true), SyncState::Pending);

        s.has_spreadsheet = false;
        assert_eq!(s.state(true), SyncState::NoSpreadsheet);

        s.user_authenticated = false;
        assert_eq!(s.state(true), SyncState::NotAuthenticated);

        s.google_sheets_available = false;
        assert_eq!(s.state(true), SyncState::Error);
        assert_eq!(s.state(false), SyncState::NotConfigured);
    }

    #[test]
    fn test_status_json_names() {
        let json = serde_json::to_value(status()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["googleSheetsAvailable"], true);
        assert_eq!(json["userAuthenticated"], true);
        assert_eq!(json["hasSpreadsheet"], true);
        assert_eq!(json["autoSyncEnabled"], false);
        assert_eq!(SyncState::NotAuthenticated.to_string(), "not_authenticated");
    }
}
