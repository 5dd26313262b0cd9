use crate::models::ExpenseId;
use std::fmt;
use thiserror::Error;

/// Why an authentication attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Cancelled,
    Blocked,
    Network,
    Unknown,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthFailure::Cancelled => "cancelled",
            AuthFailure::Blocked => "blocked",
            AuthFailure::Network => "network",
            AuthFailure::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classification of a failed Sheets API call, decided from the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    AuthExpired,
    PermissionDenied,
    NotFound,
    MissingSheet,
    Other,
}

impl RemoteErrorKind {
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            401 => RemoteErrorKind::AuthExpired,
            403 => RemoteErrorKind::PermissionDenied,
            404 => RemoteErrorKind::NotFound,
            400 if body.contains("Unable to parse range") => RemoteErrorKind::MissingSheet,
            _ => RemoteErrorKind::Other,
        }
    }

    fn remediation(&self) -> &'static str {
        match self {
            RemoteErrorKind::AuthExpired => "authentication expired, sign in again",
            RemoteErrorKind::PermissionDenied => {
                "permission denied, make sure the account has edit access to the spreadsheet"
            }
            RemoteErrorKind::NotFound => {
                "spreadsheet not found, check the spreadsheet ID or create a new one"
            }
            RemoteErrorKind::MissingSheet => "the Expenses sheet is missing from the spreadsheet",
            RemoteErrorKind::Other => "request failed",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed ({reason}): {message}")]
    Authentication {
        reason: AuthFailure,
        message: String,
    },

    #[error("Not authenticated with Google, run `expense-tracker auth login`")]
    NotAuthenticated,

    #[error("Google Sheets not configured: {0}")]
    NotConfigured(String),

    #[error("Google Sheets API error {status}: {} ({message})", .kind.remediation())]
    Remote {
        status: u16,
        kind: RemoteErrorKind,
        message: String,
    },

    #[error("Expense {0} not found")]
    NotFound(ExpenseId),

    #[error("Invalid expense: {0}")]
    InvalidExpense(String),

    #[error(
        "Permission denied to spreadsheet {spreadsheet_id}. Check that you are signed in with \
         the intended Google account and that it has edit access: \
         https://docs.google.com/spreadsheets/d/{spreadsheet_id}/edit ({source})"
    )]
    SyncPermission {
        spreadsheet_id: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        AppError::Remote {
            status,
            kind: RemoteErrorKind::from_response(status, &message),
            message,
        }
    }

    pub fn auth(reason: AuthFailure, message: impl Into<String>) -> Self {
        AppError::Authentication {
            reason,
            message: message.into(),
        }
    }

    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            AppError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True for errors that mean the principal may not write to the spreadsheet.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self.remote_kind(),
            Some(RemoteErrorKind::PermissionDenied | RemoteErrorKind::AuthExpired)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
