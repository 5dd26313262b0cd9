use super::status::{SyncState, SyncStatus};
use crate::auth::{
    AuthProvider, AuthState, PrincipalKind, ServiceAccountAuth, SessionStore, UserConsentAuth,
};
use crate::config::{Config, CredentialMode};
use crate::error::{AppError, Result};
use crate::models::{Expense, ExpenseId, ExpenseUpdate, NewExpense, Settings, Statistics};
use crate::sheets::{SheetOperations, SheetsClient};
use crate::storage::{KeyValueStore, LocalStore};
use chrono::{DateTime, Utc};
use indicatif::ProgressStyle;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{Span, debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

const SPREADSHEET_TITLE: &str = "Expense Tracker";

/// Authentication provider and Sheets client for the configured credential mode.
#[derive(Clone)]
pub struct RemoteStore {
    pub auth: Arc<dyn AuthProvider>,
    pub sheets: Arc<dyn SheetOperations>,
}

impl RemoteStore {
    /// Create the spreadsheet on first use. An existing id is never replaced.
    async fn ensure_spreadsheet(&self) -> Result<()> {
        if self.sheets.spreadsheet_id().is_none() {
            let spreadsheet_id = self.sheets.create_spreadsheet(SPREADSHEET_TITLE).await?;
            info!(%spreadsheet_id, "Created spreadsheet");
        }
        Ok(())
    }

    async fn push(&self, expense: &Expense) -> Result<()> {
        self.ensure_spreadsheet().await?;
        self.sheets.append_expense(expense).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub principal: PrincipalKind,
    pub state: AuthState,
    pub authenticated: bool,
    pub expiry_time: Option<DateTime<Utc>>,
    pub spreadsheet_id: Option<String>,
}

/// Entry point for all expense reads and writes.
///
/// Decides per operation whether the local cache, the spreadsheet, or both are
/// used. With a service account the spreadsheet is the source of truth and
/// writes go through it; with a user login the local cache is authoritative and
/// new records are pushed in the background when auto-sync is on.
pub struct ExpenseService {
    local: Arc<LocalStore>,
    mode: CredentialMode,
    remote: Option<RemoteStore>,
    auto_sync: AtomicBool,
    // Spreadsheet id came from configuration rather than being created here
    explicit_spreadsheet: bool,
    background: Mutex<JoinSet<()>>,
}

impl ExpenseService {
    pub fn new(
        local: Arc<LocalStore>,
        mode: CredentialMode,
        remote: Option<RemoteStore>,
        explicit_spreadsheet: bool,
    ) -> Self {
        let auto_sync = match mode {
            CredentialMode::ServiceCredential => true,
            _ => local.get_settings().auto_sync,
        };

        Self {
            local,
            mode,
            remote,
            auto_sync: AtomicBool::new(auto_sync),
            explicit_spreadsheet,
            background: Mutex::new(JoinSet::new()),
        }
    }

    /// Build the service for `config`. Remote setup failures are logged and
    /// leave the service running on local storage alone.
    #[instrument(name = "Initializing", skip_all)]
    pub async fn initialize(config: &Config, backend: Arc<dyn KeyValueStore>) -> Self {
        let local = Arc::new(LocalStore::new(backend.clone()));
        let session = Arc::new(SessionStore::new(backend));
        let mode = config.credential_mode();

        let remote = match Self::connect(config, mode, session).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "Google Sheets unavailable, using local storage only");
                None
            }
        };
        debug!(?mode, remote = remote.is_some(), "Storage mode selected");

        Self::new(
            local,
            mode,
            remote,
            config.configured_spreadsheet_id().is_some(),
        )
    }

    async fn connect(
        config: &Config,
        mode: CredentialMode,
        session: Arc<SessionStore>,
    ) -> Result<Option<RemoteStore>> {
        let auth: Arc<dyn AuthProvider> = match mode {
            CredentialMode::None => return Ok(None),
            CredentialMode::UserConsent => Arc::new(UserConsentAuth::new(
                &config.google,
                &config.endpoints,
                session.clone(),
            )?),
            CredentialMode::ServiceCredential => Arc::new(
                ServiceAccountAuth::new(
                    &config.service_account,
                    &config.endpoints,
                    session.clone(),
                )
                .await?,
            ),
        };
        let sheets = Arc::new(SheetsClient::new(config, auth.clone(), session)?);

        Ok(Some(RemoteStore { auth, sheets }))
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    pub fn remote_available(&self) -> bool {
        self.remote.is_some()
    }

    pub fn auto_sync_enabled(&self) -> bool {
        self.auto_sync.load(Ordering::SeqCst)
    }

    pub fn spreadsheet_id(&self) -> Option<String> {
        self.remote.as_ref().and_then(|r| r.sheets.spreadsheet_id())
    }

    fn require_remote(&self) -> Result<&RemoteStore> {
        self.remote.as_ref().ok_or_else(|| {
            AppError::NotConfigured("Google Sheets credentials are not configured".to_string())
        })
    }

    fn lock_background(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.background
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[instrument(name = "Adding expense", skip_all)]
    pub async fn add_expense(&self, input: NewExpense) -> Result<Expense> {
        let remote = match (&self.remote, self.mode) {
            (Some(remote), CredentialMode::ServiceCredential) => {
                return self.write_through(remote, input).await;
            }
            (Some(remote), CredentialMode::UserConsent) => remote,
            _ => return self.local.add(input),
        };

        let expense = self.local.add(input)?;
        if self.auto_sync_enabled() && remote.auth.is_authenticated() {
            self.push_in_background(remote.clone(), expense.clone());
        }
        Ok(expense)
    }

    async fn write_through(&self, remote: &RemoteStore, input: NewExpense) -> Result<Expense> {
        let mut expense = self.local.prepare(input)?;

        match remote.push(&expense).await {
            Ok(()) => {
                expense.synced = true;
                self.local.insert(expense)
            }
            Err(e) => {
                let stored = self.local.insert(expense)?;

                if e.is_permission_denied() && self.explicit_spreadsheet {
                    return Err(AppError::SyncPermission {
                        spreadsheet_id: remote.sheets.spreadsheet_id().unwrap_or_default(),
                        source: Box::new(e),
                    });
                }

                warn!(id = %stored.id, error = %e, "Remote write failed, expense saved locally");
                Ok(stored)
            }
        }
    }

    fn push_in_background(&self, remote: RemoteStore, expense: Expense) {
        let local = self.local.clone();
        self.lock_background().spawn(async move {
            match remote.push(&expense).await {
                Ok(()) => {
                    local.mark_synced(&HashSet::from([expense.id]));
                    debug!(id = %expense.id, "Expense synced in background");
                }
                Err(e) => {
                    warn!(id = %expense.id, error = %e, "Background sync failed, expense kept locally");
                }
            }
        });
    }

    /// Wait for background pushes started by `add_expense` to finish.
    pub async fn wait_for_background_sync(&self) {
        let mut tasks = std::mem::take(&mut *self.lock_background());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Background sync task failed");
            }
        }
    }

    /// The remote, when reads should come from it.
    fn authoritative_remote(&self) -> Option<&RemoteStore> {
        let remote = self.remote.as_ref()?;
        match self.mode {
            CredentialMode::ServiceCredential => Some(remote),
            CredentialMode::UserConsent
                if remote.auth.is_authenticated() && remote.sheets.spreadsheet_id().is_some() =>
            {
                Some(remote)
            }
            _ => None,
        }
    }

    /// All expenses, from the spreadsheet when it is authoritative.
    ///
    /// A successful remote read replaces the local cache. Local records that
    /// were never pushed are kept and listed after the remote rows. Any remote
    /// failure falls back to the local cache.
    #[instrument(name = "Loading expenses", skip_all)]
    pub async fn get_expenses(&self) -> Vec<Expense> {
        let Some(remote) = self.authoritative_remote() else {
            return self.local.get_all();
        };

        match remote.sheets.read_expenses().await {
            Ok(mut expenses) => {
                let unsynced = self.local.get_unsynced();
                debug!(
                    remote = expenses.len(),
                    unsynced = unsynced.len(),
                    "Loaded expenses from Google Sheets"
                );
                expenses.extend(unsynced);
                self.local.replace_all(&expenses);
                expenses
            }
            Err(e) => {
                warn!(error = %e, "Failed to read Google Sheets, using local data");
                self.local.get_all()
            }
        }
    }

    /// Push `expenses`, or every unsynced local record, one row at a time.
    ///
    /// Individual failures are counted, not returned. The call fails only when
    /// the remote cannot be used at all.
    #[instrument(name = "Sync", skip_all)]
    pub async fn sync_to_remote(&self, expenses: Option<Vec<Expense>>) -> Result<SyncReport> {
        let remote = self.require_remote()?;

        let candidates = expenses.unwrap_or_else(|| self.local.get_unsynced());
        if candidates.is_empty() {
            debug!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        if self.mode == CredentialMode::UserConsent {
            remote.auth.ensure_authenticated().await?;
        }
        remote.ensure_spreadsheet().await?;

        let span = Span::current();
        span.pb_set_style(
            &ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
            )
            .map_err(|e| AppError::Other(e.into()))?,
        );
        span.pb_set_message("Syncing expenses");
        span.pb_set_length(candidates.len() as u64);

        let mut report = SyncReport::default();
        for expense in &candidates {
            match remote.sheets.append_expense(expense).await {
                Ok(()) => {
                    self.local.mark_synced(&HashSet::from([expense.id]));
                    report.synced += 1;
                }
                Err(e) => {
                    warn!(id = %expense.id, error = %e, "Failed to sync expense");
                    report.failed += 1;
                }
            }
            span.pb_inc(1);
        }

        info!(synced = report.synced, failed = report.failed, "Sync finished");
        Ok(report)
    }

    /// Snapshot of the connection state. Makes no network calls.
    pub fn get_sync_status(&self) -> SyncStatus {
        let expenses = self.local.get_all();
        let service = self.mode == CredentialMode::ServiceCredential;
        let authenticated = self
            .remote
            .as_ref()
            .is_some_and(|r| r.auth.is_authenticated());
        let service_ready = service
            && self
                .remote
                .as_ref()
                .is_some_and(|r| r.auth.state() != AuthState::AuthenticationFailed);

        let mut status = SyncStatus {
            status: SyncState::NotConfigured,
            total_expenses: expenses.len(),
            pending_expenses: expenses.iter().filter(|e| !e.synced).count(),
            google_sheets_available: self.remote_available(),
            user_authenticated: authenticated && !service,
            service_account_enabled: service_ready,
            has_spreadsheet: self.spreadsheet_id().is_some(),
            auto_sync_enabled: self.auto_sync_enabled(),
        };
        status.status = status.state(self.mode != CredentialMode::None);
        status
    }

    pub fn auth_status(&self) -> AuthStatus {
        match &self.remote {
            Some(remote) => AuthStatus {
                principal: remote.auth.kind(),
                state: remote.auth.state(),
                authenticated: remote.auth.is_authenticated(),
                expiry_time: remote.auth.expiry_time(),
                spreadsheet_id: remote.sheets.spreadsheet_id(),
            },
            None => AuthStatus {
                principal: PrincipalKind::None,
                state: AuthState::Uninitialized,
                authenticated: false,
                expiry_time: None,
                spreadsheet_id: None,
            },
        }
    }

    pub async fn sign_in(&self) -> Result<()> {
        self.require_remote()?.auth.authenticate().await
    }

    /// Forget credentials. Local expenses are kept.
    pub async fn sign_out(&self) -> Result<()> {
        match &self.remote {
            Some(remote) => remote.auth.sign_out().await,
            None => Ok(()),
        }
    }

    /// Edit a local record. The spreadsheet row, if any, is left as it is.
    pub fn update_expense(&self, id: ExpenseId, update: &ExpenseUpdate) -> Result<Expense> {
        self.local.update(id, update)
    }

    /// Remove a local record. The spreadsheet row, if any, is left as it is.
    pub fn delete_expense(&self, id: ExpenseId) -> bool {
        self.local.delete(id)
    }

    pub fn clear_all_data(&self) {
        self.local.clear();
        info!("Cleared local expenses");
    }

    pub fn settings(&self) -> Settings {
        self.local.get_settings()
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.auto_sync.store(enabled, Ordering::SeqCst);
        let settings = Settings {
            auto_sync: enabled,
            ..self.local.get_settings()
        };
        self.local.save_settings(&settings);
    }

    pub fn statistics(&self) -> Statistics {
        Statistics::compute(&self.local.get_all(), Utc::now().date_naive())
    }
}
