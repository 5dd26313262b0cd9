use super::formatting::{add_sheet_rule, freeze_header_rule, header_style_rule};
use super::types::{AppendResponse, ValuesResponse};
use super::{SHEET_NAME, SheetOperations};
use crate::auth::{AuthProvider, SessionStore};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{Expense, FromSheetRows, SHEET_HEADERS};
use anyhow::anyhow;
use async_trait::async_trait;
use google_sheets4::api::{
    BatchUpdateSpreadsheetRequest, BatchUpdateSpreadsheetResponse, Request, Sheet,
    SheetProperties, Spreadsheet, SpreadsheetProperties, ValueRange,
};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, instrument};

const HEADER_RANGE: &str = "Expenses!A1:F1";
const APPEND_RANGE: &str = "Expenses!A:F";
// Everything below the header row
const DATA_RANGE: &str = "Expenses!A2:F";

pub fn spreadsheet_url(spreadsheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{}/edit", spreadsheet_id)
}

/// Sheets v4 REST client for the Expenses sheet.
pub struct SheetsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    auth: Arc<dyn AuthProvider>,
    session: Arc<SessionStore>,
    spreadsheet_id: RwLock<Option<String>>,
    // Spreadsheet whose Expenses sheet is known to exist
    sheet_ready_for: Mutex<Option<String>>,
}

impl SheetsClient {
    /// The spreadsheet id comes from configuration when set, otherwise from
    /// the one this client created in an earlier run.
    pub fn new(
        config: &Config,
        auth: Arc<dyn AuthProvider>,
        session: Arc<SessionStore>,
    ) -> Result<Self> {
        let spreadsheet_id = config
            .configured_spreadsheet_id()
            .map(str::to_string)
            .or_else(|| session.spreadsheet_id());

        Ok(Self {
            client: Client::builder().build()?,
            base_url: config.endpoints.sheets_base_url.trim_end_matches('/').to_string(),
            api_key: config.google.api_key().map(str::to_string),
            auth,
            session,
            spreadsheet_id: RwLock::new(spreadsheet_id),
            sheet_ready_for: Mutex::new(None),
        })
    }

    fn require_spreadsheet_id(&self) -> Result<String> {
        self.spreadsheet_id().ok_or_else(|| {
            AppError::NotConfigured(
                "no spreadsheet ID set, run `expense-tracker sync` to create one".to_string(),
            )
        })
    }

    fn sheet_ready(&self, spreadsheet_id: &str) -> bool {
        self.sheet_ready_for
            .lock()
            .map(|ready| ready.as_deref() == Some(spreadsheet_id))
            .unwrap_or(false)
    }

    fn mark_sheet_ready(&self, spreadsheet_id: &str) {
        if let Ok(mut ready) = self.sheet_ready_for.lock() {
            *ready = Some(spreadsheet_id.to_string());
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.call(Method::GET, path, query, None::<&()>).await
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let access_token = self.auth.access_token().await?;
        let url = match path {
            "" => self.base_url.clone(),
            path => format!("{}/{}", self.base_url, path),
        };

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(access_token)
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::remote(status.as_u16(), body));
        }

        Ok(response.json().await?)
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        requests: Vec<Request>,
    ) -> Result<BatchUpdateSpreadsheetResponse> {
        let batch_update = BatchUpdateSpreadsheetRequest {
            requests: Some(requests),
            ..Default::default()
        };

        self.call(
            Method::POST,
            &format!("{}:batchUpdate", spreadsheet_id),
            &[],
            Some(&batch_update),
        )
        .await
    }

    async fn find_sheet(&self, spreadsheet_id: &str) -> Result<Option<Sheet>> {
        let spreadsheet: Spreadsheet = self
            .get(spreadsheet_id, &[("fields", "sheets.properties")])
            .await?;

        let sheet = spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .find(|sheet| {
                sheet
                    .properties
                    .as_ref()
                    .map(|props| props.title.as_deref() == Some(SHEET_NAME))
                    .unwrap_or(false)
            });

        Ok(sheet)
    }

    async fn add_sheet(&self, spreadsheet_id: &str) -> Result<i32> {
        let response = self
            .batch_update(spreadsheet_id, vec![add_sheet_rule(SHEET_NAME)])
            .await?;

        response
            .replies
            .and_then(|replies| replies.into_iter().next())
            .and_then(|reply| reply.add_sheet)
            .and_then(|add_sheet| add_sheet.properties)
            .and_then(|props| props.sheet_id)
            .ok_or_else(|| AppError::Other(anyhow!("Add sheet response has no sheet ID")))
    }

    /// Write the header row and style it.
    async fn initialize_sheet(&self, spreadsheet_id: &str, sheet_id: i32) -> Result<()> {
        let headers = ValueRange {
            major_dimension: Some("ROWS".to_string()),
            range: Some(HEADER_RANGE.to_string()),
            values: Some(vec![
                SHEET_HEADERS
                    .iter()
                    .map(|h| Value::String(h.to_string()))
                    .collect(),
            ]),
        };
        let _: Value = self
            .call(
                Method::PUT,
                &format!("{}/values/{}", spreadsheet_id, HEADER_RANGE),
                &[("valueInputOption", "RAW")],
                Some(&headers),
            )
            .await?;

        self.batch_update(
            spreadsheet_id,
            vec![header_style_rule(sheet_id), freeze_header_rule(sheet_id)],
        )
        .await?;

        debug!(sheet_id, "Initialized header row");
        Ok(())
    }
}

#[async_trait]
impl SheetOperations for SheetsClient {
    fn spreadsheet_id(&self) -> Option<String> {
        self.spreadsheet_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_default()
    }

    fn set_spreadsheet_id(&self, spreadsheet_id: &str) {
        if let Ok(mut id) = self.spreadsheet_id.write() {
            *id = Some(spreadsheet_id.to_string());
        }
        self.session.store_spreadsheet_id(spreadsheet_id);
    }

    #[instrument(name = "Creating new spreadsheet", skip(self))]
    async fn create_spreadsheet(&self, title: &str) -> Result<String> {
        let spreadsheet = Spreadsheet {
            properties: Some(SpreadsheetProperties {
                title: Some(title.to_string()),
                ..Default::default()
            }),
            sheets: Some(vec![Sheet {
                properties: Some(SheetProperties {
                    title: Some(SHEET_NAME.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let result: Spreadsheet = self
            .call(Method::POST, "", &[], Some(&spreadsheet))
            .await?;

        let spreadsheet_id = result
            .spreadsheet_id
            .ok_or_else(|| AppError::Other(anyhow!("Created spreadsheet has empty ID")))?;
        let sheet_id = result
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sheet| sheet.properties)
            .find(|props| props.title.as_deref() == Some(SHEET_NAME))
            .and_then(|props| props.sheet_id)
            .unwrap_or_default();

        self.initialize_sheet(&spreadsheet_id, sheet_id).await?;
        self.set_spreadsheet_id(&spreadsheet_id);
        self.mark_sheet_ready(&spreadsheet_id);

        debug!(%spreadsheet_id, "Created spreadsheet");
        Ok(spreadsheet_id)
    }

    #[instrument(name = "Ensuring sheet exists", skip(self))]
    async fn ensure_sheet(&self) -> Result<()> {
        let spreadsheet_id = self.require_spreadsheet_id()?;
        if self.sheet_ready(&spreadsheet_id) {
            return Ok(());
        }

        match self.find_sheet(&spreadsheet_id).await? {
            Some(sheet) => {
                let sheet_id = sheet.properties.and_then(|p| p.sheet_id);
                debug!(?sheet_id, "Found existing sheet");
            }
            None => {
                let sheet_id = self.add_sheet(&spreadsheet_id).await?;
                self.initialize_sheet(&spreadsheet_id, sheet_id).await?;
                debug!(sheet_id, "Created sheet");
            }
        }

        self.mark_sheet_ready(&spreadsheet_id);
        Ok(())
    }

    #[instrument(name = "Appending expense", skip_all, fields(id = %expense.id))]
    async fn append_expense(&self, expense: &Expense) -> Result<()> {
        self.ensure_sheet().await?;
        let spreadsheet_id = self.require_spreadsheet_id()?;

        let row = ValueRange {
            major_dimension: Some("ROWS".to_string()),
            range: Some(APPEND_RANGE.to_string()),
            values: Some(vec![expense.to_sheet_row()]),
        };
        let response: AppendResponse = self
            .call(
                Method::POST,
                &format!("{}/values/{}:append", spreadsheet_id, APPEND_RANGE),
                &[
                    ("valueInputOption", "RAW"),
                    ("insertDataOption", "INSERT_ROWS"),
                ],
                Some(&row),
            )
            .await?;

        let updated_range = response.updates.and_then(|u| u.updated_range);
        debug!(?updated_range, "Appended row");
        Ok(())
    }

    #[instrument(name = "Fetching sheet", skip(self))]
    async fn read_expenses(&self) -> Result<Vec<Expense>> {
        let spreadsheet_id = self.require_spreadsheet_id()?;

        let response: ValuesResponse = self
            .get(
                &format!("{}/values/{}", spreadsheet_id, DATA_RANGE),
                &[
                    ("majorDimension", "ROWS"),
                    ("valueRenderOption", "UNFORMATTED_VALUE"),
                ],
            )
            .await?;

        Ok(Expense::from_sheet_rows(&response.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PrincipalKind;
    use crate::auth::test_helpers::{MOCK_TOKEN, MockAuth};
    use crate::config::{Endpoints, GoogleConfig};
    use crate::error::RemoteErrorKind;
    use crate::models::ExpenseId;
    use crate::models::expense::test_helpers::{mock_date, mock_expense};
    use crate::storage::MemoryStore;
    use rust_decimal::prelude::dec;
    use tiny_http::{Response, Server};

    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        url: String,
        authorization: Option<String>,
        body: String,
    }

    /// Serve canned responses in order, recording each request.
    fn fake_sheets(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<Recorded>>>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/v4/spreadsheets", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorder = requests.clone();
        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut content = String::new();
                request.as_reader().read_to_string(&mut content).unwrap();
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());

                recorder.lock().unwrap().push(Recorded {
                    method: request.method().as_str().to_string(),
                    url: request.url().to_string(),
                    authorization,
                    body: content,
                });
                request
                    .respond(Response::from_string(body).with_status_code(status))
                    .unwrap();
            }
        });

        (base_url, requests)
    }

    fn sheets_client(base_url: &str, spreadsheet_id: Option<&str>) -> (SheetsClient, Arc<SessionStore>) {
        let config = Config {
            spreadsheet_id: spreadsheet_id.map(str::to_string),
            google: GoogleConfig {
                client_id: "client".to_string(),
                client_secret: String::new(),
                api_key: "test_key".to_string(),
            },
            endpoints: Endpoints {
                sheets_base_url: base_url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let session = Arc::new(SessionStore::new(Arc::new(MemoryStore::new())));
        let auth = Arc::new(MockAuth::new(PrincipalKind::User, true));

        let client = SheetsClient::new(&config, auth, session.clone()).unwrap();
        (client, session)
    }

    const EXPENSES_SHEET: &str =
        r#"{"spreadsheetId":"sheet_123","sheets":[{"properties":{"sheetId":0,"title":"Expenses"}}]}"#;

    #[tokio::test]
    async fn test_append_expense_sends_row() {
        let (base_url, requests) = fake_sheets(vec![
            (200, EXPENSES_SHEET),
            (200, r#"{"updates":{"updatedRange":"Expenses!A2:F2"}}"#),
        ]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        let expense = mock_expense(1, dec!(12.5), "Food & Dining", mock_date(2024, 1, 5));
        client.append_expense(&expense).await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "GET");

        let append = &requests[1];
        assert_eq!(append.method, "POST");
        assert!(append.url.contains("/sheet_123/values/Expenses!A:F:append"));
        assert!(append.url.contains("valueInputOption=RAW"));
        assert!(append.url.contains("insertDataOption=INSERT_ROWS"));
        assert!(append.url.contains("key=test_key"));
        assert_eq!(
            append.authorization.as_deref(),
            Some(format!("Bearer {}", MOCK_TOKEN).as_str())
        );

        let body: Value = serde_json::from_str(&append.body).unwrap();
        assert_eq!(body["values"][0][0], "2024-01-05");
        assert_eq!(body["values"][0][1], 12.5);
        assert_eq!(body["values"][0][2], "Food & Dining");
    }

    #[tokio::test]
    async fn test_ensure_sheet_creates_missing_sheet_once() {
        let (base_url, requests) = fake_sheets(vec![
            (200, r#"{"sheets":[{"properties":{"sheetId":0,"title":"Sheet1"}}]}"#),
            (200, r#"{"replies":[{"addSheet":{"properties":{"sheetId":77,"title":"Expenses"}}}]}"#),
            (200, "{}"),
            (200, "{}"),
        ]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        client.ensure_sheet().await.unwrap();
        client.ensure_sheet().await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests[1].url.contains("sheet_123:batchUpdate"));
        assert!(requests[1].body.contains("addSheet"));

        assert_eq!(requests[2].method, "PUT");
        let headers: Value = serde_json::from_str(&requests[2].body).unwrap();
        assert_eq!(headers["values"][0][4], "Payment Method");

        let formatting: Value = serde_json::from_str(&requests[3].body).unwrap();
        assert_eq!(
            formatting["requests"][0]["repeatCell"]["range"]["sheetId"],
            77
        );
    }

    #[tokio::test]
    async fn test_create_spreadsheet_stores_id() {
        let (base_url, requests) = fake_sheets(vec![
            (
                200,
                r#"{"spreadsheetId":"new_sheet","sheets":[{"properties":{"sheetId":5,"title":"Expenses"}}]}"#,
            ),
            (200, "{}"),
            (200, "{}"),
        ]);
        let (client, session) = sheets_client(&base_url, None);

        let id = client.create_spreadsheet("Expense Tracker").await.unwrap();

        assert_eq!(id, "new_sheet");
        assert_eq!(client.spreadsheet_id().as_deref(), Some("new_sheet"));
        assert_eq!(session.spreadsheet_id().as_deref(), Some("new_sheet"));

        let requests = requests.lock().unwrap();
        let create: Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(create["properties"]["title"], "Expense Tracker");
        assert_eq!(create["sheets"][0]["properties"]["title"], "Expenses");
    }

    #[tokio::test]
    async fn test_read_expenses_maps_rows() {
        let (base_url, requests) = fake_sheets(vec![(
            200,
            r#"{"range":"Expenses!A2:F3","values":[
                ["2024-01-05",12.5,"Food & Dining","lunch","Cash","2024-01-05T12:00:00Z"],
                ["2024-01-06",7,"Transportation"]
            ]}"#,
        )]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        let expenses = client.read_expenses().await.unwrap();

        assert_eq!(expenses.len(), 2);
        assert_eq!(expenses[0].id, ExpenseId(2));
        assert_eq!(expenses[0].amount, dec!(12.5));
        assert_eq!(expenses[1].id, ExpenseId(3));
        assert_eq!(expenses[1].category, "Transportation");

        let requests = requests.lock().unwrap();
        assert!(requests[0].url.contains("/values/Expenses!A2:F"));
        assert!(requests[0].url.contains("valueRenderOption=UNFORMATTED_VALUE"));
    }

    #[tokio::test]
    async fn test_read_empty_sheet() {
        let (base_url, _) = fake_sheets(vec![(200, r#"{"range":"Expenses!A2:F1000"}"#)]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        assert!(client.read_expenses().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_permission_denied() {
        let (base_url, _) = fake_sheets(vec![(
            403,
            r#"{"error":{"code":403,"message":"The caller does not have permission"}}"#,
        )]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        let err = client.read_expenses().await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_missing_sheet_range_error() {
        let (base_url, _) = fake_sheets(vec![(
            400,
            r#"{"error":{"code":400,"message":"Unable to parse range: Expenses!A2:F"}}"#,
        )]);
        let (client, _) = sheets_client(&base_url, Some("sheet_123"));

        let err = client.read_expenses().await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::MissingSheet));
    }

    #[tokio::test]
    async fn test_no_spreadsheet_is_not_configured() {
        // Nothing listens here; the call must fail before any request
        let (client, _) = sheets_client("http://127.0.0.1:9/v4/spreadsheets", None);

        assert!(matches!(
            client.read_expenses().await,
            Err(AppError::NotConfigured(_))
        ));
        assert!(matches!(
            client.ensure_sheet().await,
            Err(AppError::NotConfigured(_))
        ));
    }
}
