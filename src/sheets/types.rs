use serde::Deserialize;
use serde_json::Value;

// https://developers.google.com/workspace/sheets/api/reference/rest/v4/spreadsheets.values/get
#[derive(Debug, Deserialize)]
pub(super) struct ValuesResponse {
    #[serde(default)]
    pub(super) values: Vec<Vec<Value>>,
}

// https://developers.google.com/workspace/sheets/api/reference/rest/v4/spreadsheets.values/append
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AppendResponse {
    #[serde(default)]
    pub(super) updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AppendUpdates {
    pub(super) updated_range: Option<String>,
}
